//! Processors turn download results into extracted items and follow-up tasks
//!
//! A processor is any `Fn(&DownloadResult) -> anyhow::Result<ProcessOutput>`
//! (or a type implementing [`Processor`]). Processors are registered on the
//! engine under one or more keys; a task's `processor_key` selects the one
//! that handles its result.

use crate::task::{DownloadResult, Task};
use crate::EngineError;
use std::collections::HashMap;
use std::sync::Arc;

/// An item extracted by a processor
pub type Item = serde_json::Value;

/// What a processor produced from one result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
    pub items: Vec<Item>,
    pub tasks: Vec<Task>,
}

impl ProcessOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }
}

/// Extraction logic for one kind of result
///
/// Called synchronously from the result handler of each task. The engine
/// enforces no timeout here; a processor that hangs stalls only that task.
pub trait Processor: Send + Sync {
    fn process(&self, result: &DownloadResult) -> anyhow::Result<ProcessOutput>;
}

impl<F> Processor for F
where
    F: Fn(&DownloadResult) -> anyhow::Result<ProcessOutput> + Send + Sync,
{
    fn process(&self, result: &DownloadResult) -> anyhow::Result<ProcessOutput> {
        self(result)
    }
}

/// Mapping from processor key to processor
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a processor under every alias
    ///
    /// Fails without registering anything if one of the aliases is taken.
    pub fn register(
        &mut self,
        processor: Arc<dyn Processor>,
        aliases: &[&str],
    ) -> Result<(), EngineError> {
        if let Some(taken) = aliases
            .iter()
            .find(|alias| self.processors.contains_key(**alias))
        {
            return Err(EngineError::DuplicateProcessor(taken.to_string()));
        }

        for alias in aliases {
            tracing::debug!("Added processor with alias `{}`", alias);
            self.processors.insert(alias.to_string(), processor.clone());
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn Processor>> {
        self.processors.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.processors.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
