//! Task queue abstraction
//!
//! A queue is an ordered store of tasks behaving as a double-ended FIFO:
//! normal submissions go to the tail, retries and reschedules go to the head.
//! Deduplication is keyed by [`Task::fingerprint`] and is checked in the same
//! atomic step as the insertion.
//!
//! Two backends are provided:
//! - [`MemoryQueue`]: in-process deque behind a single mutex
//! - [`RedisQueue`]: shared Redis store driven by Lua scripts

mod distributed;
mod memory;

pub use distributed::RedisQueue;
pub use memory::MemoryQueue;

use crate::config::{QueueBackend, QueueConfig};
use crate::task::Task;
use crate::QueueResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where a task is inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueuePosition {
    /// Popped before everything already queued
    Head,
    /// Popped after everything already queued
    Tail,
}

impl EnqueuePosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Tail => "tail",
        }
    }
}

/// How long a fingerprint claim lasts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupScope {
    /// The claim is released when its entry is popped, so an equal task
    /// can be queued again once the first one has been taken
    Queued,
    /// The claim is kept for the lifetime of the queue (or Redis namespace).
    /// The set of fingerprints grows without bound.
    #[default]
    Run,
}

/// Capability interface of a task queue backend
///
/// Operations issued after [`Queue::shutdown`] are unspecified; the engine
/// never makes them.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Backend name used in logs
    fn name(&self) -> &'static str;

    /// Inserts a task at the given position
    ///
    /// When `allow_duplication` is false the fingerprint is checked and
    /// claimed atomically with the insertion, and an existing claim yields
    /// [`QueueError::Duplicate`](crate::QueueError::Duplicate).
    async fn enqueue(
        &self,
        task: Task,
        allow_duplication: bool,
        position: EnqueuePosition,
    ) -> QueueResult<()>;

    /// Removes and returns the front-most task, or `None` when empty
    async fn pop(&self) -> QueueResult<Option<Task>>;

    /// Number of queued tasks
    async fn len(&self) -> QueueResult<usize>;

    async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Flushes and closes the backend
    async fn shutdown(&self);
}

/// Opens the queue backend selected by the configuration
pub async fn open_queue(config: &QueueConfig) -> QueueResult<Arc<dyn Queue>> {
    match config.backend {
        QueueBackend::Memory => Ok(Arc::new(MemoryQueue::new(config.dedup_scope))),
        QueueBackend::Redis => {
            let queue =
                RedisQueue::connect(&config.redis_url, &config.queue_id, config.dedup_scope)
                    .await?;
            Ok(Arc::new(queue))
        }
    }
}
