use super::{Engine, Inner};
use crate::config::Config;
use crate::downloader::Downloader;
use crate::processor::{Item, Processor, ProcessorRegistry};
use crate::queue::Queue;
use crate::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Step-by-step assembly of an [`Engine`]
///
/// A queue, a downloader and at least one processor are required.
///
/// # Example
///
/// ```no_run
/// use ripple_crawl::{Config, Engine, HttpDownloader, MemoryQueue, ProcessOutput, DownloadResult};
/// use std::sync::Arc;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::default();
/// let engine = Engine::builder(&config)
///     .queue(Arc::new(MemoryQueue::new(config.queue.dedup_scope)))
///     .downloader(Arc::new(HttpDownloader::new(&config.request)?))
///     .processor(&["pages"], |result: &DownloadResult| -> anyhow::Result<ProcessOutput> {
///         println!("{} bytes from {}", result.body.len(), result.task.url);
///         Ok(ProcessOutput::new())
///     })
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct EngineBuilder {
    max_retries: u32,
    idle_interval: Duration,
    queue: Option<Arc<dyn Queue>>,
    downloader: Option<Arc<dyn Downloader>>,
    processors: ProcessorRegistry,
    item_sink: Option<mpsc::UnboundedSender<Item>>,
    error: Option<EngineError>,
}

impl EngineBuilder {
    /// Starts a builder with retry and idle settings taken from `config`
    pub fn new(config: &Config) -> Self {
        Self {
            max_retries: config.request.max_retries,
            idle_interval: config.engine.idle_interval(),
            queue: None,
            downloader: None,
            processors: ProcessorRegistry::new(),
            item_sink: None,
            error: None,
        }
    }

    pub fn queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Registers a processor under one or more aliases
    ///
    /// A duplicate alias is reported by [`EngineBuilder::build`].
    pub fn processor<P>(mut self, aliases: &[&str], processor: P) -> Self
    where
        P: Processor + 'static,
    {
        if self.error.is_none() {
            if let Err(e) = self.processors.register(Arc::new(processor), aliases) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Forwards every extracted item to `sink`
    pub fn item_sink(mut self, sink: mpsc::UnboundedSender<Item>) -> Self {
        self.item_sink = Some(sink);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let queue = self.queue.ok_or(EngineError::MissingQueue)?;
        let downloader = self.downloader.ok_or(EngineError::MissingDownloader)?;
        if self.processors.is_empty() {
            return Err(EngineError::NoProcessors);
        }

        Ok(Engine::from_inner(Inner::new(
            queue,
            downloader,
            self.processors,
            self.item_sink,
            self.max_retries,
            self.idle_interval,
        )))
    }
}
