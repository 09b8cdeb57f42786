//! Crawl engine - the scheduling loop
//!
//! The engine wires a queue, a downloader and the processor registry
//! together:
//! - Pops tasks and hands them to the downloader
//! - Routes each result to the processor named by the task
//! - Submits follow-up tasks and applies the retry policy to failures
//! - Drains in-flight work and shuts the components down on exit
//!
//! The loop stops by itself once the queue is empty and nothing is in
//! flight, or when the shutdown signal fires.

mod builder;
mod stats;

pub use builder::EngineBuilder;
pub use stats::RunStats;

use crate::config::Config;
use crate::downloader::Downloader;
use crate::processor::{Item, ProcessorRegistry};
use crate::queue::{EnqueuePosition, Queue};
use crate::task::{DownloadResult, Task};
use crate::{DownloadError, QueueError};
use chrono::Utc;
use futures::FutureExt;
use stats::Counters;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub(crate) struct Inner {
    queue: Arc<dyn Queue>,
    downloader: Arc<dyn Downloader>,
    processors: ProcessorRegistry,
    item_sink: Option<mpsc::UnboundedSender<Item>>,
    max_retries: u32,
    idle_interval: Duration,

    /// Dispatched tasks whose result has not been fully handled yet
    in_flight: AtomicUsize,
    /// Signalled whenever an in-flight task resolves
    progress: Notify,
    /// Cancelled once shutdown has begun
    shutdown: CancellationToken,
    handlers: TaskTracker,
    counters: Counters,
}

impl Inner {
    pub(crate) fn new(
        queue: Arc<dyn Queue>,
        downloader: Arc<dyn Downloader>,
        processors: ProcessorRegistry,
        item_sink: Option<mpsc::UnboundedSender<Item>>,
        max_retries: u32,
        idle_interval: Duration,
    ) -> Self {
        Self {
            queue,
            downloader,
            processors,
            item_sink,
            max_retries,
            idle_interval,
            in_flight: AtomicUsize::new(0),
            progress: Notify::new(),
            shutdown: CancellationToken::new(),
            handlers: TaskTracker::new(),
            counters: Counters::default(),
        }
    }
}

/// Marks one task as in flight for as long as it lives
struct InFlight {
    inner: Arc<Inner>,
}

impl InFlight {
    fn enter(inner: &Arc<Inner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            inner: inner.clone(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.progress.notify_one();
    }
}

/// Handle to a crawl engine
///
/// Cloning is cheap; all clones drive the same engine. An engine is meant to
/// be run once.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Starts building an engine from configuration
    pub fn builder(config: &Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// The queue this engine schedules from
    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.inner.queue
    }

    /// Number of dispatched tasks not yet fully handled
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Token that stops the engine when cancelled
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Counters gathered so far
    pub fn stats(&self) -> RunStats {
        self.inner.counters.snapshot()
    }

    /// Submits one task; see [`Engine::add_tasks`]
    pub async fn add_task(&self, task: &Task) -> bool {
        self.add_tasks(std::slice::from_ref(task)).await == 1
    }

    /// Submits tasks to the tail of the queue
    ///
    /// Each task is copied, so later changes by the caller do not affect the
    /// queued state. Tasks naming an unregistered processor are skipped.
    /// Duplicates are dropped silently. Returns the number of tasks accepted.
    pub async fn add_tasks(&self, tasks: &[Task]) -> usize {
        let mut accepted = 0;

        for task in tasks {
            if !self.inner.processors.contains(&task.processor_key) {
                tracing::warn!(
                    "Ignore task {} with processor missing: `{}`",
                    task,
                    task.processor_key
                );
                continue;
            }

            let mut copy = task.clone();
            copy.meta.enqueue_time = Some(Utc::now());

            match self
                .inner
                .queue
                .enqueue(copy, task.allow_duplication, EnqueuePosition::Tail)
                .await
            {
                Ok(()) => accepted += 1,
                Err(QueueError::Duplicate { .. }) => {
                    tracing::debug!("Ignore duplicated task {}", task);
                }
                Err(e) => tracing::error!("Failed to add task {} to queue: {}", task, e),
            }
        }

        accepted
    }

    /// Runs until the queue is drained or the process receives Ctrl-C
    pub async fn run(&self) -> RunStats {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Received Ctrl-C, start to shutdown");
        })
        .await
    }

    /// Runs until the queue is drained, `signal` completes, or the shutdown
    /// handle is cancelled
    ///
    /// On a signal the loop finishes its current step, then the downloader
    /// and the queue are shut down. Results that race the shutdown are
    /// rescheduled before the queue closes.
    pub async fn run_until<F>(&self, signal: F) -> RunStats
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            "Engine starts to work (queue: {}, processors: {})",
            self.inner.queue.name(),
            self.inner.processors.len()
        );

        let work = self.work();
        tokio::pin!(work);
        tokio::select! {
            _ = &mut work => {}
            _ = signal => {
                self.inner.shutdown.cancel();
                work.await;
            }
        }

        self.shutdown().await;

        let stats = self.stats();
        tracing::info!(
            "Engine stopped: {} dispatched, {} succeeded, {} retried, {} rescheduled, {} dropped",
            stats.dispatched,
            stats.succeeded,
            stats.retried,
            stats.rescheduled,
            stats.dropped
        );
        stats
    }

    async fn work(&self) {
        while !self.is_shutting_down() {
            let task = match self.inner.queue.pop().await {
                Ok(task) => task,
                Err(e) => {
                    // A store outage looks the same as an empty queue here.
                    tracing::error!("Failed to retrieve a task from the queue: {}", e);
                    None
                }
            };

            if let Some(task) = task {
                self.dispatch(task).await;
                continue;
            }

            let in_flight = self.in_flight();
            if in_flight == 0 {
                break;
            }

            tracing::debug!(
                "No new tasks in the queue, waiting for {} in-flight tasks",
                in_flight
            );
            tokio::select! {
                _ = tokio::time::sleep(self.inner.idle_interval) => {}
                _ = self.inner.progress.notified() => {}
                _ = self.inner.shutdown.cancelled() => {}
            }
        }

        tracing::info!("No new tasks to be run, engine stops");
    }

    /// Hands one task to the downloader and spawns its result handler
    async fn dispatch(&self, task: Task) {
        tracing::debug!("Run task {}", task);
        let guard = InFlight::enter(&self.inner);
        let (sink, result) = oneshot::channel();

        let submitted = AssertUnwindSafe(self.inner.downloader.download(task.clone(), sink))
            .catch_unwind()
            .await;
        if let Err(panic) = submitted {
            tracing::error!(
                "Recovered from panic while running task {}: {}",
                task,
                panic_message(&*panic)
            );
            Counters::bump(&self.inner.counters.download_failures);
            self.retry_task(task).await;
            drop(guard);
            return;
        }

        Counters::bump(&self.inner.counters.dispatched);
        let engine = self.clone();
        self.inner.handlers.spawn(async move {
            let _guard = guard;
            engine.handle_result(task, result).await;
        });
    }

    async fn handle_result(&self, task: Task, result: oneshot::Receiver<DownloadResult>) {
        let result = match result.await {
            Ok(result) => result,
            Err(_) => DownloadResult::failed(task, DownloadError::Aborted),
        };

        match &result.error {
            Some(DownloadError::ShuttingDown) => {
                self.reschedule_task(result.task).await;
                return;
            }
            Some(e) => {
                tracing::error!("Download task {} failed, reason: {}", result.task, e);
                Counters::bump(&self.inner.counters.download_failures);
                self.retry_task(result.task).await;
                return;
            }
            None => {}
        }

        let Some(processor) = self.inner.processors.get(&result.task.processor_key) else {
            // Only reachable for tasks that entered a shared queue elsewhere.
            tracing::warn!(
                "Drop task {}: no processor `{}` registered",
                result.task,
                result.task.processor_key
            );
            Counters::bump(&self.inner.counters.dropped);
            return;
        };

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| processor.process(&result)))
            .unwrap_or_else(|panic| {
                Err(anyhow::anyhow!(
                    "processor panicked: {}",
                    panic_message(&*panic)
                ))
            });

        match outcome {
            Ok(output) => {
                Counters::bump(&self.inner.counters.succeeded);
                tracing::debug!(
                    "Task {} produced {} items and {} new tasks",
                    result.task,
                    output.items.len(),
                    output.tasks.len()
                );
                self.forward_items(output.items);
                self.add_tasks(&output.tasks).await;
            }
            Err(e) => {
                tracing::error!("Process task {} failed, reason: {:#}", result.task, e);
                Counters::bump(&self.inner.counters.processor_failures);
                if result.task.suppress_retry_on_processor_failure {
                    tracing::info!("Drop task {}: retry on processor failure is off", result.task);
                    Counters::bump(&self.inner.counters.dropped);
                } else {
                    self.retry_task(result.task).await;
                }
            }
        }
    }

    fn forward_items(&self, items: Vec<Item>) {
        let Some(sink) = &self.inner.item_sink else {
            return;
        };
        for item in items {
            if sink.send(item).is_err() {
                tracing::debug!("Item receiver dropped, discarding extracted items");
                return;
            }
        }
    }

    /// Puts a failed task back at the head unless its retry budget is spent
    async fn retry_task(&self, mut task: Task) {
        task.meta.retry_count += 1;
        if task.meta.retry_count > self.inner.max_retries {
            tracing::error!(
                "Task {} is removed because it exceeds maximum retry times ({})",
                task,
                self.inner.max_retries
            );
            Counters::bump(&self.inner.counters.dropped);
            return;
        }

        task.meta.was_retried = true;
        task.meta.enqueue_time = Some(Utc::now());
        let name = task.to_string();

        match self
            .inner
            .queue
            .enqueue(task, true, EnqueuePosition::Head)
            .await
        {
            Ok(()) => {
                Counters::bump(&self.inner.counters.retried);
                tracing::debug!("Task {} has been rescheduled for retrying", name);
            }
            Err(e) => {
                Counters::bump(&self.inner.counters.dropped);
                tracing::error!("Failed to reschedule task {} for retrying, reason: {}", name, e);
            }
        }
    }

    /// Puts a task that met a shutting-down downloader back at the head
    ///
    /// Not counted as a retry.
    async fn reschedule_task(&self, task: Task) {
        let name = task.to_string();
        match self
            .inner
            .queue
            .enqueue(task, true, EnqueuePosition::Head)
            .await
        {
            Ok(()) => {
                Counters::bump(&self.inner.counters.rescheduled);
                tracing::debug!("Task {} has been rescheduled for state persisting", name);
            }
            Err(e) => {
                Counters::bump(&self.inner.counters.dropped);
                tracing::error!(
                    "Failed to reschedule task {} for state persisting, task may be lost: {}",
                    name,
                    e
                );
            }
        }
    }

    async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.handlers.close();
        tracing::info!(
            "Shutting down with {} tasks in flight",
            self.in_flight()
        );

        let handlers = self.inner.handlers.clone();
        let queue = self.inner.queue.clone();
        tokio::join!(self.inner.downloader.shutdown(), async move {
            handlers.wait().await;
            queue.shutdown().await;
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
