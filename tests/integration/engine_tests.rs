//! Engine scheduling tests
//!
//! Most tests drive the engine with a scripted downloader so that failures,
//! panics and shutdown races can be produced on demand.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use ripple_crawl::downloader::ResultSink;
use ripple_crawl::{
    Config, DedupScope, DownloadError, DownloadResult, Downloader, Engine, EngineBuilder,
    EngineError, HttpDownloader, MemoryQueue, ProcessOutput, Queue, Task,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// What the scripted downloader does with one attempt
enum Reply {
    Page(&'static str),
    Fail,
    ShuttingDown,
    Panic,
}

/// Downloader whose behavior is a function of the task and attempt number
struct ScriptedDownloader {
    script: Box<dyn Fn(&Task, usize) -> Reply + Send + Sync>,
    seen: Mutex<Vec<Task>>,
    delay: Duration,
}

impl ScriptedDownloader {
    fn new(script: impl Fn(&Task, usize) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    fn always_ok() -> Self {
        Self::new(|_, _| Reply::Page("<html></html>"))
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn seen(&self) -> Vec<Task> {
        self.seen.lock().unwrap().clone()
    }

    fn attempts(&self, url: &str) -> usize {
        self.seen().iter().filter(|t| t.url == url).count()
    }
}

#[async_trait]
impl Downloader for ScriptedDownloader {
    async fn download(&self, task: Task, sink: ResultSink) {
        let attempt = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(task.clone());
            seen.iter().filter(|t| t.url == task.url).count()
        };

        let result = match (self.script)(&task, attempt) {
            Reply::Page(body) => DownloadResult::completed(
                task,
                200,
                HeaderMap::new(),
                vec![],
                body.as_bytes().to_vec(),
            ),
            Reply::Fail => {
                let url = task.url.clone();
                DownloadResult::failed(
                    task,
                    DownloadError::Timeout {
                        url,
                        after: Duration::from_millis(1),
                    },
                )
            }
            Reply::ShuttingDown => DownloadResult::failed(task, DownloadError::ShuttingDown),
            Reply::Panic => panic!("downloader exploded on {}", task.url),
        };

        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sink.send(result);
        });
    }

    async fn shutdown(&self) {}
}

fn builder(queue: Arc<MemoryQueue>, downloader: Arc<dyn Downloader>) -> EngineBuilder {
    Engine::builder(&Config::default())
        .queue(queue)
        .downloader(downloader)
        .idle_interval(Duration::from_millis(10))
}

fn ok(_: &DownloadResult) -> anyhow::Result<ProcessOutput> {
    Ok(ProcessOutput::new())
}

async fn run_to_completion(engine: &Engine) -> ripple_crawl::RunStats {
    tokio::time::timeout(
        Duration::from_secs(10),
        engine.run_until(std::future::pending()),
    )
    .await
    .expect("engine did not drain in time")
}

#[tokio::test]
async fn test_build_requires_components() {
    let config = Config::default();
    let queue = Arc::new(MemoryQueue::default());
    let downloader = Arc::new(ScriptedDownloader::always_ok());

    let missing_queue = Engine::builder(&config)
        .downloader(downloader.clone())
        .processor(&["pages"], ok)
        .build();
    assert!(matches!(missing_queue, Err(EngineError::MissingQueue)));

    let missing_downloader = Engine::builder(&config)
        .queue(queue.clone())
        .processor(&["pages"], ok)
        .build();
    assert!(matches!(missing_downloader, Err(EngineError::MissingDownloader)));

    let no_processors = Engine::builder(&config)
        .queue(queue.clone())
        .downloader(downloader.clone())
        .build();
    assert!(matches!(no_processors, Err(EngineError::NoProcessors)));

    let duplicate = Engine::builder(&config)
        .queue(queue)
        .downloader(downloader)
        .processor(&["pages"], ok)
        .processor(&["other", "pages"], ok)
        .build();
    assert!(matches!(duplicate, Err(EngineError::DuplicateProcessor(ref alias)) if alias == "pages"));
}

#[tokio::test]
async fn test_task_with_unknown_processor_is_skipped() {
    let queue = Arc::new(MemoryQueue::default());
    let engine = builder(queue.clone(), Arc::new(ScriptedDownloader::always_ok()))
        .processor(&["pages"], ok)
        .build()
        .unwrap();

    assert!(!engine.add_task(&Task::get("https://example.com/", "nobody")).await);
    assert!(engine.add_task(&Task::get("https://example.com/", "pages")).await);
    assert_eq!(queue.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_add_tasks_counts_duplicates_out() {
    let queue = Arc::new(MemoryQueue::default());
    let engine = builder(queue.clone(), Arc::new(ScriptedDownloader::always_ok()))
        .processor(&["pages"], ok)
        .build()
        .unwrap();

    let tasks = vec![
        Task::get("https://example.com/a", "pages"),
        Task::get("https://example.com/a", "pages"),
        Task::get("https://example.com/a", "pages").allow_duplicates(),
        Task::get("https://example.com/b", "pages"),
    ];

    assert_eq!(engine.add_tasks(&tasks).await, 3);
    assert_eq!(queue.len().await.unwrap(), 3);

    let first = queue.pop().await.unwrap().unwrap();
    assert!(first.meta.enqueue_time.is_some());
}

#[tokio::test]
async fn test_successful_run_drains_queue() {
    let queue = Arc::new(MemoryQueue::default());
    let downloader = Arc::new(ScriptedDownloader::always_ok());
    let processed = Arc::new(AtomicUsize::new(0));

    let counter = processed.clone();
    let engine = builder(queue.clone(), downloader.clone())
        .processor(
            &["pages"],
            move |_: &DownloadResult| -> anyhow::Result<ProcessOutput> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ProcessOutput::new())
            },
        )
        .build()
        .unwrap();

    for i in 0..5 {
        engine
            .add_task(&Task::get(format!("https://example.com/{}", i), "pages"))
            .await;
    }

    let stats = run_to_completion(&engine).await;

    assert_eq!(processed.load(Ordering::SeqCst), 5);
    assert_eq!(stats.dispatched, 5);
    assert_eq!(stats.succeeded, 5);
    assert_eq!(stats.retried, 0);
    assert_eq!(engine.in_flight(), 0);
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let queue = Arc::new(MemoryQueue::default());
    let downloader = Arc::new(ScriptedDownloader::new(|_, _| Reply::Fail));
    let engine = builder(queue.clone(), downloader.clone())
        .processor(&["pages"], ok)
        .max_retries(2)
        .build()
        .unwrap();

    engine
        .add_task(&Task::get("https://example.com/down", "pages"))
        .await;
    let stats = run_to_completion(&engine).await;

    let attempts = downloader.seen();
    assert_eq!(attempts.len(), 3);
    let retry_counts: Vec<u32> = attempts.iter().map(|t| t.meta.retry_count).collect();
    assert_eq!(retry_counts, vec![0, 1, 2]);
    assert!(!attempts[0].meta.was_retried);
    assert!(attempts[1].meta.was_retried);

    assert_eq!(stats.download_failures, 3);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.dropped, 1);
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_processor_failure_retries_unless_suppressed() {
    let queue = Arc::new(MemoryQueue::default());
    let downloader = Arc::new(ScriptedDownloader::always_ok());
    let engine = builder(queue.clone(), downloader.clone())
        .processor(
            &["broken"],
            |_: &DownloadResult| -> anyhow::Result<ProcessOutput> {
                anyhow::bail!("unexpected markup")
            },
        )
        .max_retries(1)
        .build()
        .unwrap();

    engine
        .add_tasks(&[
            Task::get("https://example.com/retry", "broken"),
            Task::get("https://example.com/once", "broken").no_retry_on_processor_failure(),
        ])
        .await;
    let stats = run_to_completion(&engine).await;

    assert_eq!(downloader.attempts("https://example.com/retry"), 2);
    assert_eq!(downloader.attempts("https://example.com/once"), 1);
    assert_eq!(stats.processor_failures, 3);
    assert_eq!(stats.dropped, 2);
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_processor_panic_becomes_retry() {
    let queue = Arc::new(MemoryQueue::default());
    let downloader = Arc::new(ScriptedDownloader::always_ok());
    let panicked = Arc::new(AtomicBool::new(false));

    let flag = panicked.clone();
    let engine = builder(queue, downloader.clone())
        .processor(
            &["pages"],
            move |_: &DownloadResult| -> anyhow::Result<ProcessOutput> {
                if !flag.swap(true, Ordering::SeqCst) {
                    panic!("processor exploded");
                }
                Ok(ProcessOutput::new())
            },
        )
        .build()
        .unwrap();

    engine
        .add_task(&Task::get("https://example.com/", "pages"))
        .await;
    let stats = run_to_completion(&engine).await;

    assert_eq!(stats.processor_failures, 1);
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(downloader.attempts("https://example.com/"), 2);
}

#[tokio::test]
async fn test_downloader_panic_becomes_retry() {
    let queue = Arc::new(MemoryQueue::default());
    let downloader = Arc::new(ScriptedDownloader::new(|_, attempt| {
        if attempt == 1 {
            Reply::Panic
        } else {
            Reply::Page("")
        }
    }));
    let engine = builder(queue, downloader.clone())
        .processor(&["pages"], ok)
        .build()
        .unwrap();

    engine
        .add_task(&Task::get("https://example.com/", "pages"))
        .await;
    let stats = run_to_completion(&engine).await;

    assert_eq!(stats.download_failures, 1);
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(engine.in_flight(), 0);
}

#[tokio::test]
async fn test_shutting_down_result_is_rescheduled_not_retried() {
    let queue = Arc::new(MemoryQueue::default());
    let downloader = Arc::new(ScriptedDownloader::new(|_, attempt| {
        if attempt == 1 {
            Reply::ShuttingDown
        } else {
            Reply::Page("")
        }
    }));
    let engine = builder(queue, downloader.clone())
        .processor(&["pages"], ok)
        .max_retries(0)
        .build()
        .unwrap();

    engine
        .add_task(&Task::get("https://example.com/", "pages"))
        .await;
    let stats = run_to_completion(&engine).await;

    assert_eq!(stats.rescheduled, 1);
    assert_eq!(stats.retried, 0);
    assert_eq!(stats.succeeded, 1);

    let second = &downloader.seen()[1];
    assert_eq!(second.meta.retry_count, 0);
    assert!(!second.meta.was_retried);
}

#[tokio::test]
async fn test_follow_up_tasks_are_deduplicated() {
    let queue = Arc::new(MemoryQueue::new(DedupScope::Run));
    let downloader = Arc::new(ScriptedDownloader::always_ok());
    let engine = builder(queue.clone(), downloader.clone())
        .processor(
            &["links"],
            |result: &DownloadResult| -> anyhow::Result<ProcessOutput> {
                let next = match result.task.url.as_str() {
                    "https://example.com/" => vec!["/a", "/b", "/a"],
                    _ => vec!["/"],
                };
                Ok(next.into_iter().fold(ProcessOutput::new(), |out, p| {
                    out.with_task(Task::get(
                        format!("https://example.com{}", p),
                        "links",
                    ))
                }))
            },
        )
        .build()
        .unwrap();

    engine
        .add_task(&Task::get("https://example.com/", "links"))
        .await;
    let stats = run_to_completion(&engine).await;

    assert_eq!(stats.dispatched, 3);
    assert_eq!(downloader.attempts("https://example.com/"), 1);
    assert_eq!(downloader.attempts("https://example.com/a"), 1);
    assert_eq!(downloader.attempts("https://example.com/b"), 1);
    assert_eq!(queue.claimed_fingerprints(), 3);
}

#[tokio::test]
async fn test_link_cycle_terminates_with_default_config() {
    let config = Config::default();
    let queue = Arc::new(MemoryQueue::new(config.queue.dedup_scope));
    let downloader = Arc::new(ScriptedDownloader::always_ok());
    let engine = Engine::builder(&config)
        .queue(queue.clone())
        .downloader(downloader.clone())
        .processor(
            &["links"],
            |result: &DownloadResult| -> anyhow::Result<ProcessOutput> {
                let next = if result.task.url == "https://example.com/" {
                    "https://example.com/a"
                } else {
                    "https://example.com/"
                };
                Ok(ProcessOutput::new().with_task(Task::get(next, "links")))
            },
        )
        .idle_interval(Duration::from_millis(10))
        .build()
        .unwrap();

    engine
        .add_task(&Task::get("https://example.com/", "links"))
        .await;
    let stats = tokio::time::timeout(
        Duration::from_secs(2),
        engine.run_until(std::future::pending()),
    )
    .await
    .expect("link cycle kept the engine running");

    assert_eq!(stats.dispatched, 2);
    assert_eq!(downloader.attempts("https://example.com/"), 1);
    assert_eq!(downloader.attempts("https://example.com/a"), 1);
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_items_are_forwarded_to_sink() {
    let queue = Arc::new(MemoryQueue::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = builder(queue, Arc::new(ScriptedDownloader::always_ok()))
        .processor(
            &["pages"],
            |result: &DownloadResult| -> anyhow::Result<ProcessOutput> {
                Ok(ProcessOutput::new().with_item(json!({ "url": result.task.url })))
            },
        )
        .item_sink(tx)
        .build()
        .unwrap();

    engine
        .add_tasks(&[
            Task::get("https://example.com/1", "pages"),
            Task::get("https://example.com/2", "pages"),
        ])
        .await;
    run_to_completion(&engine).await;
    drop(engine);

    let mut urls = Vec::new();
    while let Some(item) = rx.recv().await {
        urls.push(item["url"].as_str().unwrap().to_string());
    }
    urls.sort();
    assert_eq!(urls, vec!["https://example.com/1", "https://example.com/2"]);
}

#[tokio::test]
async fn test_shutdown_handle_drains_in_flight_results() {
    let queue = Arc::new(MemoryQueue::default());
    let downloader =
        Arc::new(ScriptedDownloader::always_ok().with_delay(Duration::from_millis(300)));
    let engine = builder(queue, downloader)
        .processor(&["pages"], ok)
        .idle_interval(Duration::from_secs(60))
        .build()
        .unwrap();

    engine
        .add_task(&Task::get("https://example.com/", "pages"))
        .await;

    let handle = engine.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let stats = run_to_completion(&engine).await;

    assert!(engine.is_shutting_down());
    // The in-flight result is still handled before the run returns.
    assert_eq!(stats.succeeded, 1);
    assert_eq!(engine.in_flight(), 0);
}

#[tokio::test]
async fn test_signal_leaves_every_task_processed_or_queued() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.request.concurrency = 2;
    config.request.timeout = 5000;

    let queue = Arc::new(MemoryQueue::default());
    let processed = Arc::new(AtomicUsize::new(0));
    let counter = processed.clone();
    let engine = Engine::builder(&config)
        .queue(queue.clone())
        .downloader(Arc::new(HttpDownloader::new(&config.request).unwrap()))
        .processor(
            &["pages"],
            move |_: &DownloadResult| -> anyhow::Result<ProcessOutput> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ProcessOutput::new())
            },
        )
        .idle_interval(Duration::from_millis(10))
        .build()
        .unwrap();

    let total = 6;
    for i in 0..total {
        engine
            .add_task(&Task::get(format!("{}/slow?n={}", server.uri(), i), "pages"))
            .await;
    }

    let stats = tokio::time::timeout(
        Duration::from_secs(10),
        engine.run_until(tokio::time::sleep(Duration::from_millis(100))),
    )
    .await
    .expect("engine did not stop in time");

    let left = queue.len().await.unwrap();
    let done = processed.load(Ordering::SeqCst);
    assert_eq!(done + left, total);
    assert!(done >= 2, "in-flight fetches were not drained");
    assert!(left >= 1, "shutdown did not stop dispatching");
    assert_eq!(stats.dropped, 0);
}
