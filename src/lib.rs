//! Ripple-Crawl: a concurrent crawl engine
//!
//! This crate implements a job-scheduling crawler: tasks are pulled from a
//! pluggable queue, fetched over HTTP with bounded concurrency, and handed to
//! registered processors that extract items and derive follow-up tasks.

pub mod config;
pub mod downloader;
pub mod engine;
pub mod processor;
pub mod queue;
pub mod task;

use std::time::Duration;
use thiserror::Error;

/// Main error type for Ripple-Crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Errors reported by queue backends
#[derive(Debug, Error)]
pub enum QueueError {
    /// A task with the same fingerprint already holds the dedup claim
    #[error("Duplicated task: {fingerprint}")]
    Duplicate { fingerprint: String },

    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("Task serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue has been shut down")]
    Closed,
}

/// Errors carried in the error slot of a download result
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Request timeout for {url} after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("The downloader is shutting down")]
    ShuttingDown,

    #[error("Invalid request for {url}: {reason}")]
    InvalidRequest { url: String, reason: String },

    #[error("HTTP error for {url}: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error("Download was aborted before producing a result")]
    Aborted,
}

/// Errors raised while assembling or running an engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No queue has been installed")]
    MissingQueue,

    #[error("No downloader has been installed")]
    MissingDownloader,

    #[error("No processor has been installed")]
    NoProcessors,

    #[error("A processor with alias `{0}` has already been added")]
    DuplicateProcessor(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Result type alias for Ripple-Crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

// Re-export commonly used types
pub use config::Config;
pub use downloader::{Downloader, HttpDownloader};
pub use engine::{Engine, EngineBuilder, RunStats};
pub use processor::{ProcessOutput, Processor};
pub use queue::{DedupScope, EnqueuePosition, MemoryQueue, Queue, RedisQueue};
pub use task::{Cookie, DownloadResult, Task, TaskMeta};
