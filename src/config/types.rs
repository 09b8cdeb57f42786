use crate::queue::DedupScope;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Ripple-Crawl
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub request: RequestConfig,
    pub engine: EngineConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Renders this configuration as TOML; see [`super::dump_config`]
    pub fn to_toml(&self) -> Result<String, crate::ConfigError> {
        super::dump_config(self)
    }
}

/// Outbound request behavior
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Value of the `User-Agent` header unless a task overrides it
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Per-request deadline covering the response and the body (milliseconds)
    pub timeout: u64,

    /// Number of retries after the first failed attempt
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Whether redirects are followed (up to 10 hops)
    #[serde(rename = "follow-redirects")]
    pub follow_redirects: bool,

    /// Maximum number of fetches in flight at once
    pub concurrency: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("ripple-crawl/{}", env!("CARGO_PKG_VERSION")),
            timeout: 5000,
            max_retries: 3,
            follow_redirects: true,
            concurrency: 5,
        }
    }
}

impl RequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

/// Scheduling loop behavior
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long the loop waits for in-flight work when the queue is empty (milliseconds)
    #[serde(rename = "idle-interval")]
    pub idle_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_interval: 2000,
        }
    }
}

impl EngineConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval)
    }
}

/// Queue backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueBackend {
    #[default]
    Memory,
    Redis,
}

/// Queue configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,

    #[serde(rename = "dedup-scope")]
    pub dedup_scope: DedupScope,

    /// Connection URL of the Redis backend
    #[serde(rename = "redis-url")]
    pub redis_url: String,

    /// Namespace of the queue inside the Redis store
    #[serde(rename = "queue-id")]
    pub queue_id: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            dedup_scope: DedupScope::Run,
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            queue_id: "default".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive for the tracing filter
    pub level: String,

    /// Whether log lines are written to stderr
    pub console: bool,

    /// File that log lines are appended to, in addition to the console
    #[serde(rename = "file-path", skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            file_path: None,
        }
    }
}

impl LoggingConfig {
    /// Opens the configured log file for appending, creating it if needed
    pub fn open_file(&self) -> Result<Option<File>, crate::ConfigError> {
        let Some(path) = &self.file_path else {
            return Ok(None);
        };

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map(Some)
            .map_err(|e| {
                crate::ConfigError::Validation(format!(
                    "Cannot open log file '{}': {}",
                    path.display(),
                    e
                ))
            })
    }
}
