//! Task model
//!
//! A task describes one network fetch plus the routing metadata the engine
//! needs to hand its result to the right processor. The request part is set
//! once by whoever creates the task; the `meta` record is updated by the
//! engine and the downloader as the task moves through its lifecycle.

mod result;

pub use result::DownloadResult;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A cookie attached to a request or captured from a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Cookie {
    /// Creates a name/value cookie with no domain or path
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
        }
    }
}

/// Lifecycle record of a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    /// When the task was last accepted by the queue
    pub enqueue_time: Option<DateTime<Utc>>,

    /// When the most recent download attempt started
    pub download_start_time: Option<DateTime<Utc>>,

    /// When the most recent download attempt finished
    pub download_finish_time: Option<DateTime<Utc>>,

    /// Number of retries scheduled so far
    pub retry_count: u32,

    /// Whether the task has been rescheduled by the retry policy
    pub was_retried: bool,
}

/// A unit of schedulable work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Request target
    pub url: String,

    /// Request verb, e.g. `GET`
    pub method: String,

    /// Request headers in submission order
    #[serde(default)]
    pub headers: Vec<(String, String)>,

    /// Request cookies
    #[serde(default)]
    pub cookies: Vec<Cookie>,

    /// Request body
    #[serde(default)]
    pub body: Option<Vec<u8>>,

    /// Key of the processor that handles the result
    pub processor_key: String,

    /// When false, the queue suppresses tasks whose fingerprint is already claimed
    #[serde(default)]
    pub allow_duplication: bool,

    /// When true, a processor failure drops the task instead of retrying it
    #[serde(default)]
    pub suppress_retry_on_processor_failure: bool,

    #[serde(default)]
    pub meta: TaskMeta,
}

impl Task {
    /// Creates a task for the given verb, URL and processor key
    pub fn new(
        method: impl Into<String>,
        url: impl Into<String>,
        processor_key: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: Vec::new(),
            cookies: Vec::new(),
            body: None,
            processor_key: processor_key.into(),
            allow_duplication: false,
            suppress_retry_on_processor_failure: false,
            meta: TaskMeta::default(),
        }
    }

    /// Creates a `GET` task
    pub fn get(url: impl Into<String>, processor_key: impl Into<String>) -> Self {
        Self::new("GET", url, processor_key)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Lets this task bypass fingerprint deduplication
    pub fn allow_duplicates(mut self) -> Self {
        self.allow_duplication = true;
        self
    }

    /// Drops the task when its processor fails instead of retrying it
    pub fn no_retry_on_processor_failure(mut self) -> Self {
        self.suppress_retry_on_processor_failure = true;
        self
    }

    /// Returns the dedup key of this task: `method|url|processor_key`
    ///
    /// # Example
    ///
    /// ```
    /// use ripple_crawl::Task;
    ///
    /// let task = Task::get("https://example.com/", "pages");
    /// assert_eq!(task.fingerprint(), "GET|https://example.com/|pages");
    /// ```
    pub fn fingerprint(&self) -> String {
        format!("{}|{}|{}", self.method, self.url, self.processor_key)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method.to_uppercase(), self.url)
    }
}
