use crate::task::{Cookie, Task};
use crate::DownloadError;
use reqwest::header::HeaderMap;

/// Outcome of one fetch attempt
///
/// A result always carries the task it was produced for. On failure only
/// `error` is meaningful; the response fields stay empty.
#[derive(Debug)]
pub struct DownloadResult {
    /// The originating task, with its download timestamps filled in
    pub task: Task,

    /// HTTP status code, if a response was received
    pub status: Option<u16>,

    /// Full response header set
    pub headers: HeaderMap,

    /// Cookies set by the response
    pub cookies: Vec<Cookie>,

    /// Fully drained response body
    pub body: Vec<u8>,

    /// `None` on success
    pub error: Option<DownloadError>,
}

impl DownloadResult {
    /// Builds a result for a response that was received and drained
    pub fn completed(
        task: Task,
        status: u16,
        headers: HeaderMap,
        cookies: Vec<Cookie>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            task,
            status: Some(status),
            headers,
            cookies,
            body,
            error: None,
        }
    }

    /// Builds a result carrying only an error
    pub fn failed(task: Task, error: DownloadError) -> Self {
        Self {
            task,
            status: None,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            body: Vec::new(),
            error: Some(error),
        }
    }

    /// Returns true for an error-free fetch with a 2xx status
    ///
    /// Non-2xx responses are still routed to processors; this only
    /// classifies them.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && matches!(self.status, Some(200..=299))
    }

    /// Returns the body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Returns the value of a response header, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
