//! HTTP downloader implementation
//!
//! This module handles all outbound requests of the engine:
//! - Building the HTTP client from request configuration
//! - Translating a task into a request (method, headers, cookies, body)
//! - Bounding concurrent fetches with a semaphore
//! - Enforcing the request deadline over the response and the body
//! - Capturing status, headers, cookies and the drained body

use super::{Downloader, ResultSink};
use crate::config::RequestConfig;
use crate::task::{Cookie, DownloadResult, Task};
use crate::DownloadError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, USER_AGENT};
use reqwest::{redirect::Policy, Client, Method, Request};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

/// Maximum redirect hops when redirects are followed
const MAX_REDIRECTS: usize = 10;

/// Builds an HTTP client with proper configuration
///
/// The user agent is not installed on the client: it is set per request so
/// that a task can override it.
///
/// # Arguments
///
/// * `config` - The request configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &RequestConfig) -> Result<Client, reqwest::Error> {
    let redirect = if config.follow_redirects {
        Policy::limited(MAX_REDIRECTS)
    } else {
        Policy::none()
    };

    Client::builder()
        .connect_timeout(config.timeout())
        .redirect(redirect)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Downloader performing fetches with reqwest
///
/// Concurrency is bounded by a semaphore sized to the configured limit. A
/// permit is held from the moment a fetch is admitted until its result has
/// been delivered.
///
/// When the deadline passes first, the in-progress request future is dropped,
/// which cancels the underlying connection, and a `Timeout` result is
/// delivered in its place.
pub struct HttpDownloader {
    client: Client,
    user_agent: HeaderValue,
    timeout: Duration,
    concurrency: usize,
    permits: Arc<Semaphore>,
    shutting_down: AtomicBool,
}

impl HttpDownloader {
    /// Creates a downloader from request configuration
    pub fn new(config: &RequestConfig) -> Result<Self, crate::CrawlError> {
        let client = build_http_client(config)?;
        Self::with_client(client, config)
    }

    /// Creates a downloader around an existing client
    pub fn with_client(client: Client, config: &RequestConfig) -> Result<Self, crate::CrawlError> {
        let user_agent = HeaderValue::from_str(&config.user_agent).map_err(|e| {
            crate::ConfigError::Validation(format!("Invalid user-agent: {}", e))
        })?;
        let concurrency = config.concurrency.max(1);

        Ok(Self {
            client,
            user_agent,
            timeout: config.timeout(),
            concurrency,
            permits: Arc::new(Semaphore::new(concurrency)),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Configured concurrency limit
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Number of fetches currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.concurrency
            .saturating_sub(self.permits.available_permits())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, task: Task, sink: ResultSink) {
        if self.is_shutting_down() {
            let _ = sink.send(DownloadResult::failed(task, DownloadError::ShuttingDown));
            return;
        }

        // A closed semaphore means shutdown completed while we were waiting.
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let _ = sink.send(DownloadResult::failed(task, DownloadError::ShuttingDown));
                return;
            }
        };

        let client = self.client.clone();
        let user_agent = self.user_agent.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let result = fetch(&client, &user_agent, timeout, task).await;
            if sink.send(result).is_err() {
                tracing::debug!("Result receiver dropped before delivery");
            }
            drop(permit);
        });
    }

    async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let all = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        tracing::debug!("Waiting for {} in-flight downloads to finish", self.in_flight());
        match self.permits.acquire_many(all).await {
            Ok(_all_permits) => {
                self.permits.close();
                tracing::info!("Downloader stopped");
            }
            Err(_) => tracing::debug!("Downloader was already stopped"),
        }
    }
}

/// Response parts captured before the body is drained
struct Captured {
    status: u16,
    headers: HeaderMap,
    cookies: Vec<Cookie>,
    body: Vec<u8>,
}

/// Runs one fetch attempt under the deadline and builds its result
async fn fetch(
    client: &Client,
    user_agent: &HeaderValue,
    timeout: Duration,
    mut task: Task,
) -> DownloadResult {
    task.meta.download_start_time = Some(Utc::now());
    task.meta.download_finish_time = None;

    let request = match build_request(client, user_agent, &task) {
        Ok(request) => request,
        Err(e) => {
            task.meta.download_finish_time = Some(Utc::now());
            return DownloadResult::failed(task, e);
        }
    };

    tracing::trace!("Fetching {}", task);
    let outcome = tokio::time::timeout(timeout, execute(client, request)).await;
    task.meta.download_finish_time = Some(Utc::now());

    match outcome {
        Ok(Ok(captured)) => DownloadResult::completed(
            task,
            captured.status,
            captured.headers,
            captured.cookies,
            captured.body,
        ),
        Ok(Err(source)) => {
            let url = task.url.clone();
            DownloadResult::failed(task, DownloadError::Request { url, source })
        }
        Err(_) => {
            let url = task.url.clone();
            DownloadResult::failed(task, DownloadError::Timeout { url, after: timeout })
        }
    }
}

/// Sends the request and drains the full response
async fn execute(client: &Client, request: Request) -> Result<Captured, reqwest::Error> {
    let response = client.execute(request).await?;

    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let cookies = response
        .cookies()
        .map(|c| Cookie {
            name: c.name().to_string(),
            value: c.value().to_string(),
            domain: c.domain().map(str::to_string),
            path: c.path().map(str::to_string),
        })
        .collect();
    let body = response.bytes().await?.to_vec();

    Ok(Captured {
        status,
        headers,
        cookies,
        body,
    })
}

/// Translates a task into a request
///
/// The configured user agent is always set first; the first task header
/// named `User-Agent` replaces it. Cookies are joined into one `Cookie`
/// header.
fn build_request(
    client: &Client,
    user_agent: &HeaderValue,
    task: &Task,
) -> Result<Request, DownloadError> {
    let invalid = |reason: String| DownloadError::InvalidRequest {
        url: task.url.clone(),
        reason,
    };

    let method = Method::from_bytes(task.method.to_uppercase().as_bytes())
        .map_err(|e| invalid(format!("invalid method '{}': {}", task.method, e)))?;
    let url = Url::parse(&task.url).map_err(|e| invalid(e.to_string()))?;

    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, user_agent.clone());

    let mut user_agent_overridden = false;
    for (name, value) in &task.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| invalid(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| invalid(format!("invalid value for header '{}': {}", name, e)))?;

        if name == USER_AGENT && !user_agent_overridden {
            headers.insert(name, value);
            user_agent_overridden = true;
        } else {
            headers.append(name, value);
        }
    }

    if !task.cookies.is_empty() {
        let joined = task
            .cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        let value = HeaderValue::from_str(&joined)
            .map_err(|e| invalid(format!("invalid cookie: {}", e)))?;
        headers.append(COOKIE, value);
    }

    let mut builder = client.request(method, url).headers(headers);
    if let Some(body) = &task.body {
        builder = builder.body(body.clone());
    }

    builder.build().map_err(|source| DownloadError::Request {
        url: task.url.clone(),
        source,
    })
}
