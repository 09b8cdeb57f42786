//! Downloader module
//!
//! A downloader executes the network fetch of one task under a concurrency
//! bound and a deadline, and delivers exactly one [`DownloadResult`] per
//! submitted task to the sink it was given.

mod http;

pub use http::{build_http_client, HttpDownloader};

use crate::task::{DownloadResult, Task};
use async_trait::async_trait;
use tokio::sync::oneshot;

/// Where a downloader delivers the result of one task
pub type ResultSink = oneshot::Sender<DownloadResult>;

/// Capability interface of a downloader
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Submits a task for fetching
    ///
    /// Waits only for a concurrency permit, then returns while the fetch
    /// runs in the background. Once shutdown has begun, a `ShuttingDown`
    /// result is delivered immediately without taking a permit.
    async fn download(&self, task: Task, sink: ResultSink);

    /// Stops accepting work and waits until every permitted fetch has
    /// delivered its result
    async fn shutdown(&self);
}
