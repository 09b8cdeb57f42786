use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of one engine run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Tasks handed to the downloader
    pub dispatched: u64,
    /// Results accepted by their processor
    pub succeeded: u64,
    /// Failed downloads (timeouts, transport errors, aborted fetches)
    pub download_failures: u64,
    /// Processor errors and panics
    pub processor_failures: u64,
    /// Tasks put back at the head by the retry policy
    pub retried: u64,
    /// Tasks put back at the head because shutdown raced their dispatch
    pub rescheduled: u64,
    /// Tasks removed for good
    pub dropped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub dispatched: AtomicU64,
    pub succeeded: AtomicU64,
    pub download_failures: AtomicU64,
    pub processor_failures: AtomicU64,
    pub retried: AtomicU64,
    pub rescheduled: AtomicU64,
    pub dropped: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunStats {
        RunStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            download_failures: self.download_failures.load(Ordering::Relaxed),
            processor_failures: self.processor_failures.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            rescheduled: self.rescheduled.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
