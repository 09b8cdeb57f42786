//! In-process queue backend
//!
//! A deque of entries plus the set of claimed fingerprints, both protected
//! by one mutex so the dedup check and the insertion happen as one step.
//! Nothing is persisted: whatever is still queued at shutdown is gone when
//! the process exits.

use super::{DedupScope, EnqueuePosition, Queue};
use crate::task::Task;
use crate::{QueueError, QueueResult};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// A queued task and whether it holds its fingerprint claim
#[derive(Debug)]
struct Entry {
    task: Task,
    claimed: bool,
}

#[derive(Debug, Default)]
struct State {
    entries: VecDeque<Entry>,
    claimed: HashSet<String>,
}

/// In-process FIFO queue with fingerprint deduplication
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    scope: DedupScope,
}

impl MemoryQueue {
    /// Creates an empty queue with the given dedup scope
    pub fn new(scope: DedupScope) -> Self {
        Self {
            state: Mutex::new(State::default()),
            scope,
        }
    }

    /// Returns the dedup scope of this queue
    pub fn scope(&self) -> DedupScope {
        self.scope
    }

    /// Number of fingerprints currently claimed
    pub fn claimed_fingerprints(&self) -> usize {
        self.lock().claimed.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking holder cannot leave the deque half-updated, so the
        // poisoned state is still consistent.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn enqueue(
        &self,
        task: Task,
        allow_duplication: bool,
        position: EnqueuePosition,
    ) -> QueueResult<()> {
        let mut state = self.lock();

        let claimed = !allow_duplication;
        if claimed {
            let fingerprint = task.fingerprint();
            if state.claimed.contains(&fingerprint) {
                return Err(QueueError::Duplicate { fingerprint });
            }
            state.claimed.insert(fingerprint);
        }

        let entry = Entry { task, claimed };
        match position {
            EnqueuePosition::Head => state.entries.push_front(entry),
            EnqueuePosition::Tail => state.entries.push_back(entry),
        }

        Ok(())
    }

    async fn pop(&self) -> QueueResult<Option<Task>> {
        let mut state = self.lock();

        let Some(entry) = state.entries.pop_front() else {
            return Ok(None);
        };

        if entry.claimed && self.scope == DedupScope::Queued {
            state.claimed.remove(&entry.task.fingerprint());
        }

        Ok(Some(entry.task))
    }

    async fn len(&self) -> QueueResult<usize> {
        Ok(self.lock().entries.len())
    }

    async fn shutdown(&self) {
        let state = self.lock();
        if !state.entries.is_empty() {
            tracing::warn!(
                "Memory queue shut down with {} tasks still queued",
                state.entries.len()
            );
        }
        tracing::debug!(
            "Memory queue held {} fingerprint claims at shutdown",
            state.claimed.len()
        );
    }
}
