//! Redis queue backend
//!
//! Queue order lives in a Redis list of numeric ids; each task payload is a
//! hash stored under `{ripple:<id>}:task:<n>`. Enqueue and pop are Lua
//! scripts, so the dedup claim, the id increment, the payload write and the
//! list push (or the list pop, payload read and payload delete) are each a
//! single atomic step against the store. The engine process holds no lock.
//!
//! Dedup markers (`{ripple:<id>}:dup:<fingerprint>`) never expire. A consumer
//! that crashes after `pop` loses the task. Ids whose payload hash is missing
//! are dropped by `pop`, which moves on to the next id and logs the count.

use super::{DedupScope, EnqueuePosition, Queue};
use crate::task::Task;
use crate::{QueueError, QueueResult};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::sync::{Mutex, MutexGuard};

/// Lua scripts, compiled once per queue
#[derive(Debug)]
struct Scripts {
    enqueue: Script,
    pop: Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            enqueue: Script::new(include_str!("../../scripts/enqueue.lua")),
            pop: Script::new(include_str!("../../scripts/pop.lua")),
        }
    }
}

/// Key layout of one queue namespace
#[derive(Debug, Clone, PartialEq, Eq)]
struct RedisKeys {
    counter: String,
    queue: String,
    task_prefix: String,
    dedup_prefix: String,
}

impl RedisKeys {
    fn new(queue_id: &str) -> Self {
        // The hash tag keeps every key of a queue in the same cluster slot.
        let namespace = format!("{{ripple:{}}}", queue_id);
        Self {
            counter: format!("{}:counter", namespace),
            queue: format!("{}:queue", namespace),
            task_prefix: format!("{}:task:", namespace),
            dedup_prefix: format!("{}:dup:", namespace),
        }
    }

    fn dedup(&self, fingerprint: &str) -> String {
        format!("{}{}", self.dedup_prefix, fingerprint)
    }
}


fn encode_task(task: &Task) -> QueueResult<String> {
    Ok(serde_json::to_string(task)?)
}

fn decode_task(payload: &str) -> QueueResult<Task> {
    Ok(serde_json::from_str(payload)?)
}

/// Queue stored in a shared Redis instance
pub struct RedisQueue {
    id: String,
    keys: RedisKeys,
    scope: DedupScope,
    scripts: Scripts,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisQueue {
    /// Connects to Redis and opens the queue namespace `queue_id`
    ///
    /// Several queues can share one store as long as their ids differ.
    pub async fn connect(url: &str, queue_id: &str, scope: DedupScope) -> QueueResult<Self> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        tracing::info!("Connected to Redis queue `{}` at {}", queue_id, url);

        Ok(Self {
            id: queue_id.to_string(),
            keys: RedisKeys::new(queue_id),
            scope,
            scripts: Scripts::new(),
            connection: Mutex::new(Some(connection)),
        })
    }

    /// Returns the queue id (namespace) of this queue
    pub fn id(&self) -> &str {
        &self.id
    }

    fn slot(&self) -> MutexGuard<'_, Option<MultiplexedConnection>> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn connection(&self) -> QueueResult<MultiplexedConnection> {
        self.slot().clone().ok_or(QueueError::Closed)
    }
}

#[async_trait]
impl Queue for RedisQueue {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn enqueue(
        &self,
        task: Task,
        allow_duplication: bool,
        position: EnqueuePosition,
    ) -> QueueResult<()> {
        let mut conn = self.connection()?;
        let fingerprint = task.fingerprint();
        let payload = encode_task(&task)?;
        let claim = if allow_duplication { "0" } else { "1" };

        let queued: i64 = self
            .scripts
            .enqueue
            .key(&self.keys.counter)
            .key(&self.keys.queue)
            .key(self.keys.dedup(&fingerprint))
            .arg(&self.keys.task_prefix)
            .arg(position.as_str())
            .arg(payload)
            .arg(&self.id)
            .arg(claim)
            .invoke_async(&mut conn)
            .await?;

        if queued == 0 {
            return Err(QueueError::Duplicate { fingerprint });
        }
        Ok(())
    }

    async fn pop(&self) -> QueueResult<Option<Task>> {
        let mut conn = self.connection()?;
        let release = if self.scope == DedupScope::Queued {
            "1"
        } else {
            "0"
        };

        let (payload, skipped): (Option<String>, u64) = self
            .scripts
            .pop
            .key(&self.keys.queue)
            .arg(&self.keys.task_prefix)
            .arg(release)
            .invoke_async(&mut conn)
            .await?;

        if skipped > 0 {
            tracing::error!(
                "Redis queue `{}` is corrupt: dropped {} id(s) without a task payload",
                self.id,
                skipped
            );
        }

        payload.as_deref().map(decode_task).transpose()
    }

    async fn len(&self) -> QueueResult<usize> {
        let mut conn = self.connection()?;
        let len: usize = conn.llen(&self.keys.queue).await?;
        Ok(len)
    }

    async fn shutdown(&self) {
        if self.slot().take().is_some() {
            tracing::info!("Closed Redis connection of queue `{}`", self.id);
        } else {
            tracing::warn!("Redis queue `{}` was already shut down", self.id);
        }
    }
}
