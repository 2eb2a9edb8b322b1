use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::queue::task::{QueueStats, ScrapeTask};

/// Durable backing store for the task queue.
///
/// A task moves `pending -> active -> completed | failed`, with a side trip
/// through `delayed` while it waits out a retry backoff. Task ids are the
/// dedup key: a second push of a known id is a no-op.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Enqueue a task; returns false when the id is already known
    async fn push(&self, task: &ScrapeTask) -> Result<bool>;

    /// Claim the best pending task (lowest priority value, then submission
    /// order) and mark it active
    async fn pop(&self) -> Result<Option<ScrapeTask>>;

    /// Park an active task until `ready_at`, persisting its attempt count
    async fn delay(&self, task: &ScrapeTask, ready_at: DateTime<Utc>) -> Result<()>;

    /// Move delayed tasks whose time has come back to pending
    async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize>;

    async fn complete(&self, id: &str) -> Result<()>;

    async fn fail(&self, id: &str, error: &str) -> Result<()>;

    async fn stats(&self) -> Result<QueueStats>;

    /// Discard every pending and completed record
    async fn clear(&self) -> Result<()>;
}

/// In-memory store for tests and single-process runs
pub struct MemoryTaskStore {
    inner: std::sync::Mutex<MemoryInner>,
}

struct MemoryInner {
    known: HashSet<String>,
    pending: BTreeMap<(i32, u64), ScrapeTask>,
    seq: u64,
    active: HashSet<String>,
    delayed: Vec<(DateTime<Utc>, ScrapeTask)>,
    completed: HashSet<String>,
    failed: HashMap<String, String>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(MemoryInner {
                known: HashSet::new(),
                pending: BTreeMap::new(),
                seq: 0,
                active: HashSet::new(),
                delayed: Vec::new(),
                completed: HashSet::new(),
                failed: HashMap::new(),
            }),
        }
    }

    /// Final error recorded for a failed task
    pub fn error_of(&self, id: &str) -> Option<String> {
        self.lock().failed.get(id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn push(&self, task: &ScrapeTask) -> Result<bool> {
        let mut inner = self.lock();
        if !inner.known.insert(task.id.clone()) {
            return Ok(false);
        }
        inner.seq += 1;
        let key = (task.priority, inner.seq);
        inner.pending.insert(key, task.clone());
        Ok(true)
    }

    async fn pop(&self) -> Result<Option<ScrapeTask>> {
        let mut inner = self.lock();
        match inner.pending.pop_first() {
            Some((_, task)) => {
                inner.active.insert(task.id.clone());
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    async fn delay(&self, task: &ScrapeTask, ready_at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock();
        inner.active.remove(&task.id);
        inner.delayed.push((ready_at, task.clone()));
        Ok(())
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.lock();

        let mut due = Vec::new();
        let mut waiting = Vec::new();
        for (ready_at, task) in inner.delayed.drain(..) {
            if ready_at <= now {
                due.push(task);
            } else {
                waiting.push((ready_at, task));
            }
        }
        inner.delayed = waiting;

        let promoted = due.len();
        for task in due {
            inner.seq += 1;
            let key = (task.priority, inner.seq);
            inner.pending.insert(key, task);
        }
        Ok(promoted)
    }

    async fn complete(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.active.remove(id);
        inner.completed.insert(id.to_string());
        Ok(())
    }

    async fn fail(&self, id: &str, error: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.active.remove(id);
        inner.failed.insert(id.to_string(), error.to_string());
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let inner = self.lock();
        Ok(QueueStats {
            waiting: inner.pending.len(),
            active: inner.active.len(),
            completed: inner.completed.len(),
            failed: inner.failed.len(),
            delayed: inner.delayed.len(),
        })
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.known.clear();
        inner.pending.clear();
        inner.active.clear();
        inner.delayed.clear();
        inner.completed.clear();
        inner.failed.clear();
        Ok(())
    }
}

/// Scale separating priority from submission order in pending-set scores
const PRIORITY_SCALE: f64 = 1e9;

/// Redis-backed store so submissions survive process restarts and can be
/// drained by workers in other processes
pub struct RedisTaskStore {
    prefix: String,
    conn: Arc<tokio::sync::Mutex<MultiplexedConnection>>,
}

impl RedisTaskStore {
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self> {
        let client = Client::open(redis_url.to_string())
            .context(format!("Failed to connect to Redis at {}", redis_url))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to get Redis connection")?;

        Ok(Self {
            prefix: prefix.to_string(),
            conn: Arc::new(tokio::sync::Mutex::new(conn)),
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn push(&self, task: &ScrapeTask) -> Result<bool> {
        let task_json = serde_json::to_string(task).context("Failed to serialize task")?;
        let mut conn = self.conn.lock().await;

        let known: bool = redis::cmd("HEXISTS")
            .arg(self.key("tasks"))
            .arg(&task.id)
            .query_async(&mut *conn)
            .await
            .context("Failed to check task id")?;
        if known {
            debug!("Skipping duplicate task id: {}", task.id);
            return Ok(false);
        }

        redis::cmd("HSET")
            .arg(self.key("tasks"))
            .arg(&task.id)
            .arg(&task_json)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to store task payload")?;

        let seq: i64 = redis::cmd("INCR")
            .arg(self.key("seq"))
            .query_async(&mut *conn)
            .await
            .context("Failed to advance task sequence")?;

        let score = task.priority as f64 * PRIORITY_SCALE + seq as f64;
        redis::cmd("ZADD")
            .arg(self.key("pending"))
            .arg(score)
            .arg(&task.id)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to push task to pending set")?;

        debug!("Pushed task to queue: {}", task.id);
        Ok(true)
    }

    async fn pop(&self) -> Result<Option<ScrapeTask>> {
        let mut conn = self.conn.lock().await;

        let popped: Vec<(String, f64)> = redis::cmd("ZPOPMIN")
            .arg(self.key("pending"))
            .arg(1)
            .query_async(&mut *conn)
            .await
            .context("Failed to pop from pending set")?;

        let Some((id, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };

        let task_json: Option<String> = redis::cmd("HGET")
            .arg(self.key("tasks"))
            .arg(&id)
            .query_async(&mut *conn)
            .await
            .context("Failed to load task payload")?;

        let Some(task_json) = task_json else {
            warn!("Pending task {} has no payload, dropping", id);
            return Ok(None);
        };

        redis::cmd("SADD")
            .arg(self.key("active"))
            .arg(&id)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to mark task active")?;

        let task: ScrapeTask =
            serde_json::from_str(&task_json).context("Failed to deserialize task")?;
        Ok(Some(task))
    }

    async fn delay(&self, task: &ScrapeTask, ready_at: DateTime<Utc>) -> Result<()> {
        let task_json = serde_json::to_string(task).context("Failed to serialize task")?;
        let mut conn = self.conn.lock().await;

        redis::cmd("SREM")
            .arg(self.key("active"))
            .arg(&task.id)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to unmark active task")?;

        // Persist the updated attempt count alongside the parked task
        redis::cmd("HSET")
            .arg(self.key("tasks"))
            .arg(&task.id)
            .arg(&task_json)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to update task payload")?;

        redis::cmd("ZADD")
            .arg(self.key("delayed"))
            .arg(ready_at.timestamp_millis() as f64)
            .arg(&task.id)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to park task in delayed set")?;

        Ok(())
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn.lock().await;

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.key("delayed"))
            .arg("-inf")
            .arg(now.timestamp_millis() as f64)
            .query_async(&mut *conn)
            .await
            .context("Failed to read delayed set")?;

        for id in &due {
            redis::cmd("ZREM")
                .arg(self.key("delayed"))
                .arg(id)
                .query_async::<_, ()>(&mut *conn)
                .await
                .context("Failed to remove task from delayed set")?;

            let task_json: Option<String> = redis::cmd("HGET")
                .arg(self.key("tasks"))
                .arg(id)
                .query_async(&mut *conn)
                .await
                .context("Failed to load delayed task payload")?;
            let priority = task_json
                .as_deref()
                .and_then(|json| serde_json::from_str::<ScrapeTask>(json).ok())
                .map(|t| t.priority)
                .unwrap_or(crate::queue::task::DEFAULT_PRIORITY);

            let seq: i64 = redis::cmd("INCR")
                .arg(self.key("seq"))
                .query_async(&mut *conn)
                .await
                .context("Failed to advance task sequence")?;

            let score = priority as f64 * PRIORITY_SCALE + seq as f64;
            redis::cmd("ZADD")
                .arg(self.key("pending"))
                .arg(score)
                .arg(id)
                .query_async::<_, ()>(&mut *conn)
                .await
                .context("Failed to requeue delayed task")?;
        }

        Ok(due.len())
    }

    async fn complete(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;

        redis::cmd("SREM")
            .arg(self.key("active"))
            .arg(id)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to unmark active task")?;

        redis::cmd("SADD")
            .arg(self.key("completed"))
            .arg(id)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to mark task completed")?;

        redis::cmd("HDEL")
            .arg(self.key("tasks"))
            .arg(id)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to drop task payload")?;

        debug!("Marked task as completed: {}", id);
        Ok(())
    }

    async fn fail(&self, id: &str, error: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;

        redis::cmd("SREM")
            .arg(self.key("active"))
            .arg(id)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to unmark active task")?;

        redis::cmd("SADD")
            .arg(self.key("failed"))
            .arg(id)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to mark task failed")?;

        redis::cmd("SET")
            .arg(self.key(&format!("errors:{}", id)))
            .arg(error)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to store task error")?;

        redis::cmd("HDEL")
            .arg(self.key("tasks"))
            .arg(id)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to drop task payload")?;

        debug!("Marked task as failed: {}", id);
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut conn = self.conn.lock().await;

        let waiting: usize = redis::cmd("ZCARD")
            .arg(self.key("pending"))
            .query_async(&mut *conn)
            .await
            .context("Failed to get pending count")?;
        let active: usize = redis::cmd("SCARD")
            .arg(self.key("active"))
            .query_async(&mut *conn)
            .await
            .context("Failed to get active count")?;
        let completed: usize = redis::cmd("SCARD")
            .arg(self.key("completed"))
            .query_async(&mut *conn)
            .await
            .context("Failed to get completed count")?;
        let failed: usize = redis::cmd("SCARD")
            .arg(self.key("failed"))
            .query_async(&mut *conn)
            .await
            .context("Failed to get failed count")?;
        let delayed: usize = redis::cmd("ZCARD")
            .arg(self.key("delayed"))
            .query_async(&mut *conn)
            .await
            .context("Failed to get delayed count")?;

        Ok(QueueStats {
            waiting,
            active,
            completed,
            failed,
            delayed,
        })
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;

        redis::cmd("DEL")
            .arg(self.key("tasks"))
            .arg(self.key("pending"))
            .arg(self.key("delayed"))
            .arg(self.key("active"))
            .arg(self.key("completed"))
            .arg(self.key("failed"))
            .arg(self.key("seq"))
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to delete queue keys")?;

        let error_keys: Vec<String> = redis::cmd("KEYS")
            .arg(self.key("errors:*"))
            .query_async(&mut *conn)
            .await
            .context("Failed to list error keys")?;
        if !error_keys.is_empty() {
            redis::cmd("DEL")
                .arg(&error_keys)
                .query_async::<_, ()>(&mut *conn)
                .await
                .context("Failed to delete error keys")?;
        }

        debug!("Cleared all queue data under prefix {}", self.prefix);
        Ok(())
    }
}
