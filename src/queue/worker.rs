use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};

use crate::queue::store::TaskStore;
use crate::queue::task::{QueueStats, ScrapeResult, ScrapeTask};
use crate::scraper::engine::Scraper;

/// How often idle workers poll the store and the promoter wakes up
const IDLE_POLL: Duration = Duration::from_millis(50);

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Queue execution parameters with documented defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Size of the worker pool (default 5)
    pub concurrency: usize,

    /// Tasks allowed to start per second, independent of concurrency
    /// (default 2)
    pub rate_limit_per_second: u32,

    /// Retries after a task's first failed execution (default 3)
    pub retries: u32,

    /// Base delay for exponential retry backoff in milliseconds
    /// (default 1 000)
    pub backoff_delay_ms: u64,

    /// Redis endpoint for the durable store
    pub redis_url: String,

    /// Key prefix separating queues sharing one Redis
    pub key_prefix: String,

    /// Capacity of the result channel before senders block
    pub result_buffer: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_limit_per_second: 2,
            retries: 3,
            backoff_delay_ms: 1_000,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "harvester".to_string(),
            result_buffer: 256,
        }
    }
}

impl QueueSettings {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 || self.concurrency > 64 {
            anyhow::bail!("concurrency must be within 1..=64, got {}", self.concurrency);
        }
        if self.rate_limit_per_second == 0 {
            anyhow::bail!("rate_limit_per_second must be at least 1");
        }
        if self.retries > 10 {
            anyhow::bail!("retries must be at most 10, got {}", self.retries);
        }
        if self.result_buffer == 0 {
            anyhow::bail!("result_buffer must be at least 1");
        }
        Ok(())
    }
}

/// Executes one task attempt. Retries belong to the queue, so processors
/// run each attempt exactly once and simply return the outcome.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, task: &ScrapeTask) -> Result<Value>;
}

/// Processor that runs tasks through the scraper engine
pub struct ScrapeProcessor {
    scraper: Arc<Scraper>,
}

impl ScrapeProcessor {
    pub fn new(scraper: Arc<Scraper>) -> Self {
        Self { scraper }
    }
}

#[async_trait]
impl TaskProcessor for ScrapeProcessor {
    async fn process(&self, task: &ScrapeTask) -> Result<Value> {
        // The queue owns retrying; run a single attempt here
        let mut options = self.scraper.options().clone();
        options.retries = 0;

        let page = self.scraper.scrape_with(&task.url, &options).await?;
        Ok(serde_json::json!({
            "url": page.url,
            "status": page.status,
            "title": page.title,
            "links": page.links.len(),
            "html_bytes": page.html.len(),
            "from_cache": page.from_cache,
        }))
    }
}

/// Durable, rate-limited scraping job queue.
///
/// Submission is decoupled from execution: tasks live in the store until a
/// worker claims them, every terminal outcome is published on the result
/// channel, and one task's failure is never fatal to the queue.
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    settings: QueueSettings,
    shutdown: watch::Sender<bool>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn TaskStore>, settings: QueueSettings) -> Result<Self> {
        settings.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            store,
            settings,
            shutdown,
            workers: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Submit one task; duplicate ids are skipped by the store
    pub async fn submit(&self, task: ScrapeTask) -> Result<String> {
        let id = task.id.clone();
        if self.store.push(&task).await? {
            debug!("Submitted task {} for {}", id, task.url);
        } else {
            debug!("Task id {} already known, skipping", id);
        }
        Ok(id)
    }

    pub async fn submit_many(&self, tasks: Vec<ScrapeTask>) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            ids.push(self.submit(task).await?);
        }
        Ok(ids)
    }

    /// Start the worker pool. Every terminal task outcome is delivered on
    /// the returned channel; dropping the receiver only discards results,
    /// it never stalls or crashes the workers.
    pub fn start(&self, processor: Arc<dyn TaskProcessor>) -> mpsc::Receiver<ScrapeResult> {
        let (results, receiver) = mpsc::channel(self.settings.result_buffer);

        let rate = NonZeroU32::new(self.settings.rate_limit_per_second).unwrap_or(nonzero!(1u32));
        let limiter: Arc<DirectLimiter> = Arc::new(RateLimiter::direct(Quota::per_second(rate)));

        let mut handles = self.lock_workers();

        // Promoter moves delayed tasks back to pending when their backoff
        // expires
        {
            let store = self.store.clone();
            let mut shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                while !*shutdown.borrow_and_update() {
                    if let Err(e) = store.promote_due(Utc::now()).await {
                        error!("Failed to promote delayed tasks: {:#}", e);
                    }
                    sleep(IDLE_POLL).await;
                }
            }));
        }

        for worker_id in 0..self.settings.concurrency {
            let store = self.store.clone();
            let settings = self.settings.clone();
            let limiter = limiter.clone();
            let processor = processor.clone();
            let results = results.clone();
            let shutdown = self.shutdown.subscribe();

            handles.push(tokio::spawn(worker_loop(
                worker_id, store, settings, limiter, processor, results, shutdown,
            )));
        }

        receiver
    }

    /// Signal shutdown and wait for in-flight tasks to finish
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);

        let handles: Vec<JoinHandle<()>> = self.lock_workers().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task panicked: {}", e);
            }
        }
        debug!("Task queue stopped");
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.store.stats().await
    }

    /// Discard all pending work and completed records
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    store: Arc<dyn TaskStore>,
    settings: QueueSettings,
    limiter: Arc<DirectLimiter>,
    processor: Arc<dyn TaskProcessor>,
    results: mpsc::Sender<ScrapeResult>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        match store.pop().await {
            Ok(Some(task)) => {
                // Gate task starts, not completions
                limiter.until_ready().await;
                execute_task(&store, &settings, &processor, &results, task).await;
            }
            Ok(None) => sleep(IDLE_POLL).await,
            Err(e) => {
                error!("Worker {} store error: {:#}", worker_id, e);
                sleep(Duration::from_millis(500)).await;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Run one claimed task to a terminal or parked state
async fn execute_task(
    store: &Arc<dyn TaskStore>,
    settings: &QueueSettings,
    processor: &Arc<dyn TaskProcessor>,
    results: &mpsc::Sender<ScrapeResult>,
    mut task: ScrapeTask,
) {
    let started = Instant::now();
    let outcome = processor.process(&task).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(data) => {
            if let Err(e) = store.complete(&task.id).await {
                error!("Failed to record completion of {}: {:#}", task.id, e);
            }
            let _ = results
                .send(ScrapeResult {
                    task_id: task.id.clone(),
                    url: task.url.clone(),
                    success: true,
                    data: Some(data),
                    error: None,
                    duration_ms,
                    finished_at: Utc::now(),
                    metadata: task.metadata.clone(),
                })
                .await;
        }
        Err(e) => {
            task.attempts += 1;

            if task.attempts <= settings.retries {
                let delay = Duration::from_millis(settings.backoff_delay_ms)
                    * 2u32.saturating_pow(task.attempts - 1);
                warn!(
                    "Task {} attempt {}/{} failed: {:#} (retrying in {:?})",
                    task.id,
                    task.attempts,
                    settings.retries + 1,
                    e,
                    delay
                );

                let ready_at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                if let Err(park_err) = store.delay(&task, ready_at).await {
                    error!("Failed to park {} for retry: {:#}", task.id, park_err);
                }
            } else {
                let message = format!("{:#}", e);
                error!(
                    "Task {} failed permanently after {} attempts: {}",
                    task.id, task.attempts, message
                );
                if let Err(fail_err) = store.fail(&task.id, &message).await {
                    error!("Failed to record failure of {}: {:#}", task.id, fail_err);
                }
                let _ = results
                    .send(ScrapeResult {
                        task_id: task.id.clone(),
                        url: task.url.clone(),
                        success: false,
                        data: None,
                        error: Some(message),
                        duration_ms,
                        finished_at: Utc::now(),
                        metadata: task.metadata.clone(),
                    })
                    .await;
            }
        }
    }
}
