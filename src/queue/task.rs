use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Priority assigned when the caller does not set one; lower value means
/// higher priority
pub const DEFAULT_PRIORITY: i32 = 10;

/// A submitted unit of scraping work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeTask {
    /// Task identity; doubles as the store's dedup key
    pub id: String,

    /// URL to scrape
    pub url: String,

    /// Lower value = higher priority
    pub priority: i32,

    /// Opaque per-task scrape options, echoed to the processor
    #[serde(default)]
    pub options: Option<Value>,

    /// Caller metadata, echoed back on the result
    #[serde(default)]
    pub metadata: Option<Value>,

    pub submitted_at: DateTime<Utc>,

    /// Executions already performed; managed by the queue
    #[serde(default)]
    pub attempts: u32,
}

impl ScrapeTask {
    pub fn new(url: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            priority: DEFAULT_PRIORITY,
            options: None,
            metadata: None,
            submitted_at: Utc::now(),
            attempts: 0,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Terminal outcome of one task: either the processor's payload or the
/// final error after retries were exhausted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub task_id: String,
    pub url: String,
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
    /// The submitting caller's metadata, echoed back
    pub metadata: Option<Value>,
}

/// Point-in-time queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    /// Tasks parked between retry attempts
    pub delayed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_default_to_priority_ten() {
        let task = ScrapeTask::new("https://example.test/");
        assert_eq!(task.priority, DEFAULT_PRIORITY);
        assert_eq!(task.attempts, 0);
        assert!(!task.id.is_empty());
    }

    #[test]
    fn task_round_trips_through_json() {
        let task = ScrapeTask::new("https://example.test/")
            .with_id("custom-1")
            .with_priority(1)
            .with_metadata(serde_json::json!({"batch": 7}));

        let json = serde_json::to_string(&task).unwrap();
        let back: ScrapeTask = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, "custom-1");
        assert_eq!(back.priority, 1);
        assert_eq!(back.metadata, Some(serde_json::json!({"batch": 7})));
    }
}
