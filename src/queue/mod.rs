pub mod store;
pub mod task;
pub mod worker;

// Re-export common types
pub use store::{MemoryTaskStore, RedisTaskStore, TaskStore};
pub use task::{QueueStats, ScrapeResult, ScrapeTask};
pub use worker::{QueueSettings, ScrapeProcessor, TaskProcessor, TaskQueue};
