pub mod engine;
pub mod extract;
pub mod frontier;

// Re-export common types
pub use engine::{CrawlReport, CrawlSettings, Crawler, Page};
pub use frontier::{normalize_url, Frontier, UrlFilter};
