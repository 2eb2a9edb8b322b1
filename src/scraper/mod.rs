pub mod cache;
pub mod engine;

// Re-export common types
pub use cache::PageCache;
pub use engine::{extract_data, resolve_links, BatchOutcome, ScrapeOptions, ScrapedPage, Scraper};
