pub mod logging;
pub mod retry;

// Re-export common functions and types
pub use logging::init_logging;
pub use retry::retry_with_backoff;
