pub mod manager;

// Re-export common types
pub use manager::{Proxy, ProxyManager, ProxyProtocol, ProxySnapshot, ProxyStats};
