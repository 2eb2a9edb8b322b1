pub mod agents;
pub mod session;

// Re-export common types
pub use agents::{DeviceCategory, UserAgent, UserAgentRotator};
pub use session::{
    BlockedResources, BrowserFetcher, FetchError, FetchRequest, FetchedPage, PageFetcher,
    Viewport, WaitUntil,
};
