use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::warn;

/// Device class a user agent presents as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCategory {
    Desktop,
    Mobile,
    Tablet,
}

/// Immutable browser identity descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAgent {
    /// Full User-Agent header value
    pub value: String,

    /// Device class this agent presents as
    pub category: DeviceCategory,

    /// Browser family (e.g. "chrome", "firefox", "safari")
    pub browser: String,

    /// Operating system family (e.g. "windows", "macos", "android")
    pub os: String,

    /// Browser version string
    pub version: String,

    /// Whether this is a mobile agent
    pub mobile: bool,
}

impl UserAgent {
    fn new(
        value: &str,
        category: DeviceCategory,
        browser: &str,
        os: &str,
        version: &str,
    ) -> Self {
        Self {
            value: value.to_string(),
            category,
            browser: browser.to_string(),
            os: os.to_string(),
            version: version.to_string(),
            mobile: matches!(category, DeviceCategory::Mobile | DeviceCategory::Tablet),
        }
    }
}

/// Emergency agent used only when the pool is completely empty
const FALLBACK_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Pool of realistic browser identities with rotation helpers.
///
/// The pool is fixed at construction; `add` can extend it at runtime but
/// entries are never expired. Selection never fails: filters that match
/// nothing fall back to a random pick from the whole pool, and an entirely
/// empty pool degrades to a built-in agent.
pub struct UserAgentRotator {
    inner: Mutex<Inner>,
}

struct Inner {
    agents: Vec<UserAgent>,
    last_used: Option<String>,
}

impl UserAgentRotator {
    /// Create a rotator with the default pool of common desktop and mobile agents
    pub fn new() -> Self {
        Self::with_agents(default_pool())
    }

    /// Create a rotator with an explicit pool
    pub fn with_agents(agents: Vec<UserAgent>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                agents,
                last_used: None,
            }),
        }
    }

    /// Select a random agent from the whole pool
    pub fn random(&self) -> String {
        let mut inner = self.lock();
        Self::pick_from(&mut inner, |_| true).unwrap_or_else(|| {
            warn!("User agent pool is empty, using fallback agent");
            FALLBACK_AGENT.to_string()
        })
    }

    /// Select a random agent of the given device category
    pub fn by_category(&self, category: DeviceCategory) -> String {
        self.filtered(
            |agent| agent.category == category,
            &format!("category {:?}", category),
        )
    }

    /// Select a random agent of the given browser family
    pub fn by_browser(&self, browser: &str) -> String {
        let wanted = browser.to_lowercase();
        self.filtered(
            |agent| agent.browser.eq_ignore_ascii_case(&wanted),
            &format!("browser {}", browser),
        )
    }

    /// Select a random agent of the given operating system
    pub fn by_os(&self, os: &str) -> String {
        let wanted = os.to_lowercase();
        self.filtered(
            |agent| agent.os.eq_ignore_ascii_case(&wanted),
            &format!("os {}", os),
        )
    }

    /// Extend the pool with an additional agent
    pub fn add(&self, agent: UserAgent) {
        self.lock().agents.push(agent);
    }

    /// Snapshot copy of the current pool
    pub fn all(&self) -> Vec<UserAgent> {
        self.lock().agents.clone()
    }

    /// The most recently selected agent value, for introspection
    pub fn last_used(&self) -> Option<String> {
        self.lock().last_used.clone()
    }

    fn filtered<F>(&self, predicate: F, description: &str) -> String
    where
        F: Fn(&UserAgent) -> bool,
    {
        let mut inner = self.lock();
        if let Some(value) = Self::pick_from(&mut inner, predicate) {
            return value;
        }
        drop(inner);

        warn!(
            "No user agent matching {} in pool, falling back to random",
            description
        );
        self.random()
    }

    fn pick_from<F>(inner: &mut Inner, predicate: F) -> Option<String>
    where
        F: Fn(&UserAgent) -> bool,
    {
        let candidates: Vec<&UserAgent> =
            inner.agents.iter().filter(|a| predicate(a)).collect();
        if candidates.is_empty() {
            return None;
        }

        let mut rng = thread_rng();
        let value = candidates[rng.gen_range(0..candidates.len())].value.clone();
        inner.last_used = Some(value.clone());
        Some(value)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for UserAgentRotator {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in pool of realistic browser identities
fn default_pool() -> Vec<UserAgent> {
    vec![
        UserAgent::new(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
            DeviceCategory::Desktop,
            "chrome",
            "windows",
            "121.0.0.0",
        ),
        UserAgent::new(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
            DeviceCategory::Desktop,
            "chrome",
            "macos",
            "121.0.0.0",
        ),
        UserAgent::new(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
            DeviceCategory::Desktop,
            "chrome",
            "linux",
            "121.0.0.0",
        ),
        UserAgent::new(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
            DeviceCategory::Desktop,
            "firefox",
            "windows",
            "122.0",
        ),
        UserAgent::new(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
            DeviceCategory::Desktop,
            "safari",
            "macos",
            "17.2",
        ),
        UserAgent::new(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36 Edg/121.0.0.0",
            DeviceCategory::Desktop,
            "edge",
            "windows",
            "121.0.0.0",
        ),
        UserAgent::new(
            "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Mobile Safari/537.36",
            DeviceCategory::Mobile,
            "chrome",
            "android",
            "121.0.0.0",
        ),
        UserAgent::new(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1",
            DeviceCategory::Mobile,
            "safari",
            "ios",
            "17.2",
        ),
        UserAgent::new(
            "Mozilla/5.0 (iPad; CPU OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1",
            DeviceCategory::Tablet,
            "safari",
            "ios",
            "17.2",
        ),
    ]
}
