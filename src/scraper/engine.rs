use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::browser::agents::UserAgentRotator;
use crate::browser::session::{
    BlockedResources, BrowserFetcher, FetchRequest, FetchedPage, PageFetcher, Viewport, WaitUntil,
};
use crate::proxy::manager::ProxyManager;
use crate::scraper::cache::PageCache;
use crate::utils::retry::retry_with_backoff;

/// Validated scrape configuration with documented defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeOptions {
    /// Run the browser headless (default true)
    pub headless: bool,

    /// Navigation timeout in milliseconds (default 30 000)
    pub timeout_ms: u64,

    /// Readiness condition to wait for (default page load)
    pub wait_until: WaitUntil,

    /// Explicit user agent; falls back to the rotator when unset
    pub user_agent: Option<String>,

    /// Explicit proxy connection string; falls back to the pool when unset
    pub proxy: Option<String>,

    /// Cookies attached to the session
    #[serde(default)]
    pub cookies: Vec<(String, String)>,

    pub viewport: Viewport,

    /// Resource types aborted during navigation
    #[serde(default)]
    pub block: BlockedResources,

    /// Serve repeat fetches of a URL from the cache (default true)
    pub cache_enabled: bool,

    /// Cache entry lifetime in seconds (default 3 600)
    pub cache_ttl_secs: u64,

    /// Batch width for `scrape_many` (default 5)
    pub max_concurrency: usize,

    /// Retries after the first failed attempt (default 3)
    pub retries: u32,

    /// Base delay for exponential backoff in milliseconds (default 1 000)
    pub backoff_delay_ms: u64,

    /// WebDriver endpoint the browser sessions connect to
    pub webdriver_url: String,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_ms: 30_000,
            wait_until: WaitUntil::Load,
            user_agent: None,
            proxy: None,
            cookies: Vec::new(),
            viewport: Viewport::default(),
            block: BlockedResources::default(),
            cache_enabled: true,
            cache_ttl_secs: 3_600,
            max_concurrency: 5,
            retries: 3,
            backoff_delay_ms: 1_000,
            webdriver_url: "http://localhost:4444".to_string(),
        }
    }
}

impl ScrapeOptions {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 || self.timeout_ms > 300_000 {
            anyhow::bail!("timeout_ms must be within 1..=300000, got {}", self.timeout_ms);
        }
        if self.max_concurrency == 0 || self.max_concurrency > 64 {
            anyhow::bail!(
                "max_concurrency must be within 1..=64, got {}",
                self.max_concurrency
            );
        }
        if self.retries > 10 {
            anyhow::bail!("retries must be at most 10, got {}", self.retries);
        }
        if self.cache_enabled && self.cache_ttl_secs == 0 {
            anyhow::bail!("cache_ttl_secs must be positive when caching is enabled");
        }
        if self.webdriver_url.is_empty() {
            anyhow::bail!("webdriver_url must not be empty");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn backoff_delay(&self) -> Duration {
        Duration::from_millis(self.backoff_delay_ms)
    }
}

/// Result of scraping one URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedPage {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub title: String,
    pub html: String,
    /// Absolute http(s) links found on the page
    pub links: Vec<String>,
    pub cookies: Vec<(String, String)>,
    pub fetched_at: DateTime<Utc>,
    pub from_cache: bool,
}

/// Per-URL outcome of a batch scrape; failures never abort the batch
#[derive(Debug)]
pub struct BatchOutcome {
    pub url: String,
    pub result: std::result::Result<ScrapedPage, String>,
}

/// Single-page fetch engine: resolves a browsing identity per attempt,
/// caches results by URL, and retries the whole fetch with exponential
/// backoff before surfacing the final error to the caller.
pub struct Scraper {
    options: ScrapeOptions,
    fetcher: Arc<dyn PageFetcher>,
    agents: Arc<UserAgentRotator>,
    proxies: Option<Arc<ProxyManager>>,
    cache: PageCache,
}

impl Scraper {
    /// Create a scraper backed by a real browser session per fetch
    pub fn new(options: ScrapeOptions) -> Result<Self> {
        let fetcher = Arc::new(BrowserFetcher::new(&options.webdriver_url));
        Self::with_fetcher(options, fetcher)
    }

    /// Create a scraper over an explicit fetch implementation
    pub fn with_fetcher(options: ScrapeOptions, fetcher: Arc<dyn PageFetcher>) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            fetcher,
            agents: Arc::new(UserAgentRotator::new()),
            proxies: None,
            cache: PageCache::new(),
        })
    }

    /// Attach a proxy pool; identities rotate per attempt
    pub fn with_proxy_manager(mut self, proxies: Arc<ProxyManager>) -> Self {
        self.proxies = Some(proxies);
        self
    }

    /// Replace the default user-agent pool
    pub fn with_agents(mut self, agents: Arc<UserAgentRotator>) -> Self {
        self.agents = agents;
        self
    }

    pub fn options(&self) -> &ScrapeOptions {
        &self.options
    }

    /// Fetch one URL with the scraper's configured options
    pub async fn scrape(&self, url: &str) -> Result<ScrapedPage> {
        let options = self.options.clone();
        self.scrape_with(url, &options).await
    }

    /// Fetch one URL with per-call option overrides
    pub async fn scrape_with(&self, url: &str, options: &ScrapeOptions) -> Result<ScrapedPage> {
        options.validate()?;

        if options.cache_enabled {
            if let Some(hit) = self.cache.get(url, options.cache_ttl()) {
                debug!("Cache hit for {}", url);
                return Ok(hit);
            }
        }

        retry_with_backoff(options.retries, options.backoff_delay(), || {
            self.attempt(url, options)
        })
        .await
    }

    /// Fetch many URLs in batches of `max_concurrency`. One URL's failure is
    /// captured as an error entry and never aborts its batch.
    pub async fn scrape_many(&self, urls: &[String]) -> Vec<BatchOutcome> {
        let width = self.options.max_concurrency.max(1);
        let mut outcomes = Vec::with_capacity(urls.len());

        for batch in urls.chunks(width) {
            let fetches = batch.iter().map(|url| async move {
                match self.scrape(url).await {
                    Ok(page) => BatchOutcome {
                        url: url.clone(),
                        result: Ok(page),
                    },
                    Err(e) => {
                        warn!("Scrape failed for {}: {:#}", url, e);
                        BatchOutcome {
                            url: url.clone(),
                            result: Err(format!("{:#}", e)),
                        }
                    }
                }
            });
            outcomes.extend(join_all(fetches).await);
        }

        outcomes
    }

    /// One navigate-and-extract attempt with a freshly resolved identity
    async fn attempt(&self, url: &str, options: &ScrapeOptions) -> Result<ScrapedPage> {
        let rotated = if options.proxy.is_none() {
            self.proxies.as_ref().and_then(|pool| pool.next())
        } else {
            None
        };
        let proxy_key = rotated.as_ref().map(|s| s.proxy.key());
        let proxy = options
            .proxy
            .clone()
            .or_else(|| rotated.as_ref().map(|s| s.proxy.connection_string()));
        let user_agent = options
            .user_agent
            .clone()
            .unwrap_or_else(|| self.agents.random());

        let request = FetchRequest {
            url: url.to_string(),
            user_agent,
            proxy,
            cookies: options.cookies.clone(),
            timeout: options.timeout(),
            wait_until: options.wait_until,
            headless: options.headless,
            viewport: options.viewport,
            block: options.block,
        };

        match self.fetcher.fetch(&request).await {
            Ok(fetched) => {
                if let (Some(pool), Some(key)) = (&self.proxies, &proxy_key) {
                    pool.mark_success(key);
                }
                let page = finish_page(url, fetched);
                if options.cache_enabled {
                    self.cache.put(url, &page);
                }
                Ok(page)
            }
            Err(e) => {
                if let (Some(pool), Some(key)) = (&self.proxies, &proxy_key) {
                    pool.mark_error(key);
                }
                Err(e)
            }
        }
    }
}

/// Turn a raw fetch into a scrape result with resolved links
fn finish_page(requested: &str, fetched: FetchedPage) -> ScrapedPage {
    let base = Url::parse(&fetched.url)
        .or_else(|_| Url::parse(requested))
        .ok();
    let links = match &base {
        Some(base) => resolve_links(base, &fetched.links),
        None => Vec::new(),
    };

    ScrapedPage {
        url: fetched.url,
        status: fetched.status,
        title: fetched.title,
        html: fetched.html,
        links,
        cookies: fetched.cookies,
        fetched_at: Utc::now(),
        from_cache: false,
    }
}

/// Resolve raw hrefs against a base URL, keeping deduplicated absolute
/// http(s) links in document order
pub fn resolve_links(base: &Url, hrefs: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for href in hrefs {
        let href = href.trim();
        if href.is_empty() {
            continue;
        }

        let resolved = match Url::parse(href) {
            Ok(url) => url,
            Err(_) => match base.join(href) {
                Ok(url) => url,
                Err(_) => continue,
            },
        };

        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }

        let link = resolved.to_string();
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }

    links
}

/// Stateless HTML query helper: select elements and map each to its text
/// content or to a named attribute, dropping empty values
pub fn extract_data(html: &str, selector: &str, attribute: Option<&str>) -> Result<Vec<String>> {
    let parsed = Selector::parse(selector)
        .map_err(|e| anyhow::anyhow!("Invalid selector '{}': {:?}", selector, e))
        .context("extract_data requires a valid CSS selector")?;

    let document = Html::parse_document(html);
    let mut values = Vec::new();

    for element in document.select(&parsed) {
        let value = match attribute {
            Some(attr) => element.value().attr(attr).map(|v| v.to_string()),
            None => {
                let text: String = element.text().collect::<Vec<_>>().join(" ");
                let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            }
        };

        if let Some(value) = value {
            if !value.is_empty() {
                values.push(value);
            }
        }
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::manager::Proxy;
    use async_trait::async_trait;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    mock! {
        pub Fetcher {}

        #[async_trait]
        impl PageFetcher for Fetcher {
            async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage>;
        }
    }

    fn fetched(url: &str) -> FetchedPage {
        FetchedPage {
            url: url.to_string(),
            status: 200,
            title: "Fixture".to_string(),
            html: "<html><body><p>hello</p></body></html>".to_string(),
            links: vec!["/about".to_string()],
            cookies: Vec::new(),
        }
    }

    fn options_fast() -> ScrapeOptions {
        ScrapeOptions {
            retries: 3,
            backoff_delay_ms: 1,
            ..Default::default()
        }
    }

    /// Fetcher that records every request and fails for URLs containing "bad"
    struct RecordingFetcher {
        requests: Mutex<Vec<FetchRequest>>,
    }

    impl RecordingFetcher {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for RecordingFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage> {
            self.requests.lock().unwrap().push(request.clone());
            if request.url.contains("bad") {
                anyhow::bail!("connection refused");
            }
            Ok(fetched(&request.url))
        }
    }

    #[tokio::test]
    async fn permanent_failure_surfaces_after_retries_plus_one_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut mock = MockFetcher::new();
        mock.expect_fetch().times(4).returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("net down"))
        });

        let scraper = Scraper::with_fetcher(options_fast(), Arc::new(mock)).unwrap();
        let result = scraper.scrape("https://example.test/").await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn repeat_fetches_are_served_from_cache() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .times(1)
            .returning(|req| Ok(fetched(&req.url)));

        let scraper = Scraper::with_fetcher(options_fast(), Arc::new(mock)).unwrap();

        let first = scraper.scrape("https://example.test/").await.unwrap();
        assert!(!first.from_cache);

        let second = scraper.scrape("https://example.test/").await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.title, first.title);
    }

    #[tokio::test]
    async fn cache_can_be_disabled() {
        let mut mock = MockFetcher::new();
        mock.expect_fetch()
            .times(2)
            .returning(|req| Ok(fetched(&req.url)));

        let options = ScrapeOptions {
            cache_enabled: false,
            ..options_fast()
        };
        let scraper = Scraper::with_fetcher(options, Arc::new(mock)).unwrap();

        scraper.scrape("https://example.test/").await.unwrap();
        let again = scraper.scrape("https://example.test/").await.unwrap();
        assert!(!again.from_cache);
    }

    #[tokio::test]
    async fn batch_failures_do_not_abort_siblings() {
        let options = ScrapeOptions {
            retries: 0,
            cache_enabled: false,
            max_concurrency: 2,
            ..options_fast()
        };
        let scraper =
            Scraper::with_fetcher(options, Arc::new(RecordingFetcher::new())).unwrap();

        let urls: Vec<String> = vec![
            "https://ok.test/1".into(),
            "https://bad.test/2".into(),
            "https://ok.test/3".into(),
        ];
        let outcomes = scraper.scrape_many(&urls).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[1].result.is_err());
        assert!(outcomes[2].result.is_ok());
        assert_eq!(outcomes[1].url, "https://bad.test/2");
    }

    #[tokio::test]
    async fn identity_comes_from_pools_unless_overridden() {
        let fetcher = Arc::new(RecordingFetcher::new());
        let proxies = Arc::new(ProxyManager::new());
        proxies.add(Proxy::new("10.1.1.1", 3128));

        let scraper = Scraper::with_fetcher(options_fast(), fetcher.clone())
            .unwrap()
            .with_proxy_manager(proxies.clone());

        scraper.scrape("https://example.test/").await.unwrap();

        let requests = fetcher.requests.lock().unwrap();
        assert!(!requests[0].user_agent.is_empty());
        assert_eq!(requests[0].proxy.as_deref(), Some("http://10.1.1.1:3128"));
        drop(requests);

        // The pool records the successful use
        let snapshot = proxies.get("10.1.1.1", 3128).unwrap();
        assert_eq!(snapshot.stats.success_count, 1);
    }

    #[tokio::test]
    async fn failed_attempts_mark_the_proxy() {
        let fetcher = Arc::new(RecordingFetcher::new());
        let proxies = Arc::new(ProxyManager::new());
        proxies.add(Proxy::new("10.1.1.1", 3128));

        let options = ScrapeOptions {
            retries: 1,
            cache_enabled: false,
            ..options_fast()
        };
        let scraper = Scraper::with_fetcher(options, fetcher)
            .unwrap()
            .with_proxy_manager(proxies.clone());

        assert!(scraper.scrape("https://bad.test/").await.is_err());

        let snapshot = proxies.get("10.1.1.1", 3128).unwrap();
        assert_eq!(snapshot.stats.error_count, 2);
    }

    #[tokio::test]
    async fn explicit_proxy_override_wins() {
        let fetcher = Arc::new(RecordingFetcher::new());
        let options = ScrapeOptions {
            proxy: Some("socks5://1.2.3.4:1080".to_string()),
            user_agent: Some("Explicit/1.0".to_string()),
            ..options_fast()
        };
        let scraper = Scraper::with_fetcher(options, fetcher.clone()).unwrap();

        scraper.scrape("https://example.test/").await.unwrap();

        let requests = fetcher.requests.lock().unwrap();
        assert_eq!(requests[0].proxy.as_deref(), Some("socks5://1.2.3.4:1080"));
        assert_eq!(requests[0].user_agent, "Explicit/1.0");
    }

    #[test]
    fn resolve_links_filters_and_dedups() {
        let base = Url::parse("https://example.test/docs/").unwrap();
        let hrefs = vec![
            "page".to_string(),
            "/about".to_string(),
            "https://other.test/x".to_string(),
            "mailto:hi@example.test".to_string(),
            "javascript:void(0)".to_string(),
            "/about".to_string(),
        ];

        let links = resolve_links(&base, &hrefs);
        assert_eq!(
            links,
            vec![
                "https://example.test/docs/page".to_string(),
                "https://example.test/about".to_string(),
                "https://other.test/x".to_string(),
            ]
        );
    }

    #[test]
    fn extract_data_selects_text_and_attributes() {
        let html = r#"<html><body>
            <h2 class="title">First</h2>
            <h2 class="title">  </h2>
            <h2 class="title">Second</h2>
            <a href="/one">One</a>
            <a>No href</a>
        </body></html>"#;

        let titles = extract_data(html, "h2.title", None).unwrap();
        assert_eq!(titles, vec!["First".to_string(), "Second".to_string()]);

        let hrefs = extract_data(html, "a", Some("href")).unwrap();
        assert_eq!(hrefs, vec!["/one".to_string()]);

        assert!(extract_data(html, "h2..", None).is_err());
    }

    #[test]
    fn options_validation_rejects_out_of_range_values() {
        let mut options = ScrapeOptions::default();
        assert!(options.validate().is_ok());

        options.timeout_ms = 0;
        assert!(options.validate().is_err());

        options = ScrapeOptions {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        options = ScrapeOptions {
            retries: 50,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
