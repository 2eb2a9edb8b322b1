use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::crawler::extract::extract_text;
use crate::crawler::frontier::{normalize_url, Frontier, UrlFilter};
use crate::scraper::engine::Scraper;

/// Crawl parameters with documented defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// Budget of URLs fetched per crawl (default 50)
    pub max_pages: u32,

    /// Maximum link depth from the seed, which sits at depth 0 (default 3)
    pub max_depth: u32,

    /// Include patterns; empty means "same host as the seed"
    #[serde(default)]
    pub include: Vec<String>,

    /// Exclude patterns; empty applies the binary/query/fragment defaults
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Pause between page fetches in milliseconds (default 500)
    pub politeness_delay_ms: u64,

    /// Pages with less extracted text than this are not emitted (default 100)
    pub min_content_length: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_pages: 50,
            max_depth: 3,
            include: Vec::new(),
            exclude: Vec::new(),
            politeness_delay_ms: 500,
            min_content_length: 100,
        }
    }
}

impl CrawlSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_pages == 0 {
            anyhow::bail!("max_pages must be at least 1");
        }
        if self.max_pages > 100_000 {
            anyhow::bail!("max_pages {} is unreasonably large", self.max_pages);
        }
        Ok(())
    }
}

/// One crawled page, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: Uuid,

    /// Canonical URL the page was fetched under
    pub url: String,

    pub title: String,

    /// Extracted readable text
    pub content: String,

    /// Canonical same-scope links discovered on the page
    pub links: Vec<String>,

    pub crawled_at: DateTime<Utc>,
}

/// Ordered crawl output plus aggregate counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlReport {
    pub pages: Vec<Page>,

    /// URLs actually fetched; can exceed `pages.len()` when fetches fail or
    /// pages are too thin to index
    pub pages_processed: u32,
}

/// Breadth-first traversal engine.
///
/// Crawling is deliberately sequential: one in-flight fetch at a time keeps
/// browser resource usage bounded and makes traversal order deterministic
/// for a given seed and pattern set. Per-page failures are logged and
/// skipped so a crawl always returns its best-effort partial result.
pub struct Crawler {
    settings: CrawlSettings,
    scraper: Arc<Scraper>,
}

impl Crawler {
    pub fn new(settings: CrawlSettings, scraper: Arc<Scraper>) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings, scraper })
    }

    pub fn settings(&self) -> &CrawlSettings {
        &self.settings
    }

    /// Crawl outward from `seed` until the frontier drains or a budget is
    /// hit. Only an unusable seed URL is an error.
    pub async fn crawl(&self, seed: &str) -> Result<CrawlReport> {
        let canonical_seed =
            normalize_url(seed).context(format!("Seed URL cannot be used: {}", seed))?;
        let seed_url = Url::parse(&canonical_seed)
            .context(format!("Seed URL cannot be parsed: {}", canonical_seed))?;

        let filter = UrlFilter::new(&self.settings.include, &self.settings.exclude, &seed_url);

        let mut frontier = Frontier::new();
        frontier.enqueue(&canonical_seed, 0);

        let mut report = CrawlReport::default();

        while let Some((url, depth)) = frontier.dequeue() {
            if report.pages_processed >= self.settings.max_pages {
                debug!("Page budget of {} reached", self.settings.max_pages);
                break;
            }
            if depth > self.settings.max_depth {
                debug!("Skipping {} beyond depth {}", url, self.settings.max_depth);
                continue;
            }

            report.pages_processed += 1;
            match self.visit(&url, depth, &filter, &mut frontier).await {
                Ok(Some(page)) => report.pages.push(page),
                Ok(None) => {}
                Err(e) => warn!("Failed to crawl {}: {:#}", url, e),
            }

            if self.settings.politeness_delay_ms > 0 && frontier.pending() > 0 {
                tokio::time::sleep(Duration::from_millis(self.settings.politeness_delay_ms)).await;
            }
        }

        info!(
            "Crawl of {} finished: {} pages kept from {} fetches ({} URLs seen)",
            canonical_seed,
            report.pages.len(),
            report.pages_processed,
            frontier.seen_count()
        );

        Ok(report)
    }

    /// Fetch one URL, feed admissible links back into the frontier, and
    /// build a Page record when the content is worth indexing
    async fn visit(
        &self,
        url: &str,
        depth: u32,
        filter: &UrlFilter,
        frontier: &mut Frontier,
    ) -> Result<Option<Page>> {
        let scraped = self.scraper.scrape(url).await?;
        let content = extract_text(&scraped.html)?;

        // Even thin pages contribute their outbound links
        let mut kept = HashSet::new();
        let mut links = Vec::new();
        for link in &scraped.links {
            if !filter.allows(link) {
                continue;
            }
            let Some(canonical) = normalize_url(link) else {
                continue;
            };
            if kept.insert(canonical.clone()) {
                links.push(canonical.clone());
            }
            if depth < self.settings.max_depth {
                frontier.enqueue(&canonical, depth + 1);
            }
        }

        if content.chars().count() < self.settings.min_content_length {
            debug!(
                "Skipping thin page ({} chars of content): {}",
                content.chars().count(),
                url
            );
            return Ok(None);
        }

        Ok(Some(Page {
            id: Uuid::new_v4(),
            url: url.to_string(),
            title: scraped.title,
            content,
            links,
            crawled_at: scraped.fetched_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::session::{FetchRequest, FetchedPage, PageFetcher};
    use crate::scraper::engine::ScrapeOptions;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Serves a fixed set of pages keyed by canonical URL
    struct FixtureSite {
        pages: HashMap<String, FetchedPage>,
    }

    impl FixtureSite {
        fn new() -> Self {
            Self {
                pages: HashMap::new(),
            }
        }

        fn page(mut self, url: &str, paragraphs: &[&str], links: &[&str]) -> Self {
            let body: String = paragraphs
                .iter()
                .map(|p| format!("<p>{}</p>", p))
                .collect();
            self.pages.insert(
                url.to_string(),
                FetchedPage {
                    url: url.to_string(),
                    status: 200,
                    title: format!("Title of {}", url),
                    html: format!("<html><body>{}</body></html>", body),
                    links: links.iter().map(|l| l.to_string()).collect(),
                    cookies: Vec::new(),
                },
            );
            self
        }
    }

    #[async_trait]
    impl PageFetcher for FixtureSite {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage> {
            self.pages
                .get(&request.url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 not found: {}", request.url))
        }
    }

    const LONG: &str = "This paragraph is deliberately padded with enough words to clear the \
        minimum content threshold used by the crawler fixtures in these tests.";

    fn small_site() -> FixtureSite {
        FixtureSite::new()
            .page(
                "https://example.test",
                &[LONG],
                &["/a", "/b", "https://other.test/external"],
            )
            .page("https://example.test/a", &[LONG], &[])
            .page("https://example.test/b", &[LONG], &[])
    }

    fn crawler_over(site: FixtureSite, settings: CrawlSettings) -> Crawler {
        let options = ScrapeOptions {
            retries: 0,
            cache_enabled: false,
            backoff_delay_ms: 1,
            ..Default::default()
        };
        let scraper = Scraper::with_fetcher(options, Arc::new(site)).unwrap();
        Crawler::new(settings, Arc::new(scraper)).unwrap()
    }

    fn fast_settings() -> CrawlSettings {
        CrawlSettings {
            politeness_delay_ms: 0,
            min_content_length: 50,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn small_site_crawl_stays_in_scope() {
        let crawler = crawler_over(
            small_site(),
            CrawlSettings {
                max_pages: 3,
                max_depth: 1,
                ..fast_settings()
            },
        );

        let report = crawler.crawl("https://example.test/").await.unwrap();

        assert_eq!(report.pages.len(), 3);
        assert_eq!(report.pages_processed, 3);

        let urls: Vec<&str> = report.pages.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.test",
                "https://example.test/a",
                "https://example.test/b"
            ]
        );
        // The external link never becomes a page and is not recorded in scope
        assert!(report
            .pages
            .iter()
            .all(|p| p.links.iter().all(|l| !l.contains("other.test"))));
    }

    #[tokio::test]
    async fn page_budget_is_respected() {
        let crawler = crawler_over(
            small_site(),
            CrawlSettings {
                max_pages: 2,
                max_depth: 3,
                ..fast_settings()
            },
        );

        let report = crawler.crawl("https://example.test/").await.unwrap();
        assert_eq!(report.pages_processed, 2);
        assert_eq!(report.pages.len(), 2);
    }

    #[tokio::test]
    async fn depth_zero_crawls_only_the_seed() {
        let crawler = crawler_over(
            small_site(),
            CrawlSettings {
                max_pages: 10,
                max_depth: 0,
                ..fast_settings()
            },
        );

        let report = crawler.crawl("https://example.test/").await.unwrap();
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].url, "https://example.test");
    }

    #[tokio::test]
    async fn per_page_failures_do_not_abort_the_crawl() {
        // "/b" is linked but never served
        let site = FixtureSite::new()
            .page("https://example.test", &[LONG], &["/a", "/b"])
            .page("https://example.test/a", &[LONG], &[]);

        let crawler = crawler_over(
            site,
            CrawlSettings {
                max_pages: 10,
                max_depth: 2,
                ..fast_settings()
            },
        );

        let report = crawler.crawl("https://example.test/").await.unwrap();
        assert_eq!(report.pages_processed, 3);
        assert_eq!(report.pages.len(), 2);
    }

    #[tokio::test]
    async fn thin_pages_are_traversed_but_not_emitted() {
        let site = FixtureSite::new()
            .page("https://example.test", &[LONG], &["/thin"])
            .page("https://example.test/thin", &["tiny"], &["/deep"])
            .page("https://example.test/deep", &[LONG], &[]);

        let crawler = crawler_over(
            site,
            CrawlSettings {
                max_pages: 10,
                max_depth: 3,
                ..fast_settings()
            },
        );

        let report = crawler.crawl("https://example.test/").await.unwrap();

        let urls: Vec<&str> = report.pages.iter().map(|p| p.url.as_str()).collect();
        assert!(!urls.contains(&"https://example.test/thin"));
        // The thin page's links were still followed
        assert!(urls.contains(&"https://example.test/deep"));
        assert_eq!(report.pages_processed, 3);
    }

    #[tokio::test]
    async fn traversal_order_is_deterministic() {
        let settings = CrawlSettings {
            max_pages: 10,
            max_depth: 2,
            ..fast_settings()
        };

        let first = crawler_over(small_site(), settings.clone())
            .crawl("https://example.test/")
            .await
            .unwrap();
        let second = crawler_over(small_site(), settings)
            .crawl("https://example.test/")
            .await
            .unwrap();

        let order = |r: &CrawlReport| r.pages.iter().map(|p| p.url.clone()).collect::<Vec<_>>();
        assert_eq!(order(&first), order(&second));
    }

    #[tokio::test]
    async fn unusable_seed_is_an_error() {
        let crawler = crawler_over(small_site(), fast_settings());
        assert!(crawler.crawl("not a url at all").await.is_err());
        assert!(crawler.crawl("ftp://example.test/").await.is_err());
    }

    #[tokio::test]
    async fn duplicate_link_spellings_crawl_once() {
        let site = FixtureSite::new()
            .page(
                "https://example.test",
                &[LONG],
                &["/a", "/a/", "https://example.test/a"],
            )
            .page("https://example.test/a", &[LONG], &[]);

        let crawler = crawler_over(
            site,
            CrawlSettings {
                max_pages: 10,
                max_depth: 2,
                ..fast_settings()
            },
        );

        let report = crawler.crawl("https://example.test/").await.unwrap();
        assert_eq!(report.pages_processed, 2);
        assert_eq!(report.pages[0].links, vec!["https://example.test/a"]);
    }
}
