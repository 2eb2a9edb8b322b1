use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::scraper::engine::ScrapedPage;

/// In-memory page cache keyed by requested URL.
///
/// Entries older than the TTL passed to `get` are treated as absent and
/// evicted on access. The TTL lives with the caller so per-call option
/// overrides apply to lookups against a shared cache.
pub struct PageCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    page: ScrapedPage,
    stored_at: Instant,
}

impl PageCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh copy of the cached page for `url`, if any
    pub fn get(&self, url: &str, ttl: Duration) -> Option<ScrapedPage> {
        let mut entries = self.lock();

        match entries.get(url) {
            Some(entry) if entry.stored_at.elapsed() < ttl => {
                let mut page = entry.page.clone();
                page.from_cache = true;
                Some(page)
            }
            Some(_) => {
                debug!("Evicting stale cache entry for {}", url);
                entries.remove(url);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, url: &str, page: &ScrapedPage) {
        self.lock().insert(url.to_string(), CacheEntry {
            page: page.clone(),
            stored_at: Instant::now(),
        });
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn page(url: &str) -> ScrapedPage {
        ScrapedPage {
            url: url.to_string(),
            status: 200,
            title: "t".to_string(),
            html: "<html></html>".to_string(),
            links: Vec::new(),
            cookies: Vec::new(),
            fetched_at: Utc::now(),
            from_cache: false,
        }
    }

    #[test]
    fn fresh_entries_are_returned_marked_as_cached() {
        let cache = PageCache::new();
        cache.put("https://a.test", &page("https://a.test"));

        let hit = cache.get("https://a.test", Duration::from_secs(60)).unwrap();
        assert!(hit.from_cache);
        assert_eq!(hit.url, "https://a.test");
    }

    #[test]
    fn stale_entries_are_evicted_on_access() {
        let cache = PageCache::new();
        cache.put("https://a.test", &page("https://a.test"));

        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("https://a.test", Duration::from_millis(1)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn unknown_urls_miss() {
        let cache = PageCache::new();
        assert!(cache.get("https://nope.test", Duration::from_secs(60)).is_none());
    }
}
