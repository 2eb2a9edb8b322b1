use regex::Regex;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};
use url::Url;

/// Exclude patterns applied when the caller supplies none: binary assets,
/// query strings, and fragment links
const DEFAULT_EXCLUDES: &[&str] = &[
    r"\.(png|jpe?g|gif|svg|ico|bmp|webp|css|js|mjs|json|xml|pdf|zip|gz|tar|rar|7z|mp3|mp4|avi|mov|wmv|webm|woff2?|ttf|eot|otf|docx?|xlsx?|pptx?|exe|dmg)$",
    r"\?",
    r"#",
];

/// Canonicalize a URL for deduplication: absolute http(s) only, fragment
/// stripped, sorted query parameters, no trailing slash.
///
/// Idempotent: `normalize_url(normalize_url(u)) == normalize_url(u)`, and
/// `/path` and `/path/` share one canonical form.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    url.set_fragment(None);

    if let Some(query) = url.query().map(|q| q.to_string()) {
        if query.is_empty() {
            url.set_query(None);
        } else {
            let mut params: Vec<(String, String)> = query
                .split('&')
                .map(|pair| {
                    let mut kv = pair.splitn(2, '=');
                    (
                        kv.next().unwrap_or("").to_string(),
                        kv.next().unwrap_or("").to_string(),
                    )
                })
                .collect();
            params.sort();

            let sorted = params
                .iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        k.clone()
                    } else {
                        format!("{}={}", k, v)
                    }
                })
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&sorted));
        }
    }

    let mut canonical = url.to_string();
    if url.query().is_none() && canonical.ends_with('/') {
        canonical.pop();
    }

    Some(canonical)
}

/// Admissibility rules for discovered URLs.
///
/// A URL is allowed when it matches at least one include pattern and no
/// exclude pattern. Patterns are checked against the resolved absolute URL
/// before canonicalization, so the default query/fragment excludes see the
/// original form.
pub struct UrlFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl UrlFilter {
    /// Build a filter from caller patterns, defaulting the include list to
    /// the seed's host (and its subdomains) and the exclude list to
    /// `DEFAULT_EXCLUDES`. Invalid patterns are skipped with a warning.
    pub fn new(include: &[String], exclude: &[String], seed: &Url) -> Self {
        let mut include_patterns = compile_patterns(include);
        if include_patterns.is_empty() {
            if let Some(host) = seed.host_str() {
                let pattern = format!(
                    r"^https?://([a-z0-9.-]+\.)?{}([/:]|$)",
                    regex::escape(&host.to_lowercase())
                );
                match Regex::new(&pattern) {
                    Ok(regex) => include_patterns.push(regex),
                    Err(e) => warn!("Failed to build seed host pattern: {}", e),
                }
            }
        }

        let exclude_patterns = if exclude.is_empty() {
            compile_patterns(
                &DEFAULT_EXCLUDES
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>(),
            )
        } else {
            compile_patterns(exclude)
        };

        Self {
            include: include_patterns,
            exclude: exclude_patterns,
        }
    }

    /// Whether a resolved absolute URL is admissible for crawling
    pub fn allows(&self, url: &str) -> bool {
        for pattern in &self.exclude {
            if pattern.is_match(url) {
                debug!("URL matches exclusion pattern: {}", url);
                return false;
            }
        }

        if !self.include.iter().any(|p| p.is_match(url)) {
            debug!("URL matches no inclusion pattern: {}", url);
            return false;
        }

        true
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Invalid URL pattern '{}': {}", pattern, e);
                None
            }
        })
        .collect()
}

/// Work queue for one crawl: pending `(url, depth)` pairs plus the set of
/// every canonical URL ever enqueued. A URL can be enqueued, and therefore
/// dequeued, at most once per crawl.
pub struct Frontier {
    queue: VecDeque<(String, u32)>,
    visited: HashSet<String>,
}

impl Frontier {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            visited: HashSet::new(),
        }
    }

    /// Enqueue a canonical URL; returns false when it was already seen
    pub fn enqueue(&mut self, url: &str, depth: u32) -> bool {
        if !self.visited.insert(url.to_string()) {
            return false;
        }
        self.queue.push_back((url.to_string(), depth));
        true
    }

    pub fn dequeue(&mut self) -> Option<(String, u32)> {
        self.queue.pop_front()
    }

    /// Number of distinct canonical URLs ever enqueued
    pub fn seen_count(&self) -> usize {
        self.visited.len()
    }

    /// URLs still waiting to be fetched
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new()
    }
}
