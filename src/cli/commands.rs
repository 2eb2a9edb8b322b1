use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::chunker::Chunker;
use crate::cli::config::HarvesterConfig;
use crate::crawler::engine::Crawler;
use crate::pipeline::IngestPipeline;
use crate::proxy::manager::ProxyManager;
use crate::queue::store::{MemoryTaskStore, RedisTaskStore, TaskStore};
use crate::queue::task::ScrapeTask;
use crate::queue::worker::{ScrapeProcessor, TaskQueue};
use crate::scraper::engine::{extract_data, Scraper};
use crate::storage::{DocumentStore, StorageSettings};

/// Load a named profile, or the default configuration when none is given
fn load_config(profile: Option<&str>) -> Result<HarvesterConfig> {
    match profile {
        Some(name) => HarvesterConfig::load_profile(name)
            .context(format!("Failed to load profile: {}", name)),
        None => HarvesterConfig::load_default(),
    }
}

/// Assemble a scraper with the configured proxy pool attached
fn build_scraper(config: &HarvesterConfig) -> Result<Scraper> {
    let scraper = Scraper::new(config.scrape.clone())?;
    Ok(match config.build_proxy_manager()? {
        Some(manager) => scraper.with_proxy_manager(manager),
        None => scraper,
    })
}

/// Crawl a site and ingest its content into the configured sink
pub async fn crawl(
    url: String,
    profile: Option<String>,
    depth: Option<u32>,
    limit: Option<u32>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config(profile.as_deref())?;

    if let Some(depth) = depth {
        config.crawl.max_depth = depth;
    }
    if let Some(limit) = limit {
        config.crawl.max_pages = limit;
    }
    if let Some(path) = output {
        config.storage = StorageSettings {
            backend: "jsonl".to_string(),
            path: Some(path),
        };
    }
    config.validate()?;

    let scraper = build_scraper(&config)?;
    let crawler = Crawler::new(config.crawl.clone(), Arc::new(scraper))?;
    let chunker = Chunker::new(config.chunk.clone())?;
    let sink = DocumentStore::create(&config.storage)?;

    let stats = IngestPipeline::new(crawler, chunker, sink)
        .ingest(&url)
        .await?;

    println!("Pages processed: {}", stats.pages_processed);
    println!("Chunks stored:   {}", stats.chunks_stored);

    Ok(())
}

/// Fetch one or more pages and print what the scraper saw. Multi-URL
/// invocations fan out in bounded batches and report per-URL outcomes.
pub async fn scrape(
    urls: Vec<String>,
    profile: Option<String>,
    no_cache: bool,
    selector: Option<String>,
    attribute: Option<String>,
) -> Result<()> {
    let mut config = load_config(profile.as_deref())?;
    if no_cache {
        config.scrape.cache_enabled = false;
    }

    let scraper = build_scraper(&config)?;

    if urls.len() == 1 {
        let page = scraper.scrape(&urls[0]).await?;

        println!("URL:     {}", page.url);
        println!("Status:  {}", page.status);
        println!("Title:   {}", page.title);
        println!("Links:   {}", page.links.len());
        println!("Cookies: {}", page.cookies.len());
        println!("HTML:    {} bytes", page.html.len());

        if let Some(selector) = selector {
            let values = extract_data(&page.html, &selector, attribute.as_deref())?;
            println!("Matches for '{}': {}", selector, values.len());
            for value in values {
                println!("  {}", value);
            }
        }
        return Ok(());
    }

    for outcome in scraper.scrape_many(&urls).await {
        match outcome.result {
            Ok(page) => println!("ok   {} ({}, {} links)", outcome.url, page.status, page.links.len()),
            Err(e) => println!("FAIL {}: {}", outcome.url, e),
        }
    }

    Ok(())
}

/// Chunk a local text file and print the pieces
pub async fn chunk(
    input: PathBuf,
    size: Option<usize>,
    overlap: Option<usize>,
    max_tokens: Option<usize>,
) -> Result<()> {
    let config = HarvesterConfig::load_default()?;

    let mut settings = config.chunk;
    if let Some(size) = size {
        settings.chunk_size = size;
    }
    if let Some(max_tokens) = max_tokens {
        settings.chunk_size = Chunker::optimal_chunk_size(max_tokens);
    }
    if let Some(overlap) = overlap {
        settings.chunk_overlap = overlap;
    }

    let text = std::fs::read_to_string(&input)
        .context(format!("Failed to read input file: {}", input.display()))?;

    let chunks = Chunker::new(settings)?.split(&text);
    println!("{} chunks from {} characters", chunks.len(), text.chars().count());
    for (index, chunk) in chunks.iter().enumerate() {
        println!("--- chunk {} ({} chars)", index, chunk.chars().count());
        println!("{}", chunk);
    }

    Ok(())
}

/// Submit a file of URLs (one per line) to the durable queue
pub async fn queue_submit(
    file: PathBuf,
    profile: Option<String>,
    priority: Option<i32>,
) -> Result<()> {
    let config = load_config(profile.as_deref())?;
    let queue = connect_queue(&config).await?;

    let contents = std::fs::read_to_string(&file)
        .context(format!("Failed to read URL file: {}", file.display()))?;

    let mut tasks = Vec::new();
    for line in contents.lines() {
        let url = line.trim();
        if url.is_empty() || url.starts_with('#') {
            continue;
        }
        let mut task = ScrapeTask::new(url);
        if let Some(priority) = priority {
            task = task.with_priority(priority);
        }
        tasks.push(task);
    }

    let ids = queue.submit_many(tasks).await?;
    println!("Submitted {} tasks", ids.len());

    Ok(())
}

/// Run queue workers until the process is interrupted
pub async fn queue_work(profile: Option<String>) -> Result<()> {
    let config = load_config(profile.as_deref())?;
    let queue = connect_queue(&config).await?;

    let scraper = build_scraper(&config)?;
    let processor = Arc::new(ScrapeProcessor::new(Arc::new(scraper)));

    info!(
        "Starting {} workers at {}/s against {}",
        config.queue.concurrency, config.queue.rate_limit_per_second, config.queue.redis_url
    );
    let mut results = queue.start(processor);

    while let Some(result) = results.recv().await {
        if result.success {
            println!("ok   {} ({} ms) {}", result.task_id, result.duration_ms, result.url);
        } else {
            println!(
                "FAIL {} ({} ms) {}: {}",
                result.task_id,
                result.duration_ms,
                result.url,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

/// Print queue counters
pub async fn queue_stats(profile: Option<String>) -> Result<()> {
    let config = load_config(profile.as_deref())?;
    let queue = connect_queue(&config).await?;

    let stats = queue.stats().await?;
    println!("Waiting:   {}", stats.waiting);
    println!("Active:    {}", stats.active);
    println!("Delayed:   {}", stats.delayed);
    println!("Completed: {}", stats.completed);
    println!("Failed:    {}", stats.failed);

    Ok(())
}

/// Discard all queued and completed task records
pub async fn queue_clear(profile: Option<String>) -> Result<()> {
    let config = load_config(profile.as_deref())?;
    let queue = connect_queue(&config).await?;

    queue.clear().await?;
    println!("Queue cleared");

    Ok(())
}

async fn connect_queue(config: &HarvesterConfig) -> Result<TaskQueue> {
    // "memory" gives a process-local queue for experiments; anything else is
    // treated as a Redis endpoint
    let store: Arc<dyn TaskStore> = if config.queue.redis_url == "memory" {
        Arc::new(MemoryTaskStore::new())
    } else {
        Arc::new(RedisTaskStore::new(&config.queue.redis_url, &config.queue.key_prefix).await?)
    };
    TaskQueue::new(store, config.queue.clone())
}

/// Load (and optionally probe) a proxy pool, then print its state
pub async fn proxies(file: Option<PathBuf>, check: bool, profile: Option<String>) -> Result<()> {
    let config = load_config(profile.as_deref())?;

    let manager = match config.build_proxy_manager()? {
        Some(manager) => manager,
        None => Arc::new(ProxyManager::new()),
    };
    if let Some(file) = file {
        let added = manager.load_from_file(&file)?;
        println!("Loaded {} proxies from {}", added, file.display());
    }

    if manager.is_empty() {
        warn!("No proxies configured");
        return Ok(());
    }

    if check {
        println!("Checking {} proxies against {}", manager.len(), config.proxy.check_url);
        manager
            .check_all(&config.proxy.check_url, Duration::from_secs(10))
            .await?;
    }

    for snapshot in manager.all() {
        let status = if snapshot.stats.attempts() == 0 {
            "unknown"
        } else if snapshot.stats.is_working {
            "working"
        } else {
            "failing"
        };
        println!(
            "{:<30} {:<8} {:>3}/{:<3} {}",
            snapshot.proxy.connection_string(),
            status,
            snapshot.stats.success_count,
            snapshot.stats.attempts(),
            snapshot.proxy.country.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}

/// List all available configuration profiles
pub async fn list_profiles() -> Result<()> {
    let profiles = HarvesterConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Show or create a specific configuration profile
pub async fn manage_profile(profile_name: String) -> Result<()> {
    match HarvesterConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{:#?}", config);
        }
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = HarvesterConfig::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current default configuration
pub async fn show_config() -> Result<()> {
    let config = HarvesterConfig::load_default()?;
    println!("Current configuration:");
    println!("{:#?}", config);

    Ok(())
}
