pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Mirror logs into a file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a site and ingest its content
    Crawl {
        /// Seed URL to start crawling from
        #[arg(required = true)]
        url: String,

        /// Site profile to use
        #[arg(short, long)]
        profile: Option<String>,

        /// Maximum crawling depth
        #[arg(short, long)]
        depth: Option<u32>,

        /// Maximum number of pages to crawl
        #[arg(short, long)]
        limit: Option<u32>,

        /// Write chunk records to this JSON-lines file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fetch one or more pages and print what the scraper saw
    Scrape {
        /// URLs to fetch; batches run with bounded concurrency
        #[arg(required = true, num_args = 1..)]
        urls: Vec<String>,

        /// Site profile to use
        #[arg(short, long)]
        profile: Option<String>,

        /// Bypass the page cache
        #[arg(long)]
        no_cache: bool,

        /// CSS selector to extract from the fetched page
        #[arg(short, long)]
        selector: Option<String>,

        /// Attribute to read from selected elements instead of their text
        #[arg(short, long, requires = "selector")]
        attribute: Option<String>,
    },

    /// Split a local text file into embedding-sized chunks
    Chunk {
        /// Input text file
        #[arg(required = true)]
        input: PathBuf,

        /// Maximum chunk size in characters
        #[arg(short, long)]
        size: Option<usize>,

        /// Overlap between adjacent chunks in characters
        #[arg(long)]
        overlap: Option<usize>,

        /// Derive the chunk size from an embedding model's token limit
        #[arg(long, conflicts_with = "size")]
        max_tokens: Option<usize>,
    },

    /// Operate the durable scraping task queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Inspect or probe the proxy pool
    Proxies {
        /// Additional proxy file to load
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Probe every proxy before printing
        #[arg(short, long)]
        check: bool,

        /// Site profile to use
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Submit a file of URLs, one per line
    Submit {
        /// File of URLs to enqueue
        #[arg(required = true)]
        file: PathBuf,

        /// Site profile to use
        #[arg(short, long)]
        profile: Option<String>,

        /// Task priority (lower value runs sooner)
        #[arg(long)]
        priority: Option<i32>,
    },

    /// Run workers until interrupted
    Work {
        /// Site profile to use
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Print queue counters
    Stats {
        /// Site profile to use
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Discard all queued and completed task records
    Clear {
        /// Site profile to use
        #[arg(short, long)]
        profile: Option<String>,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Crawl {
            url,
            profile,
            depth,
            limit,
            output,
        } => {
            info!("Starting crawl on {}", url);
            commands::crawl(url, profile, depth, limit, output).await
        }
        Commands::Scrape {
            urls,
            profile,
            no_cache,
            selector,
            attribute,
        } => commands::scrape(urls, profile, no_cache, selector, attribute).await,
        Commands::Chunk {
            input,
            size,
            overlap,
            max_tokens,
        } => commands::chunk(input, size, overlap, max_tokens).await,
        Commands::Queue { action } => match action {
            QueueAction::Submit {
                file,
                profile,
                priority,
            } => commands::queue_submit(file, profile, priority).await,
            QueueAction::Work { profile } => commands::queue_work(profile).await,
            QueueAction::Stats { profile } => commands::queue_stats(profile).await,
            QueueAction::Clear { profile } => commands::queue_clear(profile).await,
        },
        Commands::Proxies {
            file,
            check,
            profile,
        } => commands::proxies(file, check, profile).await,
        Commands::Config { profile, list } => {
            if list {
                commands::list_profiles().await
            } else if let Some(profile_name) = profile {
                commands::manage_profile(profile_name).await
            } else {
                commands::show_config().await
            }
        }
    }
}
