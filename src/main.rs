use anyhow::Result;
use tracing::{error, info};

mod browser;
mod chunker;
mod cli;
mod crawler;
mod pipeline;
mod proxy;
mod queue;
mod scraper;
mod storage;
mod utils;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args();

    utils::logging::init_logging(args.verbose, args.log_file.clone())?;
    info!("Starting Site Harvester v{}", env!("CARGO_PKG_VERSION"));

    match cli::process_command(args).await {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("Command failed: {:#}", e);
            Err(e)
        }
    }
}
