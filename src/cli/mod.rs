//! Command-line interface.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::browser::CdpDriver;
use crate::checkpoint::{overlay_availability, CheckpointStore, Stage};
use crate::config::Settings;
use crate::listing::ListingCrawler;
use crate::model::ProductRecord;
use crate::pool::{CheckpointedPool, CrawlEvent};
use crate::session::Driver;

#[derive(Parser)]
#[command(name = "sizewatch")]
#[command(about = "Sale-listing crawler that tracks per-color size availability")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to sizewatch.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the listing and resolve size availability in one run
    Crawl {
        /// Listing page to crawl (overrides the config)
        #[arg(long, env = "SIZEWATCH_LISTING_URL")]
        listing_url: Option<String>,
        /// Concurrent browser sessions (overrides the config)
        #[arg(short = 'w', long)]
        concurrency: Option<usize>,
        /// Limit number of products to resolve (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: usize,
        /// Run the browser with a visible window
        #[arg(long)]
        no_headless: bool,
    },

    /// Resolve size availability for an existing listing checkpoint
    Sizes {
        /// Concurrent browser sessions (overrides the config)
        #[arg(short = 'w', long)]
        concurrency: Option<usize>,
        /// Limit number of products to resolve (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: usize,
        /// Run the browser with a visible window
        #[arg(long)]
        no_headless: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Crawl {
            listing_url,
            concurrency,
            limit,
            no_headless,
        } => {
            if let Some(url) = listing_url {
                settings.listing_url = url;
            }
            apply_overrides(&mut settings, concurrency, no_headless);
            cmd_crawl(settings, limit).await
        }
        Commands::Sizes {
            concurrency,
            limit,
            no_headless,
        } => {
            apply_overrides(&mut settings, concurrency, no_headless);
            cmd_sizes(settings, limit).await
        }
    }
}

fn apply_overrides(settings: &mut Settings, concurrency: Option<usize>, no_headless: bool) {
    if let Some(workers) = concurrency {
        settings.engine.concurrency = workers;
    }
    if no_headless {
        settings.headless = false;
    }
}

/// Crawl the listing, checkpoint it, then walk the variants.
async fn cmd_crawl(settings: Settings, limit: usize) -> Result<()> {
    let driver = Arc::new(CdpDriver::launch(&settings).await?);

    println!(
        "{} Crawling listing {}",
        style("→").cyan(),
        style(&settings.listing_url).bold()
    );
    let records = {
        let session = driver.open_session().await?;
        let crawler = ListingCrawler::new(&settings.engine, &settings.selectors);
        let result = crawler.crawl(session.as_ref(), &settings.listing_url).await;
        if let Err(err) = session.close().await {
            tracing::debug!(error = %err, "closing listing session failed");
        }
        result?
    };
    println!(
        "{} Found {} products",
        style("✓").green(),
        records.len()
    );

    let listing_store = CheckpointStore::new(
        &settings.listing_csv,
        Stage::Listing,
        &settings.engine.color_param,
    );
    listing_store.write(&records)?;

    resolve_sizes(&settings, driver.clone(), records, limit).await?;
    shutdown(driver).await;
    Ok(())
}

/// Walk the variants for a listing checkpoint produced earlier.
async fn cmd_sizes(settings: Settings, limit: usize) -> Result<()> {
    let listing_store = CheckpointStore::new(
        &settings.listing_csv,
        Stage::Listing,
        &settings.engine.color_param,
    );
    let mut records = listing_store.load().with_context(|| {
        format!(
            "loading listing checkpoint {} (run `sizewatch crawl` first)",
            settings.listing_csv.display()
        )
    })?;

    let sizes_store = CheckpointStore::new(
        &settings.sizes_csv,
        Stage::Sizes,
        &settings.engine.color_param,
    );
    if sizes_store.exists() {
        let previous = sizes_store.load()?;
        overlay_availability(&mut records, &previous);
        let resolved = records.iter().filter(|r| !r.needs_sizes()).count();
        println!(
            "{} Resuming: {} of {} products already resolved",
            style("→").cyan(),
            resolved,
            records.len()
        );
    }

    let driver = Arc::new(CdpDriver::launch(&settings).await?);
    resolve_sizes(&settings, driver.clone(), records, limit).await?;
    shutdown(driver).await;
    Ok(())
}

async fn resolve_sizes(
    settings: &Settings,
    driver: Arc<CdpDriver>,
    mut records: Vec<ProductRecord>,
    limit: usize,
) -> Result<()> {
    if limit > 0 && records.len() > limit {
        records.truncate(limit);
    }

    let sizes_store = CheckpointStore::new(
        &settings.sizes_csv,
        Stage::Sizes,
        &settings.engine.color_param,
    );
    let pool = CheckpointedPool::new(
        driver,
        Arc::new(sizes_store),
        &settings.engine,
        &settings.selectors,
    )?;

    let pending = records.iter().filter(|r| r.needs_sizes()).count() as u64;
    let (event_tx, event_rx) = mpsc::channel(100);
    let progress = spawn_progress(pending, event_rx);

    pool.run(&mut records, event_tx).await?;
    progress.await.ok();

    let unavailable = records
        .iter()
        .filter(|r| r.sizes.as_deref() == Some(crate::model::UNAVAILABLE))
        .count();
    println!(
        "{} Resolved {} products ({} unavailable) → {}",
        style("✓").green(),
        records.len(),
        unavailable,
        settings.sizes_csv.display()
    );
    Ok(())
}

/// Render crawl events as a progress bar until the channel closes.
fn spawn_progress(total: u64, mut event_rx: mpsc::Receiver<CrawlEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        while let Some(event) = event_rx.recv().await {
            match event {
                CrawlEvent::ProductDone { id, availability } => {
                    pb.inc(1);
                    pb.set_message(format!("{id}: {availability}"));
                }
                CrawlEvent::Flushed { products } => {
                    pb.set_message(format!("checkpoint written ({products} products)"));
                }
            }
        }
        pb.finish_and_clear();
    })
}

async fn shutdown(driver: Arc<CdpDriver>) {
    match Arc::try_unwrap(driver) {
        Ok(driver) => {
            if let Err(err) = driver.shutdown().await {
                tracing::debug!(error = %err, "browser shutdown failed");
            }
        }
        Err(_) => tracing::debug!("browser still referenced, skipping shutdown"),
    }
}
