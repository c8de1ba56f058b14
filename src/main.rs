//! Shelfwatch main entry point
//!
//! This is the command-line interface for the Shelfwatch catalog crawler.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shelfwatch::catalog::ChangeType;
use shelfwatch::config::{load_config_with_hash, parse_daily_time, Config, DispatchMode};
use shelfwatch::crawler::{build_orchestrator, run_daily, CrawlRunner, Dispatch, RunOutcome};
use shelfwatch::output::{
    list_changes, list_products, load_statistics, print_changes, print_products,
    print_statistics, print_summary,
};
use shelfwatch::queue::{SqliteJobQueue, TaskDispatcher, Worker, CRAWL_CATALOG};
use shelfwatch::storage::{ChangeFilter, ProductFilter, ProductSort, SqliteStorage};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Shelfwatch: a resumable catalog crawler with change tracking
///
/// Shelfwatch walks a book catalog page by page, fetches detail pages in
/// polite concurrent batches, and records every price, availability and
/// rating change it sees between crawls.
#[derive(Parser, Debug)]
#[command(name = "shelfwatch")]
#[command(version)]
#[command(about = "A resumable catalog crawler with change tracking", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the catalog now, resuming a recent unfinished run if there is one
    Crawl {
        /// Diff records immediately instead of enqueueing them
        #[arg(long)]
        inline: bool,
    },

    /// Enqueue a crawl for a worker to pick up
    EnqueueCrawl,

    /// Run queued jobs
    Work {
        /// Run a single job and exit
        #[arg(long, conflicts_with = "watch")]
        once: bool,

        /// Keep polling for jobs instead of exiting when the queue is empty
        #[arg(long)]
        watch: bool,
    },

    /// Crawl once a day at the configured time
    Schedule,

    /// Show statistics from the database and exit
    Stats,

    /// List stored products
    Products {
        #[arg(long)]
        category: Option<String>,

        /// Minimum price including tax
        #[arg(long)]
        min_price: Option<f64>,

        /// Maximum price including tax
        #[arg(long)]
        max_price: Option<f64>,

        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=5))]
        rating: Option<u8>,

        /// newest, rating, price or reviews
        #[arg(long, default_value = "newest")]
        sort: ProductSort,

        #[arg(long, default_value_t = 1)]
        page: u64,

        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..=100))]
        page_size: u64,
    },

    /// List recorded changes, newest first
    Changes {
        #[arg(long)]
        product_id: Option<i64>,

        /// new_product, price_change, availability_change or other
        #[arg(long)]
        change_type: Option<ChangeType>,

        #[arg(long, default_value_t = 1)]
        page: u64,

        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..=100))]
        page_size: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Crawl { inline } => handle_crawl(&config, &config_hash, inline).await,
        Command::EnqueueCrawl => handle_enqueue_crawl(&config),
        Command::Work { once, watch } => handle_work(&config, &config_hash, once, watch).await,
        Command::Schedule => handle_schedule(&config, &config_hash).await,
        Command::Stats => handle_stats(&config),
        Command::Products {
            category,
            min_price,
            max_price,
            rating,
            sort,
            page,
            page_size,
        } => {
            let storage = open_storage(&config)?;
            let filter = ProductFilter {
                category,
                min_price,
                max_price,
                rating,
            };
            print_products(&list_products(&storage, &filter, sort, page, page_size)?);
            Ok(())
        }
        Command::Changes {
            product_id,
            change_type,
            page,
            page_size,
        } => {
            let storage = open_storage(&config)?;
            let filter = ChangeFilter {
                product_id,
                change_type,
            };
            print_changes(&list_changes(&storage, &filter, page, page_size)?);
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("shelfwatch=info,warn"),
            1 => EnvFilter::new("shelfwatch=debug,info"),
            2 => EnvFilter::new("shelfwatch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn database_path(config: &Config) -> &Path {
    Path::new(&config.storage.database_path)
}

fn open_storage(config: &Config) -> Result<SqliteStorage> {
    SqliteStorage::new(database_path(config))
        .with_context(|| format!("failed to open {}", config.storage.database_path))
}

fn open_queue(config: &Config) -> Result<Arc<SqliteJobQueue>> {
    let queue = SqliteJobQueue::new(database_path(config))
        .with_context(|| format!("failed to open job queue in {}", config.storage.database_path))?;
    Ok(Arc::new(queue))
}

/// Runs one crawl and prints its summary
async fn run_crawl(config: &Config, config_hash: &str, inline: bool) -> Result<RunOutcome> {
    let storage = Arc::new(Mutex::new(open_storage(config)?));
    let dispatch = if inline || config.queue.mode == DispatchMode::Inline {
        Dispatch::Inline
    } else {
        let queue: Arc<dyn TaskDispatcher> = open_queue(config)?;
        Dispatch::Queue(queue)
    };

    let runner = CrawlRunner::new(
        storage,
        build_orchestrator(config)?,
        dispatch,
        config.crawler.resume_window_hours,
    )
    .with_config_hash(config_hash);

    let summary = runner.run().await?;
    print_summary(&summary);
    Ok(summary.outcome)
}

async fn handle_crawl(config: &Config, config_hash: &str, inline: bool) -> Result<()> {
    match run_crawl(config, config_hash, inline).await? {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Failed => anyhow::bail!("crawl failed"),
    }
}

fn handle_enqueue_crawl(config: &Config) -> Result<()> {
    let queue = open_queue(config)?;
    let handle = queue.enqueue(CRAWL_CATALOG, serde_json::json!({}))?;
    println!("Enqueued {} as job #{}", handle.name, handle.id);
    Ok(())
}

async fn handle_work(config: &Config, config_hash: &str, once: bool, watch: bool) -> Result<()> {
    let storage = Arc::new(Mutex::new(open_storage(config)?));
    let worker = Worker::new(open_queue(config)?, storage).with_crawler(
        build_orchestrator(config)?,
        config.crawler.resume_window_hours,
        config_hash,
    );

    if once {
        let outcome = worker.run_once().await?;
        tracing::info!("{:?}", outcome);
    } else {
        let poll = Duration::from_millis(config.queue.poll_interval_ms);
        let processed = worker.run(watch, poll).await?;
        println!("Processed {} job(s)", processed);
    }
    Ok(())
}

async fn handle_schedule(config: &Config, config_hash: &str) -> Result<()> {
    let at = parse_daily_time(&config.schedule.daily_at)?;
    tracing::info!("Crawling daily at {} UTC", config.schedule.daily_at);

    run_daily(at, || async {
        if let Err(e) = run_crawl(config, config_hash, false).await {
            tracing::error!("Scheduled crawl failed: {:#}", e);
        }
    })
    .await;

    Ok(())
}

fn handle_stats(config: &Config) -> Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = open_storage(config)?;
    let queue = open_queue(config)?;
    let stats = load_statistics(&storage, Some(queue.as_ref()))?;
    print_statistics(&stats);

    Ok(())
}
