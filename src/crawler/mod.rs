//! Crawler module for walking the catalog
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with exponential backoff
//! - Catalog and detail page parsing
//! - The producer task that walks pages in concurrent batches
//! - The runner that checkpoints progress and dispatches records
//! - The daily schedule

mod fetcher;
mod orchestrator;
mod parser;
mod runner;
mod schedule;

pub use fetcher::{build_http_client, FetchFailure, Fetcher, RetryPolicy};
pub use orchestrator::{
    CrawlEvent, CrawlOrchestrator, CrawlStream, FETCH_FAILED_REASON, PARSE_FAILED_REASON,
};
pub use parser::{catalog_url, BookPageParser, CatalogPage, PageParser, ParseFailure};
pub use runner::{CrawlRunner, CrawlSummary, Dispatch, RunOutcome};
pub use schedule::{next_run_after, run_daily};

use crate::config::Config;
use crate::ShelfwatchError;
use std::time::Duration;

/// Builds the client, fetcher and orchestrator described by `config`
pub fn build_orchestrator(config: &Config) -> Result<CrawlOrchestrator, ShelfwatchError> {
    let client = build_http_client(
        &config.user_agent,
        Duration::from_secs(config.crawler.timeout_secs),
    )?;
    let fetcher = Fetcher::new(client, RetryPolicy::from_config(&config.crawler));
    Ok(CrawlOrchestrator::new(fetcher, &config.crawler))
}
