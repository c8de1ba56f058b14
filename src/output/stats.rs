//! Statistics generation from the catalog database
//!
//! This module provides functionality for extracting and displaying
//! catalog and crawl statistics from the storage layer.

use crate::catalog::ChangeType;
use crate::queue::{JobStatus, SqliteJobQueue};
use crate::storage::{ChangeLogStore, CheckpointStore, CrawlCheckpoint, FailureStore, ProductStore};
use crate::ShelfwatchError;
use serde::Serialize;

/// Catalog statistics summary
#[derive(Debug, Clone, Serialize)]
pub struct CatalogStatistics {
    /// Number of stored products
    pub total_products: u64,

    /// Change log entries by type; every type is present
    pub changes_by_type: Vec<(ChangeType, u64)>,

    /// Detail pages archived as unfetchable or unparsable
    pub failed_fetches: u64,

    /// Queue depth by status, when a queue is attached
    pub jobs_by_status: Option<Vec<(JobStatus, u64)>>,

    /// Most recently started crawl
    pub latest_checkpoint: Option<CrawlCheckpoint>,
}

impl CatalogStatistics {
    pub fn total_changes(&self) -> u64 {
        self.changes_by_type.iter().map(|(_, count)| count).sum()
    }
}

/// Loads statistics from storage
pub fn load_statistics<S>(
    storage: &S,
    queue: Option<&SqliteJobQueue>,
) -> Result<CatalogStatistics, ShelfwatchError>
where
    S: ProductStore + ChangeLogStore + CheckpointStore + FailureStore + ?Sized,
{
    let total_products = storage.count_products()?;

    let stored = storage.count_changes_by_type()?;
    let changes_by_type = ChangeType::all_types()
        .into_iter()
        .map(|change_type| {
            let count = stored
                .iter()
                .find(|(t, _)| *t == change_type)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            (change_type, count)
        })
        .collect();

    let failed_fetches = storage.count_failures()?;
    let jobs_by_status = queue.map(|q| q.count_by_status()).transpose()?;
    let latest_checkpoint = storage.get_latest_checkpoint()?;

    Ok(CatalogStatistics {
        total_products,
        changes_by_type,
        failed_fetches,
        jobs_by_status,
        latest_checkpoint,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CatalogStatistics) {
    println!("=== Catalog Statistics ===\n");

    println!("Overview:");
    println!("  Products tracked: {}", stats.total_products);
    println!("  Changes recorded: {}", stats.total_changes());
    println!("  Failed fetches archived: {}", stats.failed_fetches);
    println!();

    println!("Changes by Type:");
    for (change_type, count) in &stats.changes_by_type {
        let percentage = if stats.total_changes() > 0 {
            (*count as f64 / stats.total_changes() as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", change_type, count, percentage);
    }
    println!();

    if let Some(jobs) = &stats.jobs_by_status {
        println!("Job Queue:");
        for (status, count) in jobs {
            println!("  {}: {}", status, count);
        }
        println!();
    }

    match &stats.latest_checkpoint {
        Some(checkpoint) => {
            println!("Latest Crawl (#{}):", checkpoint.id);
            println!("  Started: {}", checkpoint.timestamp.to_rfc3339());
            println!("  Status: {}", checkpoint.status);
            println!("  Complete: {}", if checkpoint.is_complete { "yes" } else { "no" });
            println!("  Last page crawled: {}", checkpoint.last_page_crawled);
            println!("  Records crawled: {}", checkpoint.records_crawled);
            println!("  Errors: {}", checkpoint.errors_count);
            if let Some(last) = checkpoint.error_messages.last() {
                println!("  Last error: {}", last);
            }
        }
        None => println!("No crawl has run yet."),
    }
}
