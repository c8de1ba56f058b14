//! Output module for reporting on the catalog
//!
//! This module provides:
//! - Statistics over products, changes, failures, jobs and the latest crawl
//! - Paged product and change log listings
//! - Crawl summaries

mod listing;
mod stats;

pub use listing::{
    list_changes, list_products, print_changes, print_products, print_summary, Page,
};
pub use stats::{load_statistics, print_statistics, CatalogStatistics};
