//! Storage module for persisting catalog and crawl data
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Products and their append-only change log
//! - Crawl checkpoints used to resume interrupted runs
//! - Archived detail pages that could not be fetched or parsed

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{
    CatalogStore, ChangeLogStore, CheckpointStore, CrawlStore, FailureStore, ProductStore,
    StorageError, StorageResult,
};

use crate::catalog::ChangeType;
use crate::state::CrawlStatus;
use crate::ShelfwatchError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Only the first messages of a run are kept; later ones are counted but dropped
pub const MAX_ERROR_MESSAGES: usize = 100;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> Result<SqliteStorage, ShelfwatchError> {
    SqliteStorage::new(path)
}

/// Progress of one crawl run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlCheckpoint {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    /// Root of the catalog being crawled
    pub base_url: String,
    pub last_page_crawled: u32,
    /// Page count shown by the catalog, once a page reporting it was fetched
    pub total_pages: Option<u32>,
    pub records_crawled: u64,
    pub errors_count: u64,
    pub error_messages: Vec<String>,
    pub status: CrawlStatus,
    pub is_complete: bool,
    pub config_hash: String,
}

impl CrawlCheckpoint {
    /// A fresh in-progress checkpoint; `id` is assigned once stored
    pub fn new(config_hash: impl Into<String>) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            base_url: String::new(),
            last_page_crawled: 0,
            total_pages: None,
            records_crawled: 0,
            errors_count: 0,
            error_messages: Vec::new(),
            status: CrawlStatus::InProgress,
            is_complete: false,
            config_hash: config_hash.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Counts an error and keeps its message while the list has room
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors_count += 1;
        if self.error_messages.len() < MAX_ERROR_MESSAGES {
            self.error_messages.push(message.into());
        }
    }

    /// Marks the run failed and always keeps the fatal message
    pub fn record_fatal(&mut self, message: impl Into<String>) {
        let message = format!("Fatal error: {}", message.into());
        if self.error_messages.len() >= MAX_ERROR_MESSAGES {
            self.error_messages.truncate(MAX_ERROR_MESSAGES - 1);
        }
        self.error_messages.push(message);
        self.status = CrawlStatus::Failed;
        self.is_complete = false;
    }

    /// Sets the final status once the catalog is exhausted
    pub fn finish(&mut self) {
        self.status = CrawlStatus::from_outcome(self.records_crawled, self.errors_count);
        self.is_complete = true;
    }
}

/// A detail page that could not be fetched or parsed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedFetch {
    pub id: i64,
    pub crawl_id: Option<i64>,
    pub url: String,
    pub raw_content: Option<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// A failure about to be archived
#[derive(Debug, Clone, PartialEq)]
pub struct NewFailedFetch {
    pub crawl_id: Option<i64>,
    pub url: String,
    pub raw_content: Option<String>,
    pub reason: String,
}

/// Filter for product listings; price bounds apply to the price including tax
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub rating: Option<u8>,
}

/// Sort order for product listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProductSort {
    #[default]
    Newest,
    Rating,
    Price,
    Reviews,
}

impl ProductSort {
    pub(crate) fn order_by(&self) -> &'static str {
        match self {
            Self::Newest => "created_at DESC, id DESC",
            Self::Rating => "rating DESC, id ASC",
            Self::Price => "price_incl_tax ASC, id ASC",
            Self::Reviews => "num_reviews DESC, id ASC",
        }
    }
}

impl FromStr for ProductSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(Self::Newest),
            "rating" => Ok(Self::Rating),
            "price" => Ok(Self::Price),
            "reviews" => Ok(Self::Reviews),
            other => Err(format!(
                "unknown sort '{}', expected one of: newest, rating, price, reviews",
                other
            )),
        }
    }
}

impl fmt::Display for ProductSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Newest => "newest",
            Self::Rating => "rating",
            Self::Price => "price",
            Self::Reviews => "reviews",
        };
        f.write_str(name)
    }
}

/// Filter for change log listings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeFilter {
    pub product_id: Option<i64>,
    pub change_type: Option<ChangeType>,
}
