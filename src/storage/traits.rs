//! Storage traits and error types
//!
//! The repository is split by concern so the change detector only needs
//! product and change-log access, while the crawl runner needs all of it.

use crate::catalog::{ChangeEvent, ChangeType, CrawledRecord, NewChangeEvent, Product};
use crate::storage::{
    ChangeFilter, CrawlCheckpoint, FailedFetch, NewFailedFetch, ProductFilter, ProductSort,
};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Product not found: {0}")]
    ProductNotFound(i64),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(i64),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Products keyed by their source URL
pub trait ProductStore {
    fn find_by_source_url(&self, source_url: &str) -> StorageResult<Option<Product>>;

    fn find_product(&self, id: i64) -> StorageResult<Option<Product>>;

    /// Inserts a product from its first crawled record
    ///
    /// Fails with `ConstraintViolation` if the source URL is already stored.
    fn create_product(&mut self, record: &CrawledRecord) -> StorageResult<Product>;

    /// Writes every field back except the HTML snapshot and creation time
    fn update_product(&mut self, product: &Product) -> StorageResult<()>;

    /// Inserts records in one transaction, skipping source URLs already stored
    ///
    /// Returns the number of products created.
    fn bulk_create_products(&mut self, records: &[CrawledRecord]) -> StorageResult<usize>;

    /// Lists one page of products and the total matching the filter
    fn list_products(
        &self,
        filter: &ProductFilter,
        sort: ProductSort,
        skip: u64,
        limit: u64,
    ) -> StorageResult<(Vec<Product>, u64)>;

    fn count_products(&self) -> StorageResult<u64>;
}

/// The append-only change log
pub trait ChangeLogStore {
    fn record_change(&mut self, change: &NewChangeEvent) -> StorageResult<ChangeEvent>;

    /// Lists changes newest first with the total matching the filter
    fn list_changes(
        &self,
        filter: &ChangeFilter,
        skip: u64,
        limit: u64,
    ) -> StorageResult<(Vec<ChangeEvent>, u64)>;

    fn count_changes_by_type(&self) -> StorageResult<Vec<(ChangeType, u64)>>;
}

/// Persisted crawl progress
pub trait CheckpointStore {
    /// Stores a new checkpoint and returns its id
    fn create_checkpoint(&mut self, checkpoint: &CrawlCheckpoint) -> StorageResult<i64>;

    fn update_checkpoint(&mut self, checkpoint: &CrawlCheckpoint) -> StorageResult<()>;

    fn get_latest_checkpoint(&self) -> StorageResult<Option<CrawlCheckpoint>>;

    /// Most recent unfinished checkpoint started within the window
    ///
    /// Only `in_progress` and `partial` checkpoints are considered.
    fn get_latest_incomplete_within(
        &self,
        window_hours: u32,
    ) -> StorageResult<Option<CrawlCheckpoint>>;
}

/// Archive of detail pages that could not be fetched or parsed
pub trait FailureStore {
    fn record_failure(&mut self, failure: &NewFailedFetch) -> StorageResult<FailedFetch>;

    /// Lists archived failures newest first, optionally for one crawl
    fn list_failures(
        &self,
        crawl_id: Option<i64>,
        skip: u64,
        limit: u64,
    ) -> StorageResult<(Vec<FailedFetch>, u64)>;

    fn count_failures(&self) -> StorageResult<u64>;
}

/// Product writes that land together with their change events or not at all
pub trait CatalogStore: ProductStore + ChangeLogStore {
    /// Creates the product and its `new_product` event in one transaction
    ///
    /// The event's `product_id` is replaced with the id of the new product.
    fn create_product_logged(
        &mut self,
        record: &CrawledRecord,
        event: NewChangeEvent,
    ) -> StorageResult<Product>;

    /// Appends `changes` and overwrites the product in one transaction
    fn update_product_logged(
        &mut self,
        product: &Product,
        changes: &[NewChangeEvent],
    ) -> StorageResult<()>;
}

/// Everything a crawl run writes to
pub trait CrawlStore: CatalogStore + CheckpointStore + FailureStore {}

impl<T> CrawlStore for T where T: CatalogStore + CheckpointStore + FailureStore {}
