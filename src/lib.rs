//! Shelfwatch: a resumable catalog crawler with change tracking
//!
//! This crate paginates a remote book catalog, fetches detail pages in bounded
//! concurrent batches, checkpoints its progress so an interrupted run can
//! resume, and diffs every crawled record against the stored product to build
//! an append-only change log.

pub mod catalog;
pub mod config;
pub mod crawler;
pub mod output;
pub mod queue;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Shelfwatch operations
#[derive(Debug, Error)]
pub enum ShelfwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid crawl phase transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::CrawlPhase,
        to: state::CrawlPhase,
    },

    #[error("Crawl producer stopped unexpectedly: {0}")]
    Producer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Shelfwatch operations
pub type Result<T> = std::result::Result<T, ShelfwatchError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use catalog::{ChangeDetector, ChangeEvent, ChangeType, CrawledRecord, ProcessOutcome, Product};
pub use config::Config;
pub use crawler::{CrawlOrchestrator, CrawlRunner, CrawlSummary, Fetcher};
pub use state::{CrawlPhase, CrawlStatus};
