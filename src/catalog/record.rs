//! Crawled records and their persisted counterpart

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Reasons a crawled record is rejected before comparison
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("Required field '{0}' is empty")]
    MissingField(&'static str),

    #[error("Field '{field}' must be a non-negative number, got {value}")]
    InvalidPrice { field: &'static str, value: f64 },

    #[error("Rating must be between 0 and 5, got {0}")]
    RatingOutOfRange(u8),

    #[error("Invalid source URL '{0}'")]
    InvalidUrl(String),
}

/// The descriptive fields shared by crawled records and stored products
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFields {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "unknown")]
    pub category: String,
    pub price_excl_tax: f64,
    pub price_incl_tax: f64,
    pub availability: String,
    #[serde(default)]
    pub num_reviews: u32,
    #[serde(default)]
    pub image_url: String,
    pub rating: u8,
}

fn unknown() -> String {
    "Unknown".to_string()
}

impl ProductFields {
    /// Hashes the fields whose change should trigger a diff
    ///
    /// Only name, both prices, availability and review count take part, so
    /// description, category, image and rating edits never change the hash.
    pub fn content_hash(&self) -> String {
        let content = format!(
            "{}|{:.2}|{:.2}|{}|{}",
            self.name, self.price_excl_tax, self.price_incl_tax, self.availability, self.num_reviews
        );
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A record produced by parsing one detail page
///
/// `source_url` is the business key used to find the stored product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledRecord {
    #[serde(flatten)]
    pub fields: ProductFields,
    pub source_url: String,
    #[serde(default)]
    pub html_snapshot: String,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawl_id: Option<i64>,
}

impl CrawledRecord {
    /// Builds a record and derives its content hash
    pub fn new(source_url: impl Into<String>, fields: ProductFields, html_snapshot: String) -> Self {
        let content_hash = fields.content_hash();
        Self {
            fields,
            source_url: source_url.into(),
            html_snapshot,
            content_hash,
            crawl_id: None,
        }
    }

    /// Tags the record with the checkpoint of the run that produced it
    pub fn with_crawl_id(mut self, crawl_id: Option<i64>) -> Self {
        self.crawl_id = crawl_id;
        self
    }

    pub fn name(&self) -> &str {
        &self.fields.name
    }

    /// Checks the fields the change detector relies on
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.fields.name.trim().is_empty() {
            return Err(RecordError::MissingField("name"));
        }
        if self.source_url.trim().is_empty() {
            return Err(RecordError::MissingField("source_url"));
        }
        if self.content_hash.is_empty() {
            return Err(RecordError::MissingField("content_hash"));
        }
        if self.fields.availability.trim().is_empty() {
            return Err(RecordError::MissingField("availability"));
        }

        for (field, value) in [
            ("price_excl_tax", self.fields.price_excl_tax),
            ("price_incl_tax", self.fields.price_incl_tax),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(RecordError::InvalidPrice { field, value });
            }
        }

        if self.fields.rating > 5 {
            return Err(RecordError::RatingOutOfRange(self.fields.rating));
        }

        Url::parse(&self.source_url).map_err(|_| RecordError::InvalidUrl(self.source_url.clone()))?;

        Ok(())
    }
}

/// A product as stored in the repository
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: i64,
    #[serde(flatten)]
    pub fields: ProductFields,
    pub source_url: String,
    /// Raw page captured on first sighting; re-crawls never replace it
    #[serde(skip)]
    pub html_snapshot: String,
    pub content_hash: String,
    pub crawl_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Overwrites the stored fields with a re-crawled record, keeping the snapshot
    pub fn apply_record(&mut self, record: &CrawledRecord) {
        self.fields = record.fields.clone();
        self.source_url = record.source_url.clone();
        self.content_hash = record.content_hash.clone();
        self.crawl_timestamp = Utc::now();
    }
}
