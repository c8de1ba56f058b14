//! Diffing crawled records against stored products

use crate::catalog::events::{ChangeType, NewChangeEvent};
use crate::catalog::fields::{TrackedField, TRACKED_FIELDS};
use crate::catalog::record::CrawledRecord;
use crate::storage::{CatalogStore, StorageResult};
use serde::Serialize;

/// What happened to a single crawled record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Created { product_id: i64 },
    Updated { product_id: i64, changes: usize },
    Unchanged { product_id: i64 },
    Error { message: String },
}

impl ProcessOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Unchanged { .. } => "unchanged",
            Self::Error { .. } => "error",
        }
    }
}

/// Compares records with the stored product sharing their source URL
///
/// A record whose content hash matches the stored one is left alone. Otherwise
/// every tracked field that differs produces one change event and the stored
/// product is overwritten, except for its original HTML snapshot. Events and
/// the product write are committed together.
pub struct ChangeDetector {
    tracked: &'static [TrackedField],
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self {
            tracked: TRACKED_FIELDS,
        }
    }

    /// Processes one record; failures are reported in the outcome, never raised
    pub fn process<S>(&self, store: &mut S, record: &CrawledRecord) -> ProcessOutcome
    where
        S: CatalogStore + ?Sized,
    {
        if let Err(e) = record.validate() {
            tracing::warn!("Rejected record from {}: {}", record.source_url, e);
            return ProcessOutcome::Error {
                message: format!("Invalid record: {}", e),
            };
        }

        match self.apply(store, record) {
            Ok(outcome) => {
                tracing::debug!("{} -> {}", record.source_url, outcome.as_str());
                outcome
            }
            Err(e) => {
                tracing::error!("Failed to process {}: {}", record.source_url, e);
                ProcessOutcome::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    fn apply<S>(&self, store: &mut S, record: &CrawledRecord) -> StorageResult<ProcessOutcome>
    where
        S: CatalogStore + ?Sized,
    {
        let Some(mut existing) = store.find_by_source_url(&record.source_url)? else {
            let event = NewChangeEvent {
                product_id: 0,
                product_name: record.fields.name.clone(),
                change_type: ChangeType::NewProduct,
                field_changed: None,
                old_value: None,
                new_value: Some(record.fields.name.clone()),
                crawl_id: record.crawl_id,
            };
            let product = store.create_product_logged(record, event)?;
            tracing::info!("New product: {}", product.fields.name);
            return Ok(ProcessOutcome::Created {
                product_id: product.id,
            });
        };

        if existing.content_hash == record.content_hash {
            return Ok(ProcessOutcome::Unchanged {
                product_id: existing.id,
            });
        }

        let product_name = existing.fields.name.clone();
        let changes: Vec<NewChangeEvent> = self
            .tracked
            .iter()
            .filter_map(|field| {
                let (old_value, new_value) = field.diff(&existing.fields, &record.fields)?;
                Some(NewChangeEvent {
                    product_id: existing.id,
                    product_name: product_name.clone(),
                    change_type: field.change_type,
                    field_changed: Some(field.name.to_string()),
                    old_value: Some(old_value),
                    new_value: Some(new_value),
                    crawl_id: record.crawl_id,
                })
            })
            .collect();

        existing.apply_record(record);
        store.update_product_logged(&existing, &changes)?;

        if !changes.is_empty() {
            tracing::info!(
                "{} change(s) detected for {}",
                changes.len(),
                record.fields.name
            );
        }

        Ok(ProcessOutcome::Updated {
            product_id: existing.id,
            changes: changes.len(),
        })
    }
}
