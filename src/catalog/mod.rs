//! Catalog domain: crawled records, stored products and the change log
//!
//! # Components
//!
//! - `CrawledRecord`: one parsed detail page, keyed by its source URL
//! - `Product`: the stored counterpart of a record
//! - `ChangeDetector`: diffs records against products and appends `ChangeEvent`s

mod detector;
mod events;
mod fields;
mod record;

pub use detector::{ChangeDetector, ProcessOutcome};
pub use events::{ChangeEvent, ChangeType, NewChangeEvent};
pub use fields::{format_price, TrackedField, TRACKED_FIELDS};
pub use record::{CrawledRecord, Product, ProductFields, RecordError};
