//! Change log entries

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Classification of a change log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    NewProduct,
    PriceChange,
    AvailabilityChange,
    Other,
}

impl ChangeType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::NewProduct => "new_product",
            Self::PriceChange => "price_change",
            Self::AvailabilityChange => "availability_change",
            Self::Other => "other",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "new_product" => Some(Self::NewProduct),
            "price_change" => Some(Self::PriceChange),
            "availability_change" => Some(Self::AvailabilityChange),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn all_types() -> [Self; 4] {
        [
            Self::NewProduct,
            Self::PriceChange,
            Self::AvailabilityChange,
            Self::Other,
        ]
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_string(s).ok_or_else(|| {
            format!(
                "unknown change type '{}', expected one of: new_product, price_change, availability_change, other",
                s
            )
        })
    }
}

/// A change about to be appended to the log
#[derive(Debug, Clone, PartialEq)]
pub struct NewChangeEvent {
    pub product_id: i64,
    pub product_name: String,
    pub change_type: ChangeType,
    pub field_changed: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub crawl_id: Option<i64>,
}

/// A persisted change log entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub change_type: ChangeType,
    pub field_changed: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub crawl_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}
