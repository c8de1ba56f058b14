//! The table of fields whose differences are written to the change log

use crate::catalog::events::ChangeType;
use crate::catalog::record::ProductFields;

/// One row of the tracked-field table
pub struct TrackedField {
    pub name: &'static str,
    pub change_type: ChangeType,
    render: fn(&ProductFields) -> String,
}

impl TrackedField {
    /// Renders the field the way it is stored in the change log
    pub fn render(&self, fields: &ProductFields) -> String {
        (self.render)(fields)
    }

    /// Returns the old and new rendered values when they differ
    pub fn diff(&self, old: &ProductFields, new: &ProductFields) -> Option<(String, String)> {
        let before = self.render(old);
        let after = self.render(new);
        (before != after).then_some((before, after))
    }
}

pub fn format_price(value: f64) -> String {
    format!("£{:.2}", value)
}

/// Compared in this order; events are emitted in the same order
pub static TRACKED_FIELDS: &[TrackedField] = &[
    TrackedField {
        name: "price_incl_tax",
        change_type: ChangeType::PriceChange,
        render: |f| format_price(f.price_incl_tax),
    },
    TrackedField {
        name: "price_excl_tax",
        change_type: ChangeType::PriceChange,
        render: |f| format_price(f.price_excl_tax),
    },
    TrackedField {
        name: "availability",
        change_type: ChangeType::AvailabilityChange,
        render: |f| f.availability.clone(),
    },
    TrackedField {
        name: "rating",
        change_type: ChangeType::Other,
        render: |f| f.rating.to_string(),
    },
    TrackedField {
        name: "num_reviews",
        change_type: ChangeType::Other,
        render: |f| f.num_reviews.to_string(),
    },
];
