/// Checkpoint status definitions for crawl runs
use serde::Serialize;
use std::fmt;

/// Represents the status recorded on a crawl checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    /// The run is still producing pages
    InProgress,

    /// The run finished without recording a single error
    Success,

    /// The run finished with errors but produced at least one record
    Partial,

    /// The run produced nothing but errors, or stopped on a fatal error
    Failed,
}

impl CrawlStatus {
    /// Returns true if an unfinished checkpoint in this status may be resumed
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::InProgress | Self::Partial)
    }

    /// Derives the final status of a run that reached the end of the catalog
    pub fn from_outcome(records_crawled: u64, errors_count: u64) -> Self {
        if errors_count == 0 {
            Self::Success
        } else if records_crawled > 0 {
            Self::Partial
        } else {
            Self::Failed
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all_statuses() -> Vec<Self> {
        vec![Self::InProgress, Self::Success, Self::Partial, Self::Failed]
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
