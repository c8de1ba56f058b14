//! Background job queue
//!
//! Crawled records can be handed to a queue instead of being diffed inline.
//! Jobs are stored in SQLite and picked up by a [`Worker`], which is also how
//! a scheduled crawl is triggered (`crawl_catalog`).

mod sqlite_queue;
mod worker;

pub use sqlite_queue::SqliteJobQueue;
pub use worker::{JobOutcome, Worker};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Diffs one crawled record against the stored catalog
pub const PROCESS_CRAWLED_RECORD: &str = "process_crawled_record";

/// Runs a full catalog crawl in queue mode
pub const CRAWL_CATALOG: &str = "crawl_catalog";

/// Errors raised while enqueueing or running jobs
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Unknown job name: {0}")]
    UnknownJob(String),

    #[error("Queue lock poisoned")]
    LockPoisoned,
}

/// Returned by a successful enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: i64,
    pub name: String,
}

/// Anything that accepts named jobs with a JSON payload
pub trait TaskDispatcher: Send + Sync {
    fn enqueue(&self, job_name: &str, payload: serde_json::Value) -> Result<JobHandle, QueueError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn all_statuses() -> [Self; 4] {
        [Self::Pending, Self::Running, Self::Done, Self::Failed]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// A stored job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub result: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_roundtrip() {
        for status in JobStatus::all_statuses() {
            assert_eq!(JobStatus::from_db_string(status.to_db_string()), Some(status));
        }
        assert_eq!(JobStatus::from_db_string("queued"), None);
    }
}
