//! SQLite-backed job queue

use crate::queue::{Job, JobHandle, JobStatus, QueueError, TaskDispatcher};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const JOBS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    result TEXT,
    enqueued_at TEXT NOT NULL,
    finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, id);
"#;

const JOB_COLUMNS: &str = "id, name, payload, status, attempts, result, enqueued_at, finished_at";

/// Job queue sharing the catalog database file through its own connection
pub struct SqliteJobQueue {
    conn: Mutex<Connection>,
}

fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let raw_payload: String = row.get(2)?;
    let payload = serde_json::from_str(&raw_payload)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let raw_status: String = row.get(3)?;
    let status = JobStatus::from_db_string(&raw_status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown job status '{}'", raw_status).into(),
        )
    })?;
    let enqueued_at: String = row.get(6)?;
    let finished_at: Option<String> = row.get(7)?;

    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        payload,
        status,
        attempts: row.get(4)?,
        result: row.get(5)?,
        enqueued_at: parse_time(6, &enqueued_at)?,
        finished_at: finished_at.map(|raw| parse_time(7, &raw)).transpose()?,
    })
}

impl SqliteJobQueue {
    pub fn new(path: &Path) -> Result<Self, QueueError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        conn.execute_batch(JOBS_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn new_in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(JOBS_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, QueueError> {
        self.conn.lock().map_err(|_| QueueError::LockPoisoned)
    }

    #[cfg(test)]
    pub(crate) fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&conn)
    }

    /// Marks the oldest pending job as running and returns it
    ///
    /// The select and update run inside `BEGIN IMMEDIATE` so two workers on
    /// the same database never claim the same job.
    pub fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let sql = format!(
            "SELECT {} FROM jobs WHERE status = ?1 ORDER BY id ASC LIMIT 1",
            JOB_COLUMNS
        );
        let job = tx
            .query_row(&sql, params![JobStatus::Pending.to_db_string()], job_from_row)
            .optional()?;

        let Some(mut job) = job else {
            tx.commit()?;
            return Ok(None);
        };

        tx.execute(
            "UPDATE jobs SET status = ?1, attempts = attempts + 1 WHERE id = ?2",
            params![JobStatus::Running.to_db_string(), job.id],
        )?;
        tx.commit()?;

        job.status = JobStatus::Running;
        job.attempts += 1;
        Ok(Some(job))
    }

    pub fn complete(&self, id: i64, result: &str) -> Result<(), QueueError> {
        self.finish(id, JobStatus::Done, result)
    }

    pub fn fail(&self, id: i64, reason: &str) -> Result<(), QueueError> {
        self.finish(id, JobStatus::Failed, reason)
    }

    fn finish(&self, id: i64, status: JobStatus, result: &str) -> Result<(), QueueError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE jobs SET status = ?1, result = ?2, finished_at = ?3 WHERE id = ?4",
            params![status.to_db_string(), result, now_string(), id],
        )?;
        if updated == 0 {
            return Err(QueueError::JobNotFound(id));
        }
        Ok(())
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>, QueueError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        Ok(conn.query_row(&sql, params![id], job_from_row).optional()?)
    }

    /// Job counts for every status, including zero counts
    pub fn count_by_status(&self) -> Result<Vec<(JobStatus, u64)>, QueueError> {
        let conn = self.lock()?;
        let mut counts = Vec::new();
        for status in JobStatus::all_statuses() {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM jobs WHERE status = ?1",
                params![status.to_db_string()],
                |row| row.get(0),
            )?;
            counts.push((status, count as u64));
        }
        Ok(counts)
    }
}

impl TaskDispatcher for SqliteJobQueue {
    fn enqueue(&self, job_name: &str, payload: serde_json::Value) -> Result<JobHandle, QueueError> {
        let raw = serde_json::to_string(&payload)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO jobs (name, payload, status, enqueued_at) VALUES (?1, ?2, ?3, ?4)",
            params![job_name, raw, JobStatus::Pending.to_db_string(), now_string()],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!("Enqueued job {} ({})", id, job_name);
        Ok(JobHandle {
            id,
            name: job_name.to_string(),
        })
    }
}
