//! Job worker
//!
//! Claims jobs one at a time and runs them. `process_crawled_record` diffs a
//! record against the catalog; `crawl_catalog` runs a crawl whose records
//! are enqueued back onto the same queue.

use crate::catalog::{ChangeDetector, CrawledRecord, ProcessOutcome};
use crate::crawler::{CrawlOrchestrator, CrawlRunner, Dispatch, RunOutcome};
use crate::queue::{
    Job, QueueError, SqliteJobQueue, TaskDispatcher, CRAWL_CATALOG, PROCESS_CRAWLED_RECORD,
};
use crate::storage::{CrawlStore, StorageError};
use crate::ShelfwatchError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Result of one `run_once` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Nothing was pending
    Idle,
    Completed { id: i64, name: String },
    Failed { id: i64, name: String, reason: String },
}

struct CrawlJobContext {
    orchestrator: CrawlOrchestrator,
    resume_window_hours: u32,
    config_hash: String,
}

pub struct Worker<S> {
    queue: Arc<SqliteJobQueue>,
    storage: Arc<Mutex<S>>,
    detector: ChangeDetector,
    crawl: Option<CrawlJobContext>,
}

impl<S> Worker<S>
where
    S: CrawlStore + Send + 'static,
{
    pub fn new(queue: Arc<SqliteJobQueue>, storage: Arc<Mutex<S>>) -> Self {
        Self {
            queue,
            storage,
            detector: ChangeDetector::new(),
            crawl: None,
        }
    }

    /// Enables `crawl_catalog` jobs; without it they fail
    pub fn with_crawler(
        mut self,
        orchestrator: CrawlOrchestrator,
        resume_window_hours: u32,
        config_hash: impl Into<String>,
    ) -> Self {
        self.crawl = Some(CrawlJobContext {
            orchestrator,
            resume_window_hours,
            config_hash: config_hash.into(),
        });
        self
    }

    /// Claims and runs the oldest pending job
    pub async fn run_once(&self) -> Result<JobOutcome, ShelfwatchError> {
        let Some(job) = self.queue.claim_next()? else {
            return Ok(JobOutcome::Idle);
        };

        tracing::info!("Running job {} ({}), attempt {}", job.id, job.name, job.attempts);

        match self.execute(&job).await {
            Ok(result) => {
                self.queue.complete(job.id, &result)?;
                Ok(JobOutcome::Completed {
                    id: job.id,
                    name: job.name,
                })
            }
            Err(reason) => {
                tracing::warn!("Job {} ({}) failed: {}", job.id, job.name, reason);
                self.queue.fail(job.id, &reason)?;
                Ok(JobOutcome::Failed {
                    id: job.id,
                    name: job.name,
                    reason,
                })
            }
        }
    }

    /// Runs jobs until the queue is empty; with `watch`, polls forever
    ///
    /// Returns the number of jobs run. In watch mode queue errors are logged
    /// and retried after the poll interval instead of ending the loop.
    pub async fn run(&self, watch: bool, poll_interval: Duration) -> Result<u64, ShelfwatchError> {
        let mut processed = 0;
        loop {
            match self.run_once().await {
                Ok(JobOutcome::Idle) if watch => tokio::time::sleep(poll_interval).await,
                Ok(JobOutcome::Idle) => break,
                Ok(_) => processed += 1,
                Err(e) if watch => {
                    tracing::error!("Worker error, retrying in {:?}: {}", poll_interval, e);
                    tokio::time::sleep(poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!("Worker idle after {} job(s)", processed);
        Ok(processed)
    }

    /// Returns the stored result on success, the failure reason otherwise
    async fn execute(&self, job: &Job) -> Result<String, String> {
        match job.name.as_str() {
            PROCESS_CRAWLED_RECORD => self.process_record(job),
            CRAWL_CATALOG => self.crawl_catalog().await,
            other => Err(QueueError::UnknownJob(other.to_string()).to_string()),
        }
    }

    fn process_record(&self, job: &Job) -> Result<String, String> {
        let record: CrawledRecord = serde_json::from_value(job.payload.clone())
            .map_err(|e| format!("Invalid payload: {}", e))?;

        let outcome = {
            let mut storage = self
                .storage
                .lock()
                .map_err(|_| StorageError::LockPoisoned.to_string())?;
            self.detector.process(&mut *storage, &record)
        };

        match outcome {
            ProcessOutcome::Error { message } => Err(message),
            outcome => serde_json::to_string(&outcome).map_err(|e| e.to_string()),
        }
    }

    async fn crawl_catalog(&self) -> Result<String, String> {
        let Some(ctx) = &self.crawl else {
            return Err("crawl_catalog jobs are not enabled on this worker".to_string());
        };

        let queue: Arc<dyn TaskDispatcher> = self.queue.clone();
        let runner = CrawlRunner::new(
            Arc::clone(&self.storage),
            ctx.orchestrator.clone(),
            Dispatch::Queue(queue),
            ctx.resume_window_hours,
        )
        .with_config_hash(ctx.config_hash.clone());

        let summary = runner.run().await.map_err(|e| e.to_string())?;
        let json = serde_json::to_string(&summary).map_err(|e| e.to_string())?;

        match summary.outcome {
            RunOutcome::Completed => Ok(json),
            RunOutcome::Failed => Err(json),
        }
    }
}
