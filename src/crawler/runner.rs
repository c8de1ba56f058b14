//! Crawl runs: resume, dispatch, checkpointing and final status

use crate::catalog::{ChangeDetector, CrawledRecord, ProcessOutcome};
use crate::crawler::orchestrator::{CrawlEvent, CrawlOrchestrator, CrawlStream};
use crate::queue::{QueueError, TaskDispatcher, PROCESS_CRAWLED_RECORD};
use crate::state::CrawlStatus;
use crate::storage::{CrawlCheckpoint, CrawlStore, NewFailedFetch, StorageError, StorageResult};
use crate::ShelfwatchError;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Where crawled records go
#[derive(Clone)]
pub enum Dispatch {
    /// Enqueue a `process_crawled_record` job per record
    Queue(Arc<dyn TaskDispatcher>),
    /// Diff each record against the catalog immediately
    Inline,
}

/// Whether the run reached the end of the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed,
}

/// What one run did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlSummary {
    pub crawl_id: i64,
    pub outcome: RunOutcome,
    pub crawl_status: CrawlStatus,
    /// Records produced by this run
    pub records_found: u64,
    pub records_enqueued: u64,
    pub records_processed: u64,
    /// Errors across the whole checkpoint, including before a resume
    pub errors_count: u64,
    pub last_page: u32,
    pub resumed: bool,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct Tally {
    found: u64,
    enqueued: u64,
    processed: u64,
}

/// Drives one crawl from start page to final checkpoint
pub struct CrawlRunner<S> {
    storage: Arc<Mutex<S>>,
    orchestrator: CrawlOrchestrator,
    dispatch: Dispatch,
    detector: ChangeDetector,
    resume_window_hours: u32,
    config_hash: String,
}

impl<S> CrawlRunner<S>
where
    S: CrawlStore + Send + 'static,
{
    pub fn new(
        storage: Arc<Mutex<S>>,
        orchestrator: CrawlOrchestrator,
        dispatch: Dispatch,
        resume_window_hours: u32,
    ) -> Self {
        Self {
            storage,
            orchestrator,
            dispatch,
            detector: ChangeDetector::new(),
            resume_window_hours,
            config_hash: String::new(),
        }
    }

    /// Recorded on checkpoints this runner creates
    pub fn with_config_hash(mut self, config_hash: impl Into<String>) -> Self {
        self.config_hash = config_hash.into();
        self
    }

    fn with_storage<T>(
        &self,
        f: impl FnOnce(&mut S) -> StorageResult<T>,
    ) -> Result<T, ShelfwatchError> {
        let mut guard = self
            .storage
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(f(&mut guard)?)
    }

    /// Runs a crawl to completion
    ///
    /// Only fails if no checkpoint could be resolved. Once a checkpoint exists,
    /// every fatal error is recorded on it and reported in the summary.
    pub async fn run(&self) -> Result<CrawlSummary, ShelfwatchError> {
        let (mut checkpoint, resumed) = self.resolve_start()?;
        let start_page = checkpoint.last_page_crawled + 1;

        if resumed {
            tracing::info!(
                "Resuming crawl {} from page {} ({} records, {} errors so far)",
                checkpoint.id,
                start_page,
                checkpoint.records_crawled,
                checkpoint.errors_count
            );
        } else {
            tracing::info!("Starting crawl {} from page {}", checkpoint.id, start_page);
        }

        let mut stream = self.orchestrator.start(start_page, Some(checkpoint.id));
        let mut tally = Tally::default();

        let result = match self.consume(&mut stream, &mut checkpoint, &mut tally).await {
            Ok(()) => stream.finish().await.map(|_| ()),
            Err(e) => {
                stream.abort();
                Err(e)
            }
        };

        let error = match result {
            Ok(()) => {
                checkpoint.finish();
                if let Err(e) = self.with_storage(|s| s.update_checkpoint(&checkpoint)) {
                    Some(self.fail(&mut checkpoint, e))
                } else {
                    None
                }
            }
            Err(e) => Some(self.fail(&mut checkpoint, e)),
        };

        let summary = CrawlSummary {
            crawl_id: checkpoint.id,
            outcome: if error.is_some() {
                RunOutcome::Failed
            } else {
                RunOutcome::Completed
            },
            crawl_status: checkpoint.status,
            records_found: tally.found,
            records_enqueued: tally.enqueued,
            records_processed: tally.processed,
            errors_count: checkpoint.errors_count,
            last_page: checkpoint.last_page_crawled,
            resumed,
            error,
        };

        tracing::info!(
            "Crawl {} finished: {} ({} records, {} errors, last page {})",
            summary.crawl_id,
            summary.crawl_status,
            summary.records_found,
            summary.errors_count,
            summary.last_page
        );

        Ok(summary)
    }

    /// Reuses a recent unfinished checkpoint, or creates a fresh one
    fn resolve_start(&self) -> Result<(CrawlCheckpoint, bool), ShelfwatchError> {
        let window = self.resume_window_hours;
        if let Some(existing) = self.with_storage(|s| s.get_latest_incomplete_within(window))? {
            return Ok((existing, true));
        }

        let mut checkpoint = CrawlCheckpoint::new(self.config_hash.clone())
            .with_base_url(self.orchestrator.base_url());
        checkpoint.id = self.with_storage(|s| s.create_checkpoint(&checkpoint))?;
        Ok((checkpoint, false))
    }

    /// Records a fatal error and persists the failed checkpoint
    fn fail(&self, checkpoint: &mut CrawlCheckpoint, error: ShelfwatchError) -> String {
        let message = error.to_string();
        tracing::error!("Crawl {} failed: {}", checkpoint.id, message);
        checkpoint.record_fatal(message.clone());

        if let Err(e) = self.with_storage(|s| s.update_checkpoint(checkpoint)) {
            tracing::error!("Could not persist failed checkpoint {}: {}", checkpoint.id, e);
        }
        message
    }

    async fn consume(
        &self,
        stream: &mut CrawlStream,
        checkpoint: &mut CrawlCheckpoint,
        tally: &mut Tally,
    ) -> Result<(), ShelfwatchError> {
        while let Some(event) = stream.next().await {
            match event {
                CrawlEvent::CatalogFetched {
                    page,
                    total_pages,
                    detail_count,
                } => match total_pages {
                    Some(total) => {
                        tracing::info!("Page {}/{}: {} books", page, total, detail_count);
                        checkpoint.total_pages = Some(total);
                    }
                    None => tracing::info!("Page {}: {} books", page, detail_count),
                },
                CrawlEvent::Record { record, page } => {
                    checkpoint.records_crawled += 1;
                    tally.found += 1;
                    tracing::debug!("[Page {}] Crawled book: {}", page, record.name());
                    self.dispatch_record(record, checkpoint, tally)?;
                }
                CrawlEvent::DetailFailed {
                    url,
                    page,
                    reason,
                    error,
                    raw_content,
                } => {
                    tracing::warn!("[Page {}] {}: {} ({})", page, reason, url, error);
                    let failure = NewFailedFetch {
                        crawl_id: Some(checkpoint.id),
                        url: url.clone(),
                        raw_content,
                        reason: reason.to_string(),
                    };
                    self.with_storage(|s| s.record_failure(&failure))?;
                    checkpoint.record_error(format!("{}: {}", reason, url));
                }
                CrawlEvent::CatalogUnavailable { page, error } => {
                    tracing::debug!("Catalog ends before page {}: {}", page, error);
                }
                CrawlEvent::PageCompleted { page } => {
                    if page > checkpoint.last_page_crawled {
                        checkpoint.last_page_crawled = page;
                        self.with_storage(|s| s.update_checkpoint(checkpoint))?;
                        tracing::debug!("Checkpoint {} at page {}", checkpoint.id, page);
                    }
                }
            }
        }
        Ok(())
    }

    fn dispatch_record(
        &self,
        record: CrawledRecord,
        checkpoint: &mut CrawlCheckpoint,
        tally: &mut Tally,
    ) -> Result<(), ShelfwatchError> {
        match &self.dispatch {
            Dispatch::Queue(dispatcher) => {
                let enqueued = serde_json::to_value(&record)
                    .map_err(QueueError::from)
                    .and_then(|payload| dispatcher.enqueue(PROCESS_CRAWLED_RECORD, payload));
                match enqueued {
                    Ok(handle) => {
                        tally.enqueued += 1;
                        tracing::trace!("Enqueued job {} for {}", handle.id, record.source_url);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to enqueue {}: {}", record.source_url, e);
                        checkpoint.record_error(format!(
                            "Failed to enqueue {}: {}",
                            record.source_url, e
                        ));
                    }
                }
            }
            Dispatch::Inline => {
                match self.with_storage(|s| Ok(self.detector.process(s, &record)))? {
                    ProcessOutcome::Error { message } => {
                        checkpoint.record_error(format!("{}: {}", record.source_url, message));
                    }
                    _ => tally.processed += 1,
                }
            }
        }
        Ok(())
    }
}
