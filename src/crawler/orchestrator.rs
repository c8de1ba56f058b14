//! Catalog walk producer
//!
//! The orchestrator spawns a producer task that walks catalog pages from a
//! start page, fetches detail pages in concurrent batches and sends every
//! outcome through a bounded channel. It owns no storage; the consumer
//! decides what to persist.

use crate::catalog::CrawledRecord;
use crate::config::CrawlerConfig;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::parser::{catalog_url, BookPageParser, PageParser};
use crate::state::CrawlPhase;
use crate::ShelfwatchError;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

const CHANNEL_CAPACITY: usize = 64;

pub const FETCH_FAILED_REASON: &str = "Failed to fetch HTML from server";
pub const PARSE_FAILED_REASON: &str = "Failed to parse book data from HTML";

/// Everything the producer reports, in page and submission order
#[derive(Debug, Clone, PartialEq)]
pub enum CrawlEvent {
    CatalogFetched {
        page: u32,
        total_pages: Option<u32>,
        detail_count: usize,
    },
    Record {
        record: CrawledRecord,
        page: u32,
    },
    DetailFailed {
        url: String,
        page: u32,
        reason: &'static str,
        error: String,
        /// Present when the page was fetched but could not be parsed
        raw_content: Option<String>,
    },
    /// The catalog page could not be fetched; the walk ends as if it were the last
    CatalogUnavailable {
        page: u32,
        error: String,
    },
    PageCompleted {
        page: u32,
    },
}

/// Starts catalog walks
#[derive(Clone)]
pub struct CrawlOrchestrator {
    fetcher: Fetcher,
    parser: Arc<dyn PageParser>,
    base_url: String,
    batch_size: usize,
    batch_delay: Duration,
}

impl CrawlOrchestrator {
    pub fn new(fetcher: Fetcher, config: &CrawlerConfig) -> Self {
        Self {
            fetcher,
            parser: Arc::new(BookPageParser::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1),
            batch_delay: Duration::from_millis(config.batch_delay_ms),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replaces the default book parser
    pub fn with_parser(mut self, parser: Arc<dyn PageParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Spawns the producer and returns the receiving end
    ///
    /// Records are tagged with `crawl_id` so their change events can be
    /// traced back to the run.
    pub fn start(&self, start_page: u32, crawl_id: Option<i64>) -> CrawlStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let producer = Producer {
            fetcher: self.fetcher.clone(),
            parser: Arc::clone(&self.parser),
            base_url: self.base_url.clone(),
            batch_size: self.batch_size,
            batch_delay: self.batch_delay,
            crawl_id,
            phase: CrawlPhase::Idle,
            tx,
        };

        let handle = tokio::spawn(producer.run(start_page.max(1)));
        CrawlStream { rx, handle }
    }
}

/// Receiving end of a catalog walk
pub struct CrawlStream {
    rx: mpsc::Receiver<CrawlEvent>,
    handle: JoinHandle<Result<CrawlPhase, ShelfwatchError>>,
}

impl CrawlStream {
    /// Next event, or `None` once the producer has stopped
    pub async fn next(&mut self) -> Option<CrawlEvent> {
        self.rx.recv().await
    }

    /// Waits for the producer and returns its terminal phase
    pub async fn finish(self) -> Result<CrawlPhase, ShelfwatchError> {
        drop(self.rx);
        self.handle
            .await
            .map_err(|e| ShelfwatchError::Producer(e.to_string()))?
    }

    /// Stops the producer without waiting for it
    pub fn abort(self) {
        self.handle.abort();
    }
}

struct Producer {
    fetcher: Fetcher,
    parser: Arc<dyn PageParser>,
    base_url: String,
    batch_size: usize,
    batch_delay: Duration,
    crawl_id: Option<i64>,
    phase: CrawlPhase,
    tx: mpsc::Sender<CrawlEvent>,
}

impl Producer {
    async fn run(mut self, start_page: u32) -> Result<CrawlPhase, ShelfwatchError> {
        match self.walk(start_page).await {
            Ok(()) => Ok(self.phase),
            Err(e) => {
                tracing::error!("Catalog walk failed in phase {}: {}", self.phase, e);
                self.phase = CrawlPhase::Failed;
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: CrawlPhase) -> Result<(), ShelfwatchError> {
        if !self.phase.can_transition_to(next) {
            return Err(ShelfwatchError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::trace!("Phase {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    async fn send(&self, event: CrawlEvent) -> Result<(), ShelfwatchError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ShelfwatchError::Producer("event receiver dropped".to_string()))
    }

    async fn walk(&mut self, start_page: u32) -> Result<(), ShelfwatchError> {
        let mut page = start_page;
        tracing::info!("Starting catalog walk at page {}", page);
        self.transition(CrawlPhase::FetchingCatalog)?;

        loop {
            let url = catalog_url(&self.base_url, page);
            tracing::info!("Crawling catalog page {}: {}", page, url);

            let html = match self.fetcher.fetch(&url).await {
                Ok(html) => html,
                Err(e) => {
                    tracing::warn!("Failed to fetch catalog page {}: {}", page, e);
                    self.send(CrawlEvent::CatalogUnavailable {
                        page,
                        error: e.to_string(),
                    })
                    .await?;
                    return self.transition(CrawlPhase::Completed);
                }
            };

            self.transition(CrawlPhase::ExtractingLinks)?;
            let page_url = Url::parse(&url)?;
            let catalog = self.parser.parse_catalog(&html, &page_url);
            tracing::info!("Found {} books on page {}", catalog.detail_urls.len(), page);

            self.send(CrawlEvent::CatalogFetched {
                page,
                total_pages: catalog.total_pages,
                detail_count: catalog.detail_urls.len(),
            })
            .await?;

            let total_batches = catalog.detail_urls.len().div_ceil(self.batch_size);
            for (index, batch) in catalog.detail_urls.chunks(self.batch_size).enumerate() {
                self.transition(CrawlPhase::FetchingDetailBatch)?;
                tracing::debug!("Processing batch {}/{}", index + 1, total_batches);

                let events = join_all(batch.iter().map(|url| self.fetch_detail(url, page))).await;
                for event in events {
                    self.send(event).await?;
                }

                tokio::time::sleep(self.batch_delay).await;
            }

            self.send(CrawlEvent::PageCompleted { page }).await?;

            if !catalog.has_next {
                tracing::info!("No more pages after page {}", page);
                return self.transition(CrawlPhase::Completed);
            }

            self.transition(CrawlPhase::Paginating)?;
            page += 1;
            self.transition(CrawlPhase::FetchingCatalog)?;
        }
    }

    /// Fetches and parses one detail page; failures become events
    async fn fetch_detail(&self, url: &str, page: u32) -> CrawlEvent {
        let html = match self.fetcher.fetch(url).await {
            Ok(html) => html,
            Err(e) => {
                return CrawlEvent::DetailFailed {
                    url: url.to_string(),
                    page,
                    reason: FETCH_FAILED_REASON,
                    error: e.to_string(),
                    raw_content: None,
                }
            }
        };

        match self.parser.parse_detail(&html, url) {
            Ok(record) => CrawlEvent::Record {
                record: record.with_crawl_id(self.crawl_id),
                page,
            },
            Err(e) => {
                tracing::warn!("Failed to parse book page {}: {}", url, e);
                CrawlEvent::DetailFailed {
                    url: url.to_string(),
                    page,
                    reason: PARSE_FAILED_REASON,
                    error: e.to_string(),
                    raw_content: Some(html),
                }
            }
        }
    }
}
