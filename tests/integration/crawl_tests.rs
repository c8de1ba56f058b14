//! End-to-end crawl runs against a mock catalog

use crate::fixtures::{
    books_for_page, inline_runner, memory_storage, mount_catalog, mount_catalog_page,
    mount_detail, orchestrator,
};
use shelfwatch::catalog::{ChangeEvent, ChangeType, CrawledRecord, NewChangeEvent, Product};
use shelfwatch::crawler::{
    CrawlRunner, Dispatch, RunOutcome, FETCH_FAILED_REASON, PARSE_FAILED_REASON,
};
use shelfwatch::queue::{JobStatus, SqliteJobQueue, TaskDispatcher, Worker};
use shelfwatch::state::CrawlStatus;
use shelfwatch::storage::{
    CatalogStore, ChangeFilter, ChangeLogStore, CheckpointStore, CrawlCheckpoint, CrawlStore, FailedFetch,
    FailureStore, NewFailedFetch, ProductFilter, ProductSort, ProductStore, SqliteStorage,
    StorageError, StorageResult,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_full_crawl_two_pages() {
    let server = MockServer::start().await;
    mount_catalog(&server, 2, 5).await;

    let storage = memory_storage();
    let summary = inline_runner(&server, &storage).run().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.crawl_status, CrawlStatus::Success);
    assert_eq!(summary.records_found, 10);
    assert_eq!(summary.records_processed, 10);
    assert_eq!(summary.errors_count, 0);
    assert_eq!(summary.last_page, 2);
    assert!(!summary.resumed);

    let storage = storage.lock().unwrap();
    let checkpoint = storage.get_latest_checkpoint().unwrap().unwrap();
    assert!(checkpoint.is_complete);
    assert_eq!(checkpoint.status, CrawlStatus::Success);
    assert_eq!(checkpoint.records_crawled, 10);
    assert_eq!(checkpoint.last_page_crawled, 2);
    assert_eq!(checkpoint.config_hash, "test-config");
    assert_eq!(checkpoint.base_url, server.uri());
    assert_eq!(checkpoint.total_pages, Some(2));

    assert_eq!(storage.count_products().unwrap(), 10);
    let (changes, total) = storage
        .list_changes(&ChangeFilter::default(), 0, 100)
        .unwrap();
    assert_eq!(total, 10);
    assert!(changes
        .iter()
        .all(|c| c.change_type == ChangeType::NewProduct && c.crawl_id == Some(checkpoint.id)));
}

#[tokio::test]
async fn test_parsed_record_fields() {
    let server = MockServer::start().await;
    let books = mount_catalog(&server, 1, 1).await;

    let storage = memory_storage();
    inline_runner(&server, &storage).run().await.unwrap();

    let storage = storage.lock().unwrap();
    let product = storage
        .find_by_source_url(&books[0].detail_url(&server))
        .unwrap()
        .expect("product should be stored");
    assert_eq!(product.fields.name, books[0].name);
    assert_eq!(product.fields.category, "Poetry");
    assert_eq!(product.fields.price_incl_tax, books[0].price);
    assert_eq!(product.fields.availability, "In stock (22 available)");
    assert_eq!(product.fields.rating, 3);
    assert!(product.fields.image_url.starts_with(&server.uri()));
    assert!(product.fields.image_url.ends_with(".jpg"));
}

#[tokio::test]
async fn test_all_details_missing_marks_crawl_failed() {
    let server = MockServer::start().await;
    // Catalog only; every detail page falls through to a 404
    mount_catalog_page(&server, 1, 1, &books_for_page(1, 3)).await;

    let storage = memory_storage();
    let summary = inline_runner(&server, &storage).run().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.crawl_status, CrawlStatus::Failed);
    assert_eq!(summary.records_found, 0);
    assert_eq!(summary.errors_count, 3);

    let storage = storage.lock().unwrap();
    let checkpoint = storage.get_latest_checkpoint().unwrap().unwrap();
    assert_eq!(checkpoint.status, CrawlStatus::Failed);
    assert_eq!(checkpoint.error_messages.len(), 3);
    assert!(checkpoint.error_messages[0].starts_with(FETCH_FAILED_REASON));
    assert_eq!(storage.count_failures().unwrap(), 3);
    assert_eq!(storage.count_products().unwrap(), 0);
}

#[tokio::test]
async fn test_one_failing_detail_does_not_sink_the_batch() {
    let server = MockServer::start().await;
    let books = books_for_page(1, 10);
    mount_catalog_page(&server, 1, 1, &books).await;
    for book in books.iter().skip(1) {
        mount_detail(&server, book).await;
    }

    let storage = memory_storage();
    let summary = inline_runner(&server, &storage).run().await.unwrap();

    assert_eq!(summary.records_found, 9);
    assert_eq!(summary.errors_count, 1);
    assert_eq!(summary.crawl_status, CrawlStatus::Partial);

    let storage = storage.lock().unwrap();
    assert_eq!(storage.count_products().unwrap(), 9);
    assert!(storage
        .find_by_source_url(&books[0].detail_url(&server))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_unavailable_first_page_ends_with_no_records() {
    let server = MockServer::start().await;

    let storage = memory_storage();
    let summary = inline_runner(&server, &storage).run().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.records_found, 0);
    assert_eq!(summary.errors_count, 0);
    assert_eq!(summary.last_page, 0);
    assert_eq!(summary.crawl_status, CrawlStatus::Success);

    let checkpoint = storage.lock().unwrap().get_latest_checkpoint().unwrap().unwrap();
    assert!(checkpoint.is_complete);
    assert!(checkpoint.error_messages.is_empty());
}

#[tokio::test]
async fn test_resume_after_final_page_completes_without_errors() {
    let server = MockServer::start().await;
    mount_catalog(&server, 2, 3).await;

    let storage = memory_storage();
    let existing_id = {
        let mut checkpoint = CrawlCheckpoint::new("test-config");
        checkpoint.last_page_crawled = 2;
        checkpoint.records_crawled = 6;
        storage.lock().unwrap().create_checkpoint(&checkpoint).unwrap()
    };

    let summary = inline_runner(&server, &storage).run().await.unwrap();

    assert!(summary.resumed);
    assert_eq!(summary.crawl_id, existing_id);
    assert_eq!(summary.records_found, 0);
    assert_eq!(summary.errors_count, 0);
    assert_eq!(summary.last_page, 2);
    assert_eq!(summary.crawl_status, CrawlStatus::Success);
}

#[tokio::test]
async fn test_unparsable_detail_is_archived_with_its_html() {
    let server = MockServer::start().await;
    let books = books_for_page(1, 2);
    mount_catalog_page(&server, 1, 1, &books).await;
    mount_detail(&server, &books[0]).await;
    let broken = "<html><body><div class=\"product_main\"></div></body></html>";
    Mock::given(method("GET"))
        .and(path(books[1].detail_path()))
        .respond_with(ResponseTemplate::new(200).set_body_string(broken))
        .mount(&server)
        .await;

    let storage = memory_storage();
    let summary = inline_runner(&server, &storage).run().await.unwrap();

    assert_eq!(summary.records_found, 1);
    assert_eq!(summary.errors_count, 1);
    assert_eq!(summary.crawl_status, CrawlStatus::Partial);

    let storage = storage.lock().unwrap();
    let (failures, total) = storage
        .list_failures(Some(summary.crawl_id), 0, 10)
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(failures[0].reason, PARSE_FAILED_REASON);
    assert_eq!(failures[0].url, books[1].detail_url(&server));
    assert_eq!(failures[0].raw_content.as_deref(), Some(broken));
}

#[tokio::test]
async fn test_resumes_recent_partial_checkpoint() {
    let server = MockServer::start().await;
    // Page 1 is deliberately not mounted; a resumed crawl must skip it
    let page_two = books_for_page(2, 5);
    mount_catalog_page(&server, 2, 2, &page_two).await;
    for book in &page_two {
        mount_detail(&server, book).await;
    }

    let storage = memory_storage();
    let existing_id = {
        let mut storage = storage.lock().unwrap();
        let mut checkpoint = CrawlCheckpoint::new("test-config");
        checkpoint.last_page_crawled = 1;
        checkpoint.records_crawled = 5;
        checkpoint.record_error("Failed to fetch HTML from server: http://old/1");
        checkpoint.status = CrawlStatus::Partial;
        storage.create_checkpoint(&checkpoint).unwrap()
    };

    let summary = inline_runner(&server, &storage).run().await.unwrap();

    assert!(summary.resumed);
    assert_eq!(summary.crawl_id, existing_id);
    assert_eq!(summary.records_found, 5);
    assert_eq!(summary.last_page, 2);
    assert_eq!(summary.errors_count, 1);
    assert_eq!(summary.crawl_status, CrawlStatus::Partial);

    let storage = storage.lock().unwrap();
    let checkpoint = storage.get_latest_checkpoint().unwrap().unwrap();
    assert_eq!(checkpoint.id, existing_id);
    assert!(checkpoint.is_complete);
    assert_eq!(checkpoint.records_crawled, 10);
    assert_eq!(
        checkpoint.error_messages,
        vec!["Failed to fetch HTML from server: http://old/1".to_string()]
    );
}

#[tokio::test]
async fn test_completed_checkpoint_is_not_resumed() {
    let server = MockServer::start().await;
    mount_catalog(&server, 1, 2).await;

    let storage = memory_storage();
    let first = inline_runner(&server, &storage).run().await.unwrap();
    let second = inline_runner(&server, &storage).run().await.unwrap();

    assert!(!second.resumed);
    assert_ne!(first.crawl_id, second.crawl_id);
    assert_eq!(second.last_page, 1);
}

#[tokio::test]
async fn test_queue_mode_enqueues_records_for_worker() {
    let server = MockServer::start().await;
    mount_catalog(&server, 1, 3).await;

    let storage = memory_storage();
    let queue = Arc::new(SqliteJobQueue::new_in_memory().unwrap());
    let dispatcher: Arc<dyn TaskDispatcher> = queue.clone();

    let summary = CrawlRunner::new(
        Arc::clone(&storage),
        orchestrator(&server),
        Dispatch::Queue(dispatcher),
        24,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.records_found, 3);
    assert_eq!(summary.records_enqueued, 3);
    assert_eq!(summary.records_processed, 0);
    assert_eq!(storage.lock().unwrap().count_products().unwrap(), 0);
    assert!(queue
        .count_by_status()
        .unwrap()
        .contains(&(JobStatus::Pending, 3)));

    let worker = Worker::new(Arc::clone(&queue), Arc::clone(&storage));
    let processed = worker.run(false, Duration::from_millis(10)).await.unwrap();
    assert_eq!(processed, 3);
    assert_eq!(storage.lock().unwrap().count_products().unwrap(), 3);
    assert!(queue
        .count_by_status()
        .unwrap()
        .contains(&(JobStatus::Done, 3)));
}

/// Delegates to SQLite but refuses the first checkpoint update
struct FlakyCheckpoints {
    inner: SqliteStorage,
    failed_once: bool,
}

impl ProductStore for FlakyCheckpoints {
    fn find_by_source_url(&self, source_url: &str) -> StorageResult<Option<Product>> {
        self.inner.find_by_source_url(source_url)
    }

    fn find_product(&self, id: i64) -> StorageResult<Option<Product>> {
        self.inner.find_product(id)
    }

    fn create_product(&mut self, record: &CrawledRecord) -> StorageResult<Product> {
        self.inner.create_product(record)
    }

    fn update_product(&mut self, product: &Product) -> StorageResult<()> {
        self.inner.update_product(product)
    }

    fn bulk_create_products(&mut self, records: &[CrawledRecord]) -> StorageResult<usize> {
        self.inner.bulk_create_products(records)
    }

    fn list_products(
        &self,
        filter: &ProductFilter,
        sort: ProductSort,
        skip: u64,
        limit: u64,
    ) -> StorageResult<(Vec<Product>, u64)> {
        self.inner.list_products(filter, sort, skip, limit)
    }

    fn count_products(&self) -> StorageResult<u64> {
        self.inner.count_products()
    }
}

impl ChangeLogStore for FlakyCheckpoints {
    fn record_change(&mut self, change: &NewChangeEvent) -> StorageResult<ChangeEvent> {
        self.inner.record_change(change)
    }

    fn list_changes(
        &self,
        filter: &ChangeFilter,
        skip: u64,
        limit: u64,
    ) -> StorageResult<(Vec<ChangeEvent>, u64)> {
        self.inner.list_changes(filter, skip, limit)
    }

    fn count_changes_by_type(&self) -> StorageResult<Vec<(ChangeType, u64)>> {
        self.inner.count_changes_by_type()
    }
}

impl CatalogStore for FlakyCheckpoints {
    fn create_product_logged(
        &mut self,
        record: &CrawledRecord,
        event: NewChangeEvent,
    ) -> StorageResult<Product> {
        self.inner.create_product_logged(record, event)
    }

    fn update_product_logged(
        &mut self,
        product: &Product,
        changes: &[NewChangeEvent],
    ) -> StorageResult<()> {
        self.inner.update_product_logged(product, changes)
    }
}

impl CheckpointStore for FlakyCheckpoints {
    fn create_checkpoint(&mut self, checkpoint: &CrawlCheckpoint) -> StorageResult<i64> {
        self.inner.create_checkpoint(checkpoint)
    }

    fn update_checkpoint(&mut self, checkpoint: &CrawlCheckpoint) -> StorageResult<()> {
        if !self.failed_once {
            self.failed_once = true;
            return Err(StorageError::Database("disk I/O error".to_string()));
        }
        self.inner.update_checkpoint(checkpoint)
    }

    fn get_latest_checkpoint(&self) -> StorageResult<Option<CrawlCheckpoint>> {
        self.inner.get_latest_checkpoint()
    }

    fn get_latest_incomplete_within(&self, hours: u32) -> StorageResult<Option<CrawlCheckpoint>> {
        self.inner.get_latest_incomplete_within(hours)
    }
}

impl FailureStore for FlakyCheckpoints {
    fn record_failure(&mut self, failure: &NewFailedFetch) -> StorageResult<FailedFetch> {
        self.inner.record_failure(failure)
    }

    fn list_failures(
        &self,
        crawl_id: Option<i64>,
        skip: u64,
        limit: u64,
    ) -> StorageResult<(Vec<FailedFetch>, u64)> {
        self.inner.list_failures(crawl_id, skip, limit)
    }

    fn count_failures(&self) -> StorageResult<u64> {
        self.inner.count_failures()
    }
}

fn assert_crawl_store<S: CrawlStore>() {}

#[tokio::test]
async fn test_storage_failure_marks_checkpoint_failed() {
    assert_crawl_store::<FlakyCheckpoints>();

    let server = MockServer::start().await;
    mount_catalog(&server, 2, 2).await;

    let storage = Arc::new(Mutex::new(FlakyCheckpoints {
        inner: SqliteStorage::new_in_memory().unwrap(),
        failed_once: false,
    }));
    let summary = inline_runner(&server, &storage).run().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Failed);
    assert_eq!(summary.crawl_status, CrawlStatus::Failed);
    assert!(summary.error.unwrap().contains("disk I/O error"));

    let storage = storage.lock().unwrap();
    let checkpoint = storage.get_latest_checkpoint().unwrap().unwrap();
    assert_eq!(checkpoint.status, CrawlStatus::Failed);
    assert!(!checkpoint.is_complete);
    assert!(checkpoint
        .error_messages
        .last()
        .unwrap()
        .starts_with("Fatal error: "));
}
