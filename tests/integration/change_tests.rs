//! Change detection across repeated crawls

use crate::fixtures::{
    books_for_page, inline_runner, memory_storage, mount_catalog_page, mount_detail, Book,
};
use shelfwatch::catalog::ChangeType;
use shelfwatch::crawler::RunOutcome;
use shelfwatch::storage::{ChangeFilter, ChangeLogStore, ProductStore};
use wiremock::MockServer;

async fn mount_single_book(server: &MockServer, book: &Book) {
    mount_catalog_page(server, 1, 1, std::slice::from_ref(book)).await;
    mount_detail(server, book).await;
}

#[tokio::test]
async fn test_price_change_between_crawls() {
    let server = MockServer::start().await;
    let mut book = Book::new("sharp-objects_997", "Sharp Objects", 12.0);
    mount_single_book(&server, &book).await;

    let storage = memory_storage();
    inline_runner(&server, &storage).run().await.unwrap();

    server.reset().await;
    book.price = 18.0;
    mount_single_book(&server, &book).await;

    let summary = inline_runner(&server, &storage).run().await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.records_processed, 1);

    let storage = storage.lock().unwrap();
    let filter = ChangeFilter {
        product_id: None,
        change_type: Some(ChangeType::PriceChange),
    };
    let (changes, total) = storage.list_changes(&filter, 0, 10).unwrap();
    assert_eq!(total, 2);

    let incl = changes
        .iter()
        .find(|c| c.field_changed.as_deref() == Some("price_incl_tax"))
        .expect("price_incl_tax change");
    assert_eq!(incl.old_value.as_deref(), Some("£12.00"));
    assert_eq!(incl.new_value.as_deref(), Some("£18.00"));
    assert_eq!(incl.product_name, "Sharp Objects");
    assert_eq!(incl.crawl_id, Some(summary.crawl_id));

    let product = storage
        .find_by_source_url(&book.detail_url(&server))
        .unwrap()
        .unwrap();
    assert_eq!(product.fields.price_incl_tax, 18.0);
    assert_eq!(storage.count_products().unwrap(), 1);
}

#[tokio::test]
async fn test_availability_change_is_typed() {
    let server = MockServer::start().await;
    let mut book = Book::new("the-dirty-little-secrets_996", "The Dirty Little Secrets", 33.34);
    mount_single_book(&server, &book).await;

    let storage = memory_storage();
    inline_runner(&server, &storage).run().await.unwrap();

    server.reset().await;
    book.availability = "Out of stock".to_string();
    mount_single_book(&server, &book).await;
    inline_runner(&server, &storage).run().await.unwrap();

    let storage = storage.lock().unwrap();
    let filter = ChangeFilter {
        product_id: None,
        change_type: Some(ChangeType::AvailabilityChange),
    };
    let (changes, total) = storage.list_changes(&filter, 0, 10).unwrap();
    assert_eq!(total, 1);
    assert_eq!(changes[0].old_value.as_deref(), Some("In stock (22 available)"));
    assert_eq!(changes[0].new_value.as_deref(), Some("Out of stock"));
}

#[tokio::test]
async fn test_recrawl_without_changes_is_idempotent() {
    let server = MockServer::start().await;
    let books = books_for_page(1, 4);
    mount_catalog_page(&server, 1, 1, &books).await;
    for book in &books {
        mount_detail(&server, book).await;
    }

    let storage = memory_storage();
    inline_runner(&server, &storage).run().await.unwrap();
    let after_first = storage
        .lock()
        .unwrap()
        .list_changes(&ChangeFilter::default(), 0, 100)
        .unwrap()
        .1;

    for _ in 0..2 {
        let summary = inline_runner(&server, &storage).run().await.unwrap();
        assert_eq!(summary.records_processed, 4);
    }

    let storage = storage.lock().unwrap();
    let (_, total) = storage
        .list_changes(&ChangeFilter::default(), 0, 100)
        .unwrap();
    assert_eq!(after_first, 4);
    assert_eq!(total, after_first);
    assert_eq!(storage.count_products().unwrap(), 4);
}
