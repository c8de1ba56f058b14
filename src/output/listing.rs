//! Product and change log listings

use crate::catalog::{format_price, ChangeEvent, Product};
use crate::crawler::CrawlSummary;
use crate::storage::{ChangeFilter, ChangeLogStore, ProductFilter, ProductSort, ProductStore};
use crate::ShelfwatchError;

/// One page of a listing
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            0
        } else {
            self.total.div_ceil(self.page_size)
        }
    }
}

/// Converts a one-based page into the rows to skip
fn offset(page: u64, page_size: u64) -> u64 {
    page.saturating_sub(1).saturating_mul(page_size)
}

pub fn list_products<S: ProductStore + ?Sized>(
    storage: &S,
    filter: &ProductFilter,
    sort: ProductSort,
    page: u64,
    page_size: u64,
) -> Result<Page<Product>, ShelfwatchError> {
    let page = page.max(1);
    let (items, total) = storage.list_products(filter, sort, offset(page, page_size), page_size)?;
    Ok(Page {
        items,
        total,
        page,
        page_size,
    })
}

pub fn list_changes<S: ChangeLogStore + ?Sized>(
    storage: &S,
    filter: &ChangeFilter,
    page: u64,
    page_size: u64,
) -> Result<Page<ChangeEvent>, ShelfwatchError> {
    let page = page.max(1);
    let (items, total) = storage.list_changes(filter, offset(page, page_size), page_size)?;
    Ok(Page {
        items,
        total,
        page,
        page_size,
    })
}

pub fn print_products(page: &Page<Product>) {
    println!(
        "Products (page {}/{}, {} total)\n",
        page.page,
        page.total_pages().max(1),
        page.total
    );
    for product in &page.items {
        println!(
            "  #{:<5} {:<50} {:>8}  {}/5  {:<20} {}",
            product.id,
            product.fields.name,
            format_price(product.fields.price_incl_tax),
            product.fields.rating,
            product.fields.category,
            product.fields.availability
        );
    }
}

pub fn print_changes(page: &Page<ChangeEvent>) {
    println!(
        "Changes (page {}/{}, {} total)\n",
        page.page,
        page.total_pages().max(1),
        page.total
    );
    for change in &page.items {
        let detail = match (&change.field_changed, &change.old_value, &change.new_value) {
            (Some(field), Some(old), Some(new)) => format!("{}: {} -> {}", field, old, new),
            (_, _, Some(new)) => new.clone(),
            _ => String::new(),
        };
        println!(
            "  {}  {:<20} #{:<5} {}  {}",
            change.timestamp.format("%Y-%m-%d %H:%M:%S"),
            change.change_type,
            change.product_id,
            change.product_name,
            detail
        );
    }
}

pub fn print_summary(summary: &CrawlSummary) {
    println!("=== Crawl #{} ===", summary.crawl_id);
    println!("  Status: {}", summary.crawl_status);
    println!("  Resumed: {}", if summary.resumed { "yes" } else { "no" });
    println!("  Records found: {}", summary.records_found);
    println!("  Records enqueued: {}", summary.records_enqueued);
    println!("  Records processed: {}", summary.records_processed);
    println!("  Errors: {}", summary.errors_count);
    println!("  Last page: {}", summary.last_page);
    if let Some(error) = &summary.error {
        println!("  Fatal error: {}", error);
    }
}
