//! Catalog markup, mock server helpers and runner builders shared by the tests

use shelfwatch::config::{CrawlerConfig, UserAgentConfig};
use shelfwatch::crawler::{
    build_http_client, CrawlOrchestrator, CrawlRunner, Dispatch, Fetcher, RetryPolicy,
};
use shelfwatch::storage::{CrawlStore, SqliteStorage};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A book as it appears on its detail page
#[derive(Debug, Clone)]
pub struct Book {
    pub slug: String,
    pub name: String,
    pub price: f64,
    pub availability: String,
    pub rating: &'static str,
}

impl Book {
    pub fn new(slug: &str, name: &str, price: f64) -> Self {
        Self {
            slug: slug.to_string(),
            name: name.to_string(),
            price,
            availability: "In stock (22 available)".to_string(),
            rating: "Three",
        }
    }

    pub fn detail_path(&self) -> String {
        format!("/catalogue/{}/index.html", self.slug)
    }

    pub fn detail_url(&self, server: &MockServer) -> String {
        format!("{}{}", server.uri(), self.detail_path())
    }
}

/// `n` distinct books for catalog page `page`
pub fn books_for_page(page: u32, n: usize) -> Vec<Book> {
    (1..=n)
        .map(|i| {
            Book::new(
                &format!("book-{}-{}_{}", page, i, page * 100 + i as u32),
                &format!("Book {} of page {}", i, page),
                10.0 + i as f64,
            )
        })
        .collect()
}

pub fn catalog_path(page: u32) -> String {
    if page <= 1 {
        "/index.html".to_string()
    } else {
        format!("/catalogue/page-{}.html", page)
    }
}

pub fn catalog_html(page: u32, total_pages: u32, books: &[Book]) -> String {
    let pods: String = books
        .iter()
        .map(|book| {
            format!(
                r#"<article class="product_pod"><h3><a href="{}" title="{}">{}</a></h3></article>"#,
                book.detail_path(),
                book.name,
                book.name
            )
        })
        .collect();

    let next = if page < total_pages {
        format!(r#"<li class="next"><a href="page-{}.html">next</a></li>"#, page + 1)
    } else {
        String::new()
    };

    format!(
        r#"<html><body><ol class="row">{}</ol>
        <ul class="pager"><li class="current">Page {} of {}</li>{}</ul>
        </body></html>"#,
        pods, page, total_pages, next
    )
}

pub fn detail_html(book: &Book) -> String {
    format!(
        r#"<html><body>
        <ul class="breadcrumb">
            <li><a href="/index.html">Home</a></li>
            <li><a href="/catalogue/category/books_1/index.html">Books</a></li>
            <li><a href="/catalogue/category/books/poetry_23/index.html">Poetry</a></li>
            <li class="active">{name}</li>
        </ul>
        <div class="item active"><img src="../../media/cache/{slug}.jpg" alt="{name}"></div>
        <div class="product_main">
            <h1>{name}</h1>
            <p class="price_color">£{price:.2}</p>
            <p class="instock availability">
                <i class="icon-ok"></i>
                {availability}
            </p>
            <p class="star-rating {rating}"></p>
        </div>
        <div id="product_description" class="sub-header"><h2>Product Description</h2></div>
        <p>A slim volume about {name}.</p>
        <table class="table table-striped">
            <tr><th>UPC</th><td>a897fe39b1053632</td></tr>
            <tr><th>Price (excl. tax)</th><td>£{price:.2}</td></tr>
            <tr><th>Price (incl. tax)</th><td>£{price:.2}</td></tr>
            <tr><th>Availability</th><td>{availability}</td></tr>
            <tr><th>Number of reviews</th><td>0</td></tr>
        </table>
        </body></html>"#,
        name = book.name,
        slug = book.slug,
        price = book.price,
        availability = book.availability,
        rating = book.rating,
    )
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("content-type", "text/html; charset=utf-8")
}

pub async fn mount_catalog_page(server: &MockServer, page: u32, total_pages: u32, books: &[Book]) {
    Mock::given(method("GET"))
        .and(path(catalog_path(page)))
        .respond_with(html(catalog_html(page, total_pages, books)))
        .mount(server)
        .await;
}

pub async fn mount_detail(server: &MockServer, book: &Book) {
    Mock::given(method("GET"))
        .and(path(book.detail_path()))
        .respond_with(html(detail_html(book)))
        .mount(server)
        .await;
}

/// Mounts `total_pages` catalog pages of `per_page` books with their details
pub async fn mount_catalog(server: &MockServer, total_pages: u32, per_page: usize) -> Vec<Book> {
    let mut all = Vec::new();
    for page in 1..=total_pages {
        let books = books_for_page(page, per_page);
        mount_catalog_page(server, page, total_pages, &books).await;
        for book in &books {
            mount_detail(server, book).await;
        }
        all.extend(books);
    }
    all
}

pub fn crawler_config(base_url: &str) -> CrawlerConfig {
    CrawlerConfig {
        base_url: base_url.to_string(),
        timeout_secs: 5,
        max_retries: 2,
        retry_delay_ms: 10,
        batch_size: 5,
        batch_delay_ms: 0,
        resume_window_hours: 24,
    }
}

pub fn user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "ShelfwatchTest".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

pub fn orchestrator(server: &MockServer) -> CrawlOrchestrator {
    let config = crawler_config(&server.uri());
    let client = build_http_client(&user_agent(), Duration::from_secs(config.timeout_secs))
        .expect("Failed to build HTTP client");
    CrawlOrchestrator::new(
        Fetcher::new(client, RetryPolicy::from_config(&config)),
        &config,
    )
}

pub fn memory_storage() -> Arc<Mutex<SqliteStorage>> {
    Arc::new(Mutex::new(
        SqliteStorage::new_in_memory().expect("Failed to open in-memory storage"),
    ))
}

pub fn inline_runner<S>(server: &MockServer, storage: &Arc<Mutex<S>>) -> CrawlRunner<S>
where
    S: CrawlStore + Send + 'static,
{
    CrawlRunner::new(
        Arc::clone(storage),
        orchestrator(server),
        Dispatch::Inline,
        24,
    )
    .with_config_hash("test-config")
}
