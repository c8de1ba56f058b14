//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the catalog database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Stored products, one per source URL
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_url TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL,
    price_excl_tax REAL NOT NULL,
    price_incl_tax REAL NOT NULL,
    availability TEXT NOT NULL,
    num_reviews INTEGER NOT NULL DEFAULT 0,
    image_url TEXT NOT NULL DEFAULT '',
    rating INTEGER NOT NULL,
    html_snapshot TEXT NOT NULL DEFAULT '',
    content_hash TEXT NOT NULL,
    crawl_timestamp TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_products_category ON products(category);
CREATE INDEX IF NOT EXISTS idx_products_price ON products(price_incl_tax);
CREATE INDEX IF NOT EXISTS idx_products_rating ON products(rating);
CREATE INDEX IF NOT EXISTS idx_products_reviews ON products(num_reviews);

-- Append-only change log
CREATE TABLE IF NOT EXISTS change_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products(id),
    product_name TEXT NOT NULL,
    change_type TEXT NOT NULL,
    field_changed TEXT,
    old_value TEXT,
    new_value TEXT,
    crawl_id INTEGER,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_change_events_product ON change_events(product_id);
CREATE INDEX IF NOT EXISTS idx_change_events_type ON change_events(change_type);

-- Crawl progress, one row per run
CREATE TABLE IF NOT EXISTS crawl_checkpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    base_url TEXT NOT NULL DEFAULT '',
    last_page_crawled INTEGER NOT NULL DEFAULT 0,
    total_pages INTEGER,
    records_crawled INTEGER NOT NULL DEFAULT 0,
    errors_count INTEGER NOT NULL DEFAULT 0,
    error_messages TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL,
    is_complete INTEGER NOT NULL DEFAULT 0,
    config_hash TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_timestamp ON crawl_checkpoints(timestamp);

-- Detail pages that could not be fetched or parsed
CREATE TABLE IF NOT EXISTS failed_fetches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawl_id INTEGER,
    url TEXT NOT NULL,
    raw_content TEXT,
    reason TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_failed_fetches_crawl ON failed_fetches(crawl_id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
