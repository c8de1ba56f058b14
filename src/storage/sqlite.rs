//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the storage traits.

use crate::catalog::{ChangeEvent, ChangeType, CrawledRecord, NewChangeEvent, Product, ProductFields};
use crate::state::CrawlStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    CatalogStore, ChangeLogStore, CheckpointStore, FailureStore, ProductStore, StorageError,
    StorageResult,
};
use crate::storage::{
    ChangeFilter, CrawlCheckpoint, FailedFetch, NewFailedFetch, ProductFilter, ProductSort,
};
use crate::ShelfwatchError;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;

const PRODUCT_COLUMNS: &str = "id, source_url, name, description, category, price_excl_tax, \
     price_incl_tax, availability, num_reviews, image_url, rating, html_snapshot, content_hash, \
     crawl_timestamp, created_at, updated_at";

const CHANGE_COLUMNS: &str = "id, product_id, product_name, change_type, field_changed, \
     old_value, new_value, crawl_id, timestamp";

const CHECKPOINT_COLUMNS: &str = "id, timestamp, base_url, last_page_crawled, total_pages, \
     records_crawled, errors_count, error_messages, status, is_complete, config_hash";

const FAILURE_COLUMNS: &str = "id, crawl_id, url, raw_content, reason, timestamp";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path` and applies the schema
    pub fn new(path: &Path) -> Result<Self, ShelfwatchError> {
        let conn = Connection::open(path).map_err(StorageError::from)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )
        .map_err(StorageError::from)?;

        initialize_schema(&conn).map_err(StorageError::from)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, ShelfwatchError> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(StorageError::from)?;
        initialize_schema(&conn).map_err(StorageError::from)?;
        Ok(Self { conn })
    }
}

/// Formats a timestamp so that string order matches time order
pub(crate) fn db_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Reads a text column through one of the `from_db_string` parsers
fn enum_column<T>(
    row: &Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown value '{}'", raw).into(),
        )
    })
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        source_url: row.get(1)?,
        fields: ProductFields {
            name: row.get(2)?,
            description: row.get(3)?,
            category: row.get(4)?,
            price_excl_tax: row.get(5)?,
            price_incl_tax: row.get(6)?,
            availability: row.get(7)?,
            num_reviews: row.get(8)?,
            image_url: row.get(9)?,
            rating: row.get(10)?,
        },
        html_snapshot: row.get(11)?,
        content_hash: row.get(12)?,
        crawl_timestamp: timestamp_column(row, 13)?,
        created_at: timestamp_column(row, 14)?,
        updated_at: timestamp_column(row, 15)?,
    })
}

fn change_from_row(row: &Row<'_>) -> rusqlite::Result<ChangeEvent> {
    Ok(ChangeEvent {
        id: row.get(0)?,
        product_id: row.get(1)?,
        product_name: row.get(2)?,
        change_type: enum_column(row, 3, ChangeType::from_db_string)?,
        field_changed: row.get(4)?,
        old_value: row.get(5)?,
        new_value: row.get(6)?,
        crawl_id: row.get(7)?,
        timestamp: timestamp_column(row, 8)?,
    })
}

fn checkpoint_from_row(row: &Row<'_>) -> rusqlite::Result<CrawlCheckpoint> {
    let raw_messages: String = row.get(7)?;
    let error_messages = serde_json::from_str(&raw_messages)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    Ok(CrawlCheckpoint {
        id: row.get(0)?,
        timestamp: timestamp_column(row, 1)?,
        base_url: row.get(2)?,
        last_page_crawled: row.get(3)?,
        total_pages: row.get(4)?,
        records_crawled: row.get::<_, i64>(5)? as u64,
        errors_count: row.get::<_, i64>(6)? as u64,
        error_messages,
        status: enum_column(row, 8, CrawlStatus::from_db_string)?,
        is_complete: row.get(9)?,
        config_hash: row.get(10)?,
    })
}

fn failure_from_row(row: &Row<'_>) -> rusqlite::Result<FailedFetch> {
    Ok(FailedFetch {
        id: row.get(0)?,
        crawl_id: row.get(1)?,
        url: row.get(2)?,
        raw_content: row.get(3)?,
        reason: row.get(4)?,
        timestamp: timestamp_column(row, 5)?,
    })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

fn insert_product(conn: &Connection, record: &CrawledRecord) -> StorageResult<Product> {
    let now = Utc::now();
    let ts = db_timestamp(now);
    let f = &record.fields;

    conn.execute(
        "INSERT INTO products (source_url, name, description, category, price_excl_tax,
            price_incl_tax, availability, num_reviews, image_url, rating, html_snapshot,
            content_hash, crawl_timestamp, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13, ?13)",
        params![
            record.source_url,
            f.name,
            f.description,
            f.category,
            f.price_excl_tax,
            f.price_incl_tax,
            f.availability,
            f.num_reviews,
            f.image_url,
            f.rating,
            record.html_snapshot,
            record.content_hash,
            ts,
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            StorageError::ConstraintViolation(format!(
                "product already exists: {}",
                record.source_url
            ))
        } else {
            StorageError::from(e)
        }
    })?;

    Ok(Product {
        id: conn.last_insert_rowid(),
        fields: f.clone(),
        source_url: record.source_url.clone(),
        html_snapshot: record.html_snapshot.clone(),
        content_hash: record.content_hash.clone(),
        crawl_timestamp: now,
        created_at: now,
        updated_at: now,
    })
}

/// Overwrites every stored column of `product` except its HTML snapshot
fn write_product(conn: &Connection, product: &Product) -> StorageResult<()> {
    let f = &product.fields;
    let updated = conn.execute(
        "UPDATE products SET source_url = ?1, name = ?2, description = ?3, category = ?4,
            price_excl_tax = ?5, price_incl_tax = ?6, availability = ?7, num_reviews = ?8,
            image_url = ?9, rating = ?10, content_hash = ?11, crawl_timestamp = ?12,
            updated_at = ?13
         WHERE id = ?14",
        params![
            product.source_url,
            f.name,
            f.description,
            f.category,
            f.price_excl_tax,
            f.price_incl_tax,
            f.availability,
            f.num_reviews,
            f.image_url,
            f.rating,
            product.content_hash,
            db_timestamp(product.crawl_timestamp),
            db_timestamp(Utc::now()),
            product.id,
        ],
    )?;

    if updated == 0 {
        return Err(StorageError::ProductNotFound(product.id));
    }
    Ok(())
}

fn insert_change(conn: &Connection, change: &NewChangeEvent) -> StorageResult<ChangeEvent> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO change_events (product_id, product_name, change_type, field_changed,
            old_value, new_value, crawl_id, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            change.product_id,
            change.product_name,
            change.change_type.to_db_string(),
            change.field_changed,
            change.old_value,
            change.new_value,
            change.crawl_id,
            db_timestamp(now),
        ],
    )?;

    Ok(ChangeEvent {
        id: conn.last_insert_rowid(),
        product_id: change.product_id,
        product_name: change.product_name.clone(),
        change_type: change.change_type,
        field_changed: change.field_changed.clone(),
        old_value: change.old_value.clone(),
        new_value: change.new_value.clone(),
        crawl_id: change.crawl_id,
        timestamp: now,
    })
}

impl ProductStore for SqliteStorage {
    fn find_by_source_url(&self, source_url: &str) -> StorageResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products WHERE source_url = ?1", PRODUCT_COLUMNS);
        let product = self
            .conn
            .query_row(&sql, params![source_url], product_from_row)
            .optional()?;
        Ok(product)
    }

    fn find_product(&self, id: i64) -> StorageResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS);
        let product = self
            .conn
            .query_row(&sql, params![id], product_from_row)
            .optional()?;
        Ok(product)
    }

    fn create_product(&mut self, record: &CrawledRecord) -> StorageResult<Product> {
        insert_product(&self.conn, record)
    }

    fn update_product(&mut self, product: &Product) -> StorageResult<()> {
        write_product(&self.conn, product)
    }

    fn bulk_create_products(&mut self, records: &[CrawledRecord]) -> StorageResult<usize> {
        let ts = db_timestamp(Utc::now());
        let tx = self.conn.transaction()?;
        let mut created = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO products (source_url, name, description, category,
                    price_excl_tax, price_incl_tax, availability, num_reviews, image_url, rating,
                    html_snapshot, content_hash, crawl_timestamp, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13, ?13)",
            )?;
            for record in records {
                let f = &record.fields;
                created += stmt.execute(params![
                    record.source_url,
                    f.name,
                    f.description,
                    f.category,
                    f.price_excl_tax,
                    f.price_incl_tax,
                    f.availability,
                    f.num_reviews,
                    f.image_url,
                    f.rating,
                    record.html_snapshot,
                    record.content_hash,
                    ts,
                ])?;
            }
        }
        tx.commit()?;
        Ok(created)
    }

    fn list_products(
        &self,
        filter: &ProductFilter,
        sort: ProductSort,
        skip: u64,
        limit: u64,
    ) -> StorageResult<(Vec<Product>, u64)> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(category) = &filter.category {
            clauses.push("category = ?");
            values.push(Value::Text(category.clone()));
        }
        if let Some(min) = filter.min_price {
            clauses.push("price_incl_tax >= ?");
            values.push(Value::Real(min));
        }
        if let Some(max) = filter.max_price {
            clauses.push("price_incl_tax <= ?");
            values.push(Value::Real(max));
        }
        if let Some(rating) = filter.rating {
            clauses.push("rating = ?");
            values.push(Value::Integer(i64::from(rating)));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM products{}", where_sql),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM products{} ORDER BY {} LIMIT ? OFFSET ?",
            PRODUCT_COLUMNS,
            where_sql,
            sort.order_by()
        );
        values.push(Value::Integer(limit as i64));
        values.push(Value::Integer(skip as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let products = stmt
            .query_map(params_from_iter(values.iter()), product_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((products, total as u64))
    }

    fn count_products(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl ChangeLogStore for SqliteStorage {
    fn record_change(&mut self, change: &NewChangeEvent) -> StorageResult<ChangeEvent> {
        insert_change(&self.conn, change)
    }

    fn list_changes(
        &self,
        filter: &ChangeFilter,
        skip: u64,
        limit: u64,
    ) -> StorageResult<(Vec<ChangeEvent>, u64)> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(product_id) = filter.product_id {
            clauses.push("product_id = ?");
            values.push(Value::Integer(product_id));
        }
        if let Some(change_type) = filter.change_type {
            clauses.push("change_type = ?");
            values.push(Value::Text(change_type.to_db_string().to_string()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM change_events{}", where_sql),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM change_events{} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            CHANGE_COLUMNS, where_sql
        );
        values.push(Value::Integer(limit as i64));
        values.push(Value::Integer(skip as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let changes = stmt
            .query_map(params_from_iter(values.iter()), change_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((changes, total as u64))
    }

    fn count_changes_by_type(&self) -> StorageResult<Vec<(ChangeType, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT change_type, COUNT(*) FROM change_events GROUP BY change_type ORDER BY change_type",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(raw, count)| {
                ChangeType::from_db_string(&raw).map(|change_type| (change_type, count as u64))
            })
            .collect())
    }
}

impl CatalogStore for SqliteStorage {
    fn create_product_logged(
        &mut self,
        record: &CrawledRecord,
        mut event: NewChangeEvent,
    ) -> StorageResult<Product> {
        let tx = self.conn.transaction()?;
        let product = insert_product(&tx, record)?;
        event.product_id = product.id;
        insert_change(&tx, &event)?;
        tx.commit()?;
        Ok(product)
    }

    fn update_product_logged(
        &mut self,
        product: &Product,
        changes: &[NewChangeEvent],
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        for change in changes {
            insert_change(&tx, change)?;
        }
        write_product(&tx, product)?;
        tx.commit()?;
        Ok(())
    }
}

impl CheckpointStore for SqliteStorage {
    fn create_checkpoint(&mut self, checkpoint: &CrawlCheckpoint) -> StorageResult<i64> {
        let messages = serde_json::to_string(&checkpoint.error_messages)?;
        self.conn.execute(
            "INSERT INTO crawl_checkpoints (timestamp, updated_at, base_url, last_page_crawled,
                total_pages, records_crawled, errors_count, error_messages, status, is_complete,
                config_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                db_timestamp(checkpoint.timestamp),
                db_timestamp(Utc::now()),
                checkpoint.base_url,
                checkpoint.last_page_crawled,
                checkpoint.total_pages,
                checkpoint.records_crawled as i64,
                checkpoint.errors_count as i64,
                messages,
                checkpoint.status.to_db_string(),
                checkpoint.is_complete,
                checkpoint.config_hash,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_checkpoint(&mut self, checkpoint: &CrawlCheckpoint) -> StorageResult<()> {
        let messages = serde_json::to_string(&checkpoint.error_messages)?;
        let updated = self.conn.execute(
            "UPDATE crawl_checkpoints SET updated_at = ?1, last_page_crawled = ?2,
                total_pages = ?3, records_crawled = ?4, errors_count = ?5, error_messages = ?6,
                status = ?7, is_complete = ?8
             WHERE id = ?9",
            params![
                db_timestamp(Utc::now()),
                checkpoint.last_page_crawled,
                checkpoint.total_pages,
                checkpoint.records_crawled as i64,
                checkpoint.errors_count as i64,
                messages,
                checkpoint.status.to_db_string(),
                checkpoint.is_complete,
                checkpoint.id,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::CheckpointNotFound(checkpoint.id));
        }
        Ok(())
    }

    fn get_latest_checkpoint(&self) -> StorageResult<Option<CrawlCheckpoint>> {
        let sql = format!(
            "SELECT {} FROM crawl_checkpoints ORDER BY timestamp DESC, id DESC LIMIT 1",
            CHECKPOINT_COLUMNS
        );
        let checkpoint = self
            .conn
            .query_row(&sql, [], checkpoint_from_row)
            .optional()?;
        Ok(checkpoint)
    }

    fn get_latest_incomplete_within(
        &self,
        window_hours: u32,
    ) -> StorageResult<Option<CrawlCheckpoint>> {
        let cutoff = Utc::now() - Duration::hours(i64::from(window_hours));
        let sql = format!(
            "SELECT {} FROM crawl_checkpoints
             WHERE timestamp >= ?1 AND is_complete = 0 AND status IN (?2, ?3)
             ORDER BY timestamp DESC, id DESC LIMIT 1",
            CHECKPOINT_COLUMNS
        );
        let checkpoint = self
            .conn
            .query_row(
                &sql,
                params![
                    db_timestamp(cutoff),
                    CrawlStatus::InProgress.to_db_string(),
                    CrawlStatus::Partial.to_db_string(),
                ],
                checkpoint_from_row,
            )
            .optional()?;
        Ok(checkpoint)
    }
}

impl FailureStore for SqliteStorage {
    fn record_failure(&mut self, failure: &NewFailedFetch) -> StorageResult<FailedFetch> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO failed_fetches (crawl_id, url, raw_content, reason, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                failure.crawl_id,
                failure.url,
                failure.raw_content,
                failure.reason,
                db_timestamp(now),
            ],
        )?;

        Ok(FailedFetch {
            id: self.conn.last_insert_rowid(),
            crawl_id: failure.crawl_id,
            url: failure.url.clone(),
            raw_content: failure.raw_content.clone(),
            reason: failure.reason.clone(),
            timestamp: now,
        })
    }

    fn list_failures(
        &self,
        crawl_id: Option<i64>,
        skip: u64,
        limit: u64,
    ) -> StorageResult<(Vec<FailedFetch>, u64)> {
        let where_sql = if crawl_id.is_some() {
            " WHERE crawl_id = ?"
        } else {
            ""
        };
        let mut values: Vec<Value> = crawl_id.map(Value::Integer).into_iter().collect();

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM failed_fetches{}", where_sql),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM failed_fetches{} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            FAILURE_COLUMNS, where_sql
        );
        values.push(Value::Integer(limit as i64));
        values.push(Value::Integer(skip as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let failures = stmt
            .query_map(params_from_iter(values.iter()), failure_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((failures, total as u64))
    }

    fn count_failures(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM failed_fetches", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
