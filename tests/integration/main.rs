//! Integration tests for Shelfwatch
//!
//! These tests run crawls against wiremock catalog servers backed by
//! in-memory SQLite storage and check the resulting checkpoints, products
//! and change log end-to-end.

mod change_tests;
mod crawl_tests;
mod fetcher_tests;
mod fixtures;
