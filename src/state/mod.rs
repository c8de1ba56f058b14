//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlStatus`: the status persisted on a crawl checkpoint
//! - `CrawlPhase`: the in-memory phase of the catalog walk, with validated transitions

mod crawl_status;
mod phase;

// Re-export main types
pub use crawl_status::CrawlStatus;
pub use phase::CrawlPhase;
