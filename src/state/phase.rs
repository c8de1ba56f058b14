/// Phases the crawl producer moves through while walking the catalog
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlPhase {
    Idle,
    FetchingCatalog,
    ExtractingLinks,
    FetchingDetailBatch,
    Paginating,
    Completed,
    Failed,
}

impl CrawlPhase {
    /// Returns true once the producer has stopped for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if the producer may move from `self` to `next`
    ///
    /// Any live phase may fail. A catalog fetch that fails ends the walk as
    /// `Completed`, as does a page without a next-page link.
    pub fn can_transition_to(&self, next: CrawlPhase) -> bool {
        use CrawlPhase::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }

        matches!(
            (self, next),
            (Idle, FetchingCatalog)
                | (FetchingCatalog, ExtractingLinks)
                | (FetchingCatalog, Completed)
                | (ExtractingLinks, FetchingDetailBatch)
                | (ExtractingLinks, Paginating)
                | (ExtractingLinks, Completed)
                | (FetchingDetailBatch, FetchingDetailBatch)
                | (FetchingDetailBatch, Paginating)
                | (FetchingDetailBatch, Completed)
                | (Paginating, FetchingCatalog)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FetchingCatalog => "fetching_catalog",
            Self::ExtractingLinks => "extracting_links",
            Self::FetchingDetailBatch => "fetching_detail_batch",
            Self::Paginating => "paginating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
