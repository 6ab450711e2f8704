use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Enrichment, Listing, NewListing};

/// Outcome of persisting one crawled page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub inserted: usize,
    pub updated: usize,
    /// Items whose individual write failed; the rest of the page still commits.
    pub failed: usize,
}

/// The listing table as the pipeline sees it. Both pipelines hold one of these
/// and never talk to each other except through it.
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Insert-or-refresh every listing of one page and commit once at the end.
    /// Enrichment fields of existing rows are left as they are.
    async fn upsert_page(&self, listings: &[NewListing]) -> Result<UpsertStats>;

    /// Pending listings (see [`Listing::is_pending`]), soonest-ending first.
    async fn pending(&self, limit: Option<usize>, now_secs: i64) -> Result<Vec<Listing>>;

    async fn pending_count(&self, now_secs: i64) -> Result<i64>;

    /// Writes all enrichment fields of one listing atomically and marks it attempted.
    async fn apply_enrichment(&self, id: &str, enrichment: &Enrichment) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Listing>>;

    async fn count(&self) -> Result<i64>;
}
