use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::db::store::{ListingStore, UpsertStats};
use crate::error::{AppError, Result};
use crate::types::{Enrichment, Listing, NewListing};

// ---------------------------------------------------------------------------
// MemoryListingStore
// ---------------------------------------------------------------------------

/// In-process listing table. Used for dry runs and as the injected store in
/// pipeline tests. Each entry mutation happens under the shard lock, so an
/// enrichment write is never observed half-applied.
#[derive(Default)]
pub struct MemoryListingStore {
    /// listing_id → Listing
    listings: DashMap<String, Listing>,
}

impl MemoryListingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, listing: Listing) {
        self.listings.insert(listing.id.clone(), listing);
    }

    pub fn snapshot(&self) -> Vec<Listing> {
        let mut all: Vec<Listing> = self.listings.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn upsert_page(&self, listings: &[NewListing]) -> Result<UpsertStats> {
        let mut stats = UpsertStats::default();
        for new in listings {
            match self.listings.entry(new.id.clone()) {
                Entry::Occupied(mut existing) => {
                    existing.get_mut().refresh_from(new.clone());
                    stats.updated += 1;
                }
                Entry::Vacant(slot) => {
                    slot.insert(Listing::from_new(new.clone()));
                    stats.inserted += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn pending(&self, limit: Option<usize>, now_secs: i64) -> Result<Vec<Listing>> {
        let mut pending: Vec<Listing> = self
            .listings
            .iter()
            .filter(|r| r.value().is_pending(now_secs))
            .map(|r| r.value().clone())
            .collect();
        pending.sort_by(|a, b| a.auction_end_at.cmp(&b.auction_end_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            pending.truncate(limit);
        }
        Ok(pending)
    }

    async fn pending_count(&self, now_secs: i64) -> Result<i64> {
        Ok(self.listings.iter().filter(|r| r.value().is_pending(now_secs)).count() as i64)
    }

    async fn apply_enrichment(&self, id: &str, e: &Enrichment) -> Result<()> {
        let mut listing = self
            .listings
            .get_mut(id)
            .ok_or_else(|| AppError::ListingNotFound(id.to_string()))?;
        listing.estimated_price = Some(e.estimated_price);
        listing.profit = Some(e.profit);
        listing.margin = Some(e.margin);
        listing.price_attempted = true;
        listing.last_price_update = Some(e.updated_at);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Listing>> {
        Ok(self.listings.get(id).map(|r| r.value().clone()))
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.listings.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_listing(id: &str, end: i64) -> NewListing {
        NewListing {
            id: id.to_string(),
            seller_id: "198".to_string(),
            seller_name: "Portland".to_string(),
            product_name: "Toaster oven".to_string(),
            category: None,
            image_url: None,
            search_term: String::new(),
            auction_end_at: end,
            bids: 1,
            price: 8.0,
            shipping_price: 12.0,
        }
    }

    #[tokio::test]
    async fn mirrors_sqlite_upsert_counts() {
        let store = MemoryListingStore::new();
        let page = [new_listing("x", 100), new_listing("y", 50)];
        assert_eq!(store.upsert_page(&page).await.unwrap().inserted, 2);
        assert_eq!(store.upsert_page(&page).await.unwrap().updated, 2);
        assert_eq!(store.count().await.unwrap(), 2);

        let order: Vec<_> = store.pending(None, 0).await.unwrap().into_iter().map(|l| l.id).collect();
        assert_eq!(order, vec!["y".to_string(), "x".to_string()]);
    }

    #[tokio::test]
    async fn enrichment_clears_pending() {
        let store = MemoryListingStore::new();
        store.upsert_page(&[new_listing("x", 100)]).await.unwrap();
        assert_eq!(store.pending_count(0).await.unwrap(), 1);

        store
            .apply_enrichment("x", &Enrichment::compute(8.0, 12.0, 0.0, 5))
            .await
            .unwrap();
        assert_eq!(store.pending_count(0).await.unwrap(), 0);
        let l = store.get("x").await.unwrap().unwrap();
        assert_eq!(l.estimated_price, Some(0.0));
        assert_eq!(l.profit, Some(-20.0));
        assert!(l.price_attempted);
    }
}
