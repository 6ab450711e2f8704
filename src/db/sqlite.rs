use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::warn;

use crate::db::store::{ListingStore, UpsertStats};
use crate::error::{AppError, Result};
use crate::types::{Enrichment, Listing, NewListing};

const PENDING_FILTER: &str =
    "(estimated_price IS NULL OR price_attempted = 0) AND auction_end_at > ?";

/// SQLite-backed listing table. Each call commits before returning.
#[derive(Clone)]
pub struct SqliteListingStore {
    pool: SqlitePool,
}

impl SqliteListingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database file and applies migrations.
    pub async fn open(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Private in-memory database. A single never-recycled connection keeps it alive.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl ListingStore for SqliteListingStore {
    async fn upsert_page(&self, listings: &[NewListing]) -> Result<UpsertStats> {
        let mut stats = UpsertStats::default();
        let mut tx = self.pool.begin().await?;

        for l in listings {
            let exists: Option<String> = match sqlx::query_scalar("SELECT id FROM listings WHERE id = ?")
                .bind(&l.id)
                .fetch_optional(&mut *tx)
                .await
            {
                Ok(row) => row,
                Err(e) => {
                    warn!(listing_id = %l.id, "Existence check failed: {e}");
                    stats.failed += 1;
                    continue;
                }
            };

            let result = if exists.is_some() {
                sqlx::query(
                    r#"
                    UPDATE listings SET
                        seller_id = ?, seller_name = ?, product_name = ?, category = ?,
                        image_url = ?, search_term = ?, auction_end_at = ?, bids = ?,
                        price = ?, shipping_price = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&l.seller_id)
                .bind(&l.seller_name)
                .bind(&l.product_name)
                .bind(&l.category)
                .bind(&l.image_url)
                .bind(&l.search_term)
                .bind(l.auction_end_at)
                .bind(l.bids)
                .bind(l.price)
                .bind(l.shipping_price)
                .bind(&l.id)
                .execute(&mut *tx)
                .await
            } else {
                sqlx::query(
                    r#"
                    INSERT INTO listings (
                        id, seller_id, seller_name, product_name, category,
                        image_url, search_term, auction_end_at, bids, price, shipping_price
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&l.id)
                .bind(&l.seller_id)
                .bind(&l.seller_name)
                .bind(&l.product_name)
                .bind(&l.category)
                .bind(&l.image_url)
                .bind(&l.search_term)
                .bind(l.auction_end_at)
                .bind(l.bids)
                .bind(l.price)
                .bind(l.shipping_price)
                .execute(&mut *tx)
                .await
            };

            match (result, exists.is_some()) {
                (Ok(_), true) => stats.updated += 1,
                (Ok(_), false) => stats.inserted += 1,
                (Err(e), _) => {
                    warn!(listing_id = %l.id, "Listing write failed: {e}");
                    stats.failed += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(stats)
    }

    async fn pending(&self, limit: Option<usize>, now_secs: i64) -> Result<Vec<Listing>> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let sql = format!(
            "SELECT * FROM listings WHERE {PENDING_FILTER} ORDER BY auction_end_at ASC, id ASC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, Listing>(&sql)
            .bind(now_secs)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn pending_count(&self, now_secs: i64) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM listings WHERE {PENDING_FILTER}");
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(now_secs)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn apply_enrichment(&self, id: &str, e: &Enrichment) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE listings SET
                estimated_price = ?,
                profit = ?,
                margin = ?,
                price_attempted = 1,
                last_price_update = ?
            WHERE id = ?
            "#,
        )
        .bind(e.estimated_price)
        .bind(e.profit)
        .bind(e.margin)
        .bind(e.updated_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::ListingNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Listing>> {
        let row = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
