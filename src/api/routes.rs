use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::api::health::HealthState;
use crate::api::latency::{LatencySnapshot, LatencyStats};
use crate::db::store::ListingStore;
use crate::error::AppError;
use crate::types::Listing;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn ListingStore>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/listings/pending/count", get(get_pending_count))
        .route("/listings/:id", get(get_listing))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cycles_completed: u64,
    pub last_ingest_at: Option<u64>,
    pub last_ingest_items: u64,
    pub price_run_active: bool,
    pub last_price_run_at: Option<u64>,
    pub last_price_processed: u64,
    pub last_price_succeeded: u64,
    pub listings_total: i64,
}

#[derive(Serialize)]
pub struct PendingCountResponse {
    pub pending: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let h = &state.health;
    let listings_total = state.store.count().await?;
    let nonzero = |v: u64| (v > 0).then_some(v);

    Ok(Json(HealthResponse {
        status: "ok",
        cycles_completed: h.cycles_completed(),
        last_ingest_at: nonzero(h.last_ingest_at()),
        last_ingest_items: h.last_ingest_items(),
        price_run_active: h.price_run_active(),
        last_price_run_at: nonzero(h.last_price_run_at()),
        last_price_processed: h.last_price_processed(),
        last_price_succeeded: h.last_price_succeeded(),
        listings_total,
    }))
}

async fn get_pending_count(State(state): State<ApiState>) -> Result<Json<PendingCountResponse>, AppError> {
    let pending = state
        .store
        .pending_count(chrono::Utc::now().timestamp())
        .await?;
    Ok(Json(PendingCountResponse { pending }))
}

async fn get_listing(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Listing>, AppError> {
    state
        .store
        .get(&id)
        .await?
        .map(Json)
        .ok_or(AppError::ListingNotFound(id))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryListingStore;
    use crate::types::{NewListing, PriceUpdateReport};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn listing(id: &str, end: i64) -> NewListing {
        NewListing {
            id: id.to_string(),
            seller_id: "19".to_string(),
            seller_name: "Seattle".to_string(),
            product_name: "Espresso machine".to_string(),
            category: None,
            image_url: None,
            search_term: String::new(),
            auction_end_at: end,
            bids: 0,
            price: 25.0,
            shipping_price: 9.0,
        }
    }

    async fn state() -> ApiState {
        let store = MemoryListingStore::new();
        store
            .upsert_page(&[listing("live", 4_102_444_800), listing("ended", 1)])
            .await
            .unwrap();
        ApiState {
            store,
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new()),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn pending_count_ignores_ended_listings() {
        let (status, json) = get_json(router(state().await), "/listings/pending/count").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["pending"], 1);
    }

    #[tokio::test]
    async fn health_reports_cycle_progress() {
        let state = state().await;
        state.health.record_ingest(1_700_000_000, 2);
        state.health.record_price_run(
            1_700_000_100,
            &PriceUpdateReport { processed: 3, succeeded: 2, failed: 1 },
        );
        state.health.inc_cycles();

        let (status, json) = get_json(router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["cycles_completed"], 1);
        assert_eq!(json["last_ingest_at"], 1_700_000_000u64);
        assert_eq!(json["last_price_succeeded"], 2);
        assert_eq!(json["price_run_active"], false);
        assert_eq!(json["listings_total"], 2);
    }

    #[tokio::test]
    async fn unknown_listing_is_404() {
        let app = router(state().await);
        let (status, json) = get_json(app.clone(), "/listings/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["id"], "live");

        let (status, _) = get_json(app, "/listings/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn latency_stats_in_milliseconds() {
        let state = state().await;
        let (_, empty) = get_json(router(state.clone()), "/stats/latency").await;
        assert_eq!(empty["samples"], 0);
        assert!(empty["p50_ms"].is_null());

        state.latency.record(std::time::Duration::from_millis(250));
        let (_, json) = get_json(router(state), "/stats/latency").await;
        assert_eq!(json["samples"], 1);
        let p50 = json["p50_ms"].as_f64().unwrap();
        assert!((249.0..=251.0).contains(&p50), "p50 was {p50}");
    }
}
