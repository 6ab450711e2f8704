mod api;
mod config;
mod cycle;
mod db;
mod error;
mod gate;
mod ingest;
mod llm;
mod marketplace;
mod pricing;
mod retry;
mod state;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, IN_MEMORY_DB};
use crate::cycle::{PriceRunSettings, UpdateCycle};
use crate::db::{ListingStore, SqliteListingStore};
use crate::error::Result;
use crate::gate::ConcurrencyGate;
use crate::ingest::IngestionOrchestrator;
use crate::llm::{GeminiClient, GeminiConfig, HttpImageFetcher};
use crate::marketplace::{HttpMarketplaceClient, SellerDirectory};
use crate::pricing::PriceEngine;
use crate::state::MemoryListingStore;

#[tokio::main]
async fn main() {
    // A missing .env is fine; the real environment still applies.
    let _ = dotenvy::dotenv();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store: Arc<dyn ListingStore> = if cfg.db_path == IN_MEMORY_DB {
        warn!("DB_PATH={IN_MEMORY_DB}: listings live in memory and are lost on exit");
        MemoryListingStore::new()
    } else {
        Arc::new(SqliteListingStore::open(&cfg.db_path).await?)
    };
    info!(
        "Database ready at {} ({} listings)",
        cfg.db_path,
        store.count().await?
    );

    // --- Seller names ---
    let sellers = match &cfg.seller_map_path {
        Some(path) => {
            let dir = SellerDirectory::load(path)?;
            info!("Loaded {} seller names from {path}", dir.len());
            dir
        }
        None => {
            warn!("SELLER_MAP_PATH not set; every listing will be attributed to an unknown seller");
            SellerDirectory::default()
        }
    };

    // --- Clients ---
    let marketplace = Arc::new(HttpMarketplaceClient::new(
        cfg.marketplace_api_url.clone(),
        sellers,
        cfg.marketplace_utc_offset_minutes,
    )?);
    let model = Arc::new(GeminiClient::new(GeminiConfig {
        api_url: cfg.gemini_api_url.clone(),
        api_key: cfg.gemini_api_key.clone(),
        model: cfg.gemini_model.clone(),
    })?);
    let images = Arc::new(HttpImageFetcher::new()?);

    // --- Pipeline ---
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    let orchestrator = Arc::new(IngestionOrchestrator::new(
        marketplace,
        store.clone(),
        ConcurrencyGate::new("marketplace", cfg.marketplace_concurrency),
        &cfg.ingest,
    ));
    let engine = PriceEngine::new(store.clone(), model, images, Arc::clone(&latency));
    let cycle = UpdateCycle::new(
        orchestrator,
        engine,
        Arc::clone(&health),
        cfg.seller_ids.clone(),
        cfg.search_terms.clone(),
        PriceRunSettings {
            batch_size: cfg.price_batch_size,
            concurrency: cfg.price_concurrency,
            test_mode: cfg.price_test_mode,
        },
    );

    info!(
        sellers = %cfg.seller_ids.join(","),
        terms = ?cfg.search_terms,
        model = %cfg.gemini_model,
        test_mode = cfg.price_test_mode,
        "Pipeline configured"
    );

    // --- Single run ---
    if cfg.cycle_interval_secs == 0 {
        let report = cycle.run_once().await;
        info!(
            "Run finished: {} listings crawled, {} processed, {} valued, {} failed",
            report.items_seen(),
            report.price.processed,
            report.price.succeeded,
            report.price.failed,
        );
        return Ok(());
    }

    // --- Scheduled cycles (background) ---
    let every = Duration::from_secs(cfg.cycle_interval_secs);
    info!("Update cycle every {}s", cfg.cycle_interval_secs);
    tokio::spawn(async move { cycle.run(every).await });

    // HTTP API server
    let api_state = ApiState {
        store,
        health,
        latency,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
