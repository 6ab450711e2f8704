use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::api::health::HealthState;
use crate::ingest::{IngestReport, IngestionOrchestrator};
use crate::pricing::PriceEngine;
use crate::types::PriceUpdateReport;

/// Price-update knobs applied to every cycle.
#[derive(Debug, Clone, Copy)]
pub struct PriceRunSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub test_mode: bool,
}

/// Outcome of one ingest-then-price cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub ingest: Vec<IngestReport>,
    pub price: PriceUpdateReport,
}

impl CycleReport {
    pub fn items_seen(&self) -> usize {
        self.ingest.iter().map(|r| r.items_seen).sum()
    }
}

/// Full refresh: crawl every unit concurrently, then enrich what is pending.
pub struct UpdateCycle {
    orchestrator: Arc<IngestionOrchestrator>,
    engine: PriceEngine,
    health: Arc<HealthState>,
    seller_ids: Vec<String>,
    search_terms: Vec<String>,
    price: PriceRunSettings,
}

impl UpdateCycle {
    pub fn new(
        orchestrator: Arc<IngestionOrchestrator>,
        engine: PriceEngine,
        health: Arc<HealthState>,
        seller_ids: Vec<String>,
        search_terms: Vec<String>,
        price: PriceRunSettings,
    ) -> Self {
        Self {
            orchestrator,
            engine,
            health,
            seller_ids,
            search_terms,
            price,
        }
    }

    pub async fn run_once(&self) -> CycleReport {
        info!(
            units = self.search_terms.len(),
            sellers = self.seller_ids.len(),
            "[CYCLE] ingestion starting"
        );
        let ingest = self
            .orchestrator
            .run_units(&self.seller_ids, &self.search_terms)
            .await;
        let items: usize = ingest.iter().map(|r| r.items_seen).sum();
        self.health.record_ingest(now_secs(), items as u64);

        self.health.set_price_run_active(true);
        let price = self
            .engine
            .run_price_update(self.price.batch_size, self.price.concurrency, self.price.test_mode)
            .await;
        self.health.set_price_run_active(false);
        self.health.record_price_run(now_secs(), &price);
        self.health.inc_cycles();

        let report = CycleReport { ingest, price };
        info!(
            items = report.items_seen(),
            estimated = report.price.processed,
            "[CYCLE] complete: {} listings crawled, {} estimated",
            report.items_seen(),
            report.price.processed,
        );
        report
    }

    /// Runs a cycle every `every`. A cycle that overruns delays the next tick
    /// instead of stacking up.
    pub async fn run(self, every: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.run_once().await;
            if report.ingest.iter().all(|r| r.items_seen == 0) {
                warn!("[CYCLE] no listings returned by any unit");
            }
        }
    }
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
