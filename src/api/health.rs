//! Shared health state for the /health endpoint.
//! Updated by the update cycle, read by the API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::types::PriceUpdateReport;

/// Shared pipeline progress. Timestamps are unix seconds, 0 = never.
#[derive(Default)]
pub struct HealthState {
    /// Completed update cycles.
    pub cycles_completed: AtomicU64,
    /// When the last ingestion stage finished.
    pub last_ingest_at: AtomicU64,
    /// Listings seen across all units in the last ingestion stage.
    pub last_ingest_items: AtomicU64,
    /// True while a price update pass is running.
    pub price_run_active: AtomicBool,
    /// When the last price update pass finished.
    pub last_price_run_at: AtomicU64,
    pub last_price_processed: AtomicU64,
    pub last_price_succeeded: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ingest(&self, at_secs: u64, items: u64) {
        self.last_ingest_items.store(items, Ordering::Relaxed);
        self.last_ingest_at.store(at_secs, Ordering::Relaxed);
    }

    pub fn set_price_run_active(&self, v: bool) {
        self.price_run_active.store(v, Ordering::Relaxed);
    }

    pub fn record_price_run(&self, at_secs: u64, report: &PriceUpdateReport) {
        self.last_price_processed.store(report.processed as u64, Ordering::Relaxed);
        self.last_price_succeeded.store(report.succeeded as u64, Ordering::Relaxed);
        self.last_price_run_at.store(at_secs, Ordering::Relaxed);
    }

    pub fn inc_cycles(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn last_ingest_at(&self) -> u64 {
        self.last_ingest_at.load(Ordering::Relaxed)
    }

    pub fn last_ingest_items(&self) -> u64 {
        self.last_ingest_items.load(Ordering::Relaxed)
    }

    pub fn price_run_active(&self) -> bool {
        self.price_run_active.load(Ordering::Relaxed)
    }

    pub fn last_price_run_at(&self) -> u64 {
        self.last_price_run_at.load(Ordering::Relaxed)
    }

    pub fn last_price_processed(&self) -> u64 {
        self.last_price_processed.load(Ordering::Relaxed)
    }

    pub fn last_price_succeeded(&self) -> u64 {
        self.last_price_succeeded.load(Ordering::Relaxed)
    }
}
