use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};

use crate::api::latency::LatencyStats;
use crate::config::{MAX_AI_CONCURRENCY, MAX_BATCH_SIZE, MIN_PRODUCT_NAME_LEN, TEST_MODE_BATCH};
use crate::db::store::ListingStore;
use crate::error::Result;
use crate::gate::ConcurrencyGate;
use crate::llm::gemini::{InferenceClient, InferenceError, InferenceRequest};
use crate::llm::image::ImageFetcher;
use crate::llm::prompt::appraisal_prompt;
use crate::pricing::parser::parse_dollar_amount;
use crate::types::{Enrichment, Estimate, Listing, PriceUpdateReport};

/// Per-item result inside a batch.
struct ItemOutcome {
    estimate: Estimate,
    written: bool,
}

/// Enriches pending listings with model-estimated resale prices.
///
/// Every attempt, valued or not, is written back immediately with
/// `price_attempted = true`, so a restarted run only sees listings that were
/// never attempted. The only throttle on the model is the per-run gate.
#[derive(Clone)]
pub struct PriceEngine {
    store: Arc<dyn ListingStore>,
    model: Arc<dyn InferenceClient>,
    images: Arc<dyn ImageFetcher>,
    latency: Arc<LatencyStats>,
}

impl PriceEngine {
    pub fn new(
        store: Arc<dyn ListingStore>,
        model: Arc<dyn InferenceClient>,
        images: Arc<dyn ImageFetcher>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self {
            store,
            model,
            images,
            latency,
        }
    }

    pub async fn pending_count(&self) -> Result<i64> {
        self.store.pending_count(now_secs()).await
    }

    /// Next listings to appraise, soonest-ending first. Dry runs without an
    /// explicit size take a small fixed batch.
    pub async fn get_pending(&self, batch_size: Option<usize>, test_mode: bool) -> Result<Vec<Listing>> {
        let limit = match (batch_size, test_mode) {
            (Some(size), _) => Some(size),
            (None, true) => Some(TEST_MODE_BATCH),
            (None, false) => None,
        };
        self.store.pending(limit, now_secs()).await
    }

    /// Appraises one listing. Never fails: every failure mode is a variant of
    /// [`Estimate`], and each of them maps to a $0 amount by default.
    pub async fn estimate(&self, listing: &Listing) -> Estimate {
        if listing.product_name.trim().chars().count() < MIN_PRODUCT_NAME_LEN {
            warn!(listing_id = %listing.id, "[PRICE] skipping unappraisable name {:?}", listing.product_name);
            return Estimate::Skipped;
        }

        let mut image_failed = false;
        let image = match listing.image_url.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            Some(reference) => match self.images.load(reference).await {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(listing_id = %listing.id, "[PRICE] image unavailable, falling back to text only: {e}");
                    image_failed = true;
                    None
                }
            },
            None => None,
        };

        let request = InferenceRequest {
            prompt: appraisal_prompt(listing, image.is_some()),
            image,
        };

        let response = self.latency.time(self.model.complete(&request)).await;

        let outcome = match response {
            Ok(text) => match parse_dollar_amount(&text) {
                Some(amount) => {
                    debug!(listing_id = %listing.id, "[PRICE] estimated ${amount:.2}");
                    Estimate::Success(amount)
                }
                None => {
                    warn!(listing_id = %listing.id, "[PRICE] no dollar amount in response: {text:?}");
                    Estimate::ParseFailure
                }
            },
            Err(InferenceError::InvalidResponse(e)) => {
                warn!(listing_id = %listing.id, "[PRICE] malformed model response: {e}");
                Estimate::ParseFailure
            }
            Err(e) => {
                error!(listing_id = %listing.id, "[PRICE] inference failed: {e}");
                Estimate::NetworkFailure
            }
        };

        if image_failed {
            Estimate::ImageFailure {
                text_only: outcome.valued(),
            }
        } else {
            outcome
        }
    }

    /// Writes the attempt back in one statement: estimate, profit, margin,
    /// timestamp and the attempted flag.
    pub async fn apply_result(&self, listing: &Listing, estimate: &Estimate, at: i64) -> Result<Enrichment> {
        let enrichment = Enrichment::compute(listing.price, listing.shipping_price, estimate.amount(), at);
        self.store.apply_enrichment(&listing.id, &enrichment).await?;
        Ok(enrichment)
    }

    /// One enrichment pass. Keeps pulling batches until nothing is pending,
    /// a batch comes back empty, or (in test mode) after the first batch.
    /// Always returns a tally; individual failures are logged and counted.
    pub async fn run_price_update(&self, batch_size: usize, concurrency: usize, test_mode: bool) -> PriceUpdateReport {
        let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        let concurrency = concurrency.clamp(1, MAX_AI_CONCURRENCY);
        let gate = ConcurrencyGate::new("inference", concurrency);
        let mut report = PriceUpdateReport::default();

        match self.pending_count().await {
            Ok(0) => {
                info!("[PRICE] no listings need estimates");
                return report;
            }
            Ok(n) => info!(
                pending = n,
                batch_size,
                concurrency,
                test_mode,
                "[PRICE] {n} listings need estimates"
            ),
            Err(e) => {
                error!("[PRICE] could not count pending listings: {e}");
                return report;
            }
        }

        loop {
            let batch = match self.get_pending(Some(batch_size), test_mode).await {
                Ok(b) => b,
                Err(e) => {
                    error!("[PRICE] could not load pending listings: {e}");
                    break;
                }
            };
            if batch.is_empty() {
                info!("[PRICE] no more listings to process");
                break;
            }

            let (batch_report, written) = self.process_batch(batch, &gate).await;
            report.merge(batch_report);

            if test_mode {
                info!("[PRICE] test mode: stopping after one batch");
                break;
            }
            // Every write in the batch failed; the same listings would come back forever.
            if written == 0 {
                warn!("[PRICE] no progress in last batch, stopping");
                break;
            }

            match self.pending_count().await {
                Ok(0) => break,
                Ok(remaining) => info!(
                    "[PRICE] progress: {} processed, {remaining} remaining",
                    report.processed
                ),
                Err(e) => {
                    error!("[PRICE] could not count pending listings: {e}");
                    break;
                }
            }
        }

        info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            gate = gate.name(),
            limit = gate.limit(),
            peak_in_flight = gate.peak(),
            "[PRICE] update complete: {} processed, {} valued, {} failed",
            report.processed,
            report.succeeded,
            report.failed,
        );
        report
    }

    /// Runs every listing of a batch as its own task under the gate. A failed
    /// or panicked task is counted and does not affect its siblings; a panicked
    /// task's listing is still written back as an unvalued attempt.
    /// Returns the tally and the number of listings whose result was written.
    async fn process_batch(&self, batch: Vec<Listing>, gate: &ConcurrencyGate) -> (PriceUpdateReport, usize) {
        let mut report = PriceUpdateReport::default();
        let mut written = 0usize;
        let mut tasks = JoinSet::new();
        let mut dispatched: HashMap<task::Id, Listing> = HashMap::with_capacity(batch.len());

        debug!("[PRICE] dispatching batch of {}", batch.len());
        for listing in batch {
            let engine = self.clone();
            let gate = gate.clone();
            let item = listing.clone();
            let handle = tasks.spawn(async move { engine.process_item(item, gate).await });
            dispatched.insert(handle.id(), listing);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            report.processed += 1;
            match joined {
                Ok((id, outcome)) => {
                    dispatched.remove(&id);
                    if outcome.written {
                        written += 1;
                    }
                    if outcome.written && outcome.estimate.valued().is_some() {
                        report.succeeded += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    let Some(listing) = dispatched.remove(&e.id()) else {
                        error!("[PRICE] estimation task aborted: {e}");
                        continue;
                    };
                    error!(listing_id = %listing.id, "[PRICE] estimation task aborted: {e}");
                    match self.apply_result(&listing, &Estimate::NetworkFailure, now_secs()).await {
                        Ok(_) => written += 1,
                        Err(e) => {
                            error!(listing_id = %listing.id, "[PRICE] failed to store estimate: {e}");
                        }
                    }
                }
            }
        }

        info!(
            "[PRICE] batch complete: {} valued, {} failed",
            report.succeeded, report.failed
        );
        (report, written)
    }

    async fn process_item(&self, listing: Listing, gate: ConcurrencyGate) -> ItemOutcome {
        let estimate = gate.run(self.estimate(&listing)).await;

        let written = match self.apply_result(&listing, &estimate, now_secs()).await {
            Ok(e) => {
                info!(
                    listing_id = %listing.id,
                    outcome = estimate.label(),
                    "[PRICE] {}: estimate ${:.2}, profit ${:.2}, margin {:.1}%",
                    listing.product_name,
                    e.estimated_price,
                    e.profit,
                    e.margin,
                );
                true
            }
            Err(e) => {
                error!(listing_id = %listing.id, "[PRICE] failed to store estimate: {e}");
                false
            }
        };

        ItemOutcome { estimate, written }
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
