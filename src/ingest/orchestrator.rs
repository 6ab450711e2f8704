use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{IngestSettings, PAGE_SIZE};
use crate::db::store::ListingStore;
use crate::gate::ConcurrencyGate;
use crate::marketplace::MarketplaceClient;
use crate::retry::RetryPolicy;

/// Why a crawl unit stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// A page came back with no items.
    NoItems,
    /// A page held fewer than `PAGE_SIZE` items, so it was the last one.
    ShortPage,
    /// The configured page cap was reached.
    PageCap,
    /// A page could not be fetched within the retry budget.
    FetchFailed,
    /// A page could not be committed to the store.
    StoreFailed,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Termination::NoItems => "no_items",
            Termination::ShortPage => "short_page",
            Termination::PageCap => "page_cap",
            Termination::FetchFailed => "fetch_failed",
            Termination::StoreFailed => "store_failed",
        };
        write!(f, "{s}")
    }
}

/// Summary of one crawl unit.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub search_term: String,
    pub pages: u32,
    pub items_seen: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub total_hint: Option<u64>,
    pub termination: Termination,
}

impl IngestReport {
    fn new(search_term: &str) -> Self {
        Self {
            search_term: search_term.to_string(),
            pages: 0,
            items_seen: 0,
            inserted: 0,
            updated: 0,
            failed: 0,
            total_hint: None,
            termination: Termination::NoItems,
        }
    }
}

enum CrawlState {
    FetchPage(u32),
    Done(Termination),
}

/// Crawls (seller-set, search-term) units into the listing store.
///
/// A unit walks pages until the marketplace runs dry, committing every page
/// before asking for the next. Fetch failures are retried with growing
/// backoff; running out of retries ends the unit quietly, exactly like
/// reaching the last page.
pub struct IngestionOrchestrator {
    client: Arc<dyn MarketplaceClient>,
    store: Arc<dyn ListingStore>,
    /// Bounds page fetches in flight across all units.
    gate: ConcurrencyGate,
    retry: RetryPolicy,
    max_pages: u32,
    page_delay: Duration,
}

impl IngestionOrchestrator {
    pub fn new(
        client: Arc<dyn MarketplaceClient>,
        store: Arc<dyn ListingStore>,
        gate: ConcurrencyGate,
        settings: &IngestSettings,
    ) -> Self {
        Self {
            client,
            store,
            gate,
            retry: RetryPolicy::new(settings.max_attempts, settings.backoff_base),
            max_pages: settings.max_pages.max(1),
            page_delay: settings.page_delay,
        }
    }

    /// Runs every search term as its own unit, concurrently. Units share the
    /// marketplace gate and nothing else.
    pub async fn run_units(&self, seller_ids: &[String], search_terms: &[String]) -> Vec<IngestReport> {
        join_all(
            search_terms
                .iter()
                .map(|term| self.run_ingestion(seller_ids, term)),
        )
        .await
    }

    /// Crawls one unit to exhaustion. Never fails: every stop reason is
    /// reported in the returned `termination`.
    pub async fn run_ingestion(&self, seller_ids: &[String], search_term: &str) -> IngestReport {
        let unit = unit_label(seller_ids, search_term);
        let mut report = IngestReport::new(search_term);
        info!(unit = %unit, "[INGEST] starting crawl");

        let mut state = CrawlState::FetchPage(1);
        let termination = loop {
            state = match state {
                CrawlState::FetchPage(page) => {
                    self.crawl_page(seller_ids, search_term, page, &unit, &mut report)
                        .await
                }
                CrawlState::Done(t) => break t,
            };
        };
        report.termination = termination;

        match termination {
            Termination::FetchFailed | Termination::StoreFailed => error!(
                unit = %unit,
                pages = report.pages,
                termination = %termination,
                "[INGEST] crawl ended early after {} pages ({} new, {} refreshed)",
                report.pages, report.inserted, report.updated,
            ),
            _ => info!(
                unit = %unit,
                pages = report.pages,
                items = report.items_seen,
                termination = %termination,
                "[INGEST] crawl complete: {} pages, {} new, {} refreshed, {} failed",
                report.pages, report.inserted, report.updated, report.failed,
            ),
        }
        report
    }

    async fn crawl_page(
        &self,
        seller_ids: &[String],
        search_term: &str,
        page: u32,
        unit: &str,
        report: &mut IngestReport,
    ) -> CrawlState {
        let what = format!("page {page} of {unit}");
        let fetched = self
            .retry
            .run(&what, |_| {
                self.gate
                    .run(self.client.fetch_page(seller_ids, page, search_term))
            })
            .await;

        let Some(result) = fetched else {
            return CrawlState::Done(Termination::FetchFailed);
        };

        report.pages += 1;
        if result.total_count.is_some() {
            report.total_hint = result.total_count;
        }
        if result.received == 0 {
            return CrawlState::Done(Termination::NoItems);
        }

        report.items_seen += result.items.len();
        match self.store.upsert_page(&result.items).await {
            Ok(stats) => {
                report.inserted += stats.inserted;
                report.updated += stats.updated;
                report.failed += stats.failed;
                info!(
                    unit = %unit,
                    page,
                    "[INGEST] page {page}: {} items ({} new, {} refreshed, {} failed), {} / {} so far",
                    result.received,
                    stats.inserted,
                    stats.updated,
                    stats.failed,
                    report.items_seen,
                    report
                        .total_hint
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                );
            }
            Err(e) => {
                error!(unit = %unit, page, "[INGEST] failed to commit page {page}: {e}");
                return CrawlState::Done(Termination::StoreFailed);
            }
        }

        if result.received < PAGE_SIZE {
            return CrawlState::Done(Termination::ShortPage);
        }
        if page >= self.max_pages {
            warn!(unit = %unit, "[INGEST] page cap ({}) reached", self.max_pages);
            return CrawlState::Done(Termination::PageCap);
        }

        if !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
        CrawlState::FetchPage(page + 1)
    }
}

fn unit_label(seller_ids: &[String], search_term: &str) -> String {
    if search_term.is_empty() {
        format!("sellers[{}]", seller_ids.join(","))
    } else {
        format!("sellers[{}] term={search_term:?}", seller_ids.join(","))
    }
}
