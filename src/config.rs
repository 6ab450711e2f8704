use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

pub const MARKETPLACE_API_URL: &str = "https://buyerapi.shopgoodwill.com/api/Search/ItemListing";
pub const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_MODEL: &str = "gemini-2.0-flash-lite";

/// Items per search page. Fixed by the marketplace protocol; a page shorter than
/// this is the last one.
pub const PAGE_SIZE: usize = 40;

/// Hard ceiling on simultaneous AI calls, whatever the caller asks for.
pub const MAX_AI_CONCURRENCY: usize = 60;

/// Largest batch a single `get_pending` may return.
pub const MAX_BATCH_SIZE: usize = 100;

/// Batch cap used by dry runs when no explicit batch size is given.
pub const TEST_MODE_BATCH: usize = 5;

/// Product names shorter than this are not worth sending to the model.
pub const MIN_PRODUCT_NAME_LEN: usize = 3;

/// DB_PATH value that selects the in-process store instead of SQLite.
pub const IN_MEMORY_DB: &str = ":memory:";

/// Display name for seller ids missing from the seller directory.
pub const UNKNOWN_SELLER: &str = "Unknown Seller";

/// Request timeout for marketplace search pages (seconds).
pub const MARKETPLACE_TIMEOUT_SECS: u64 = 30;

/// Request timeout for listing image downloads (seconds).
pub const IMAGE_TIMEOUT_SECS: u64 = 10;

/// Request timeout for a single model inference (seconds).
pub const INFERENCE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub marketplace_api_url: String,
    /// Offset applied to marketplace end times that carry no zone (MARKETPLACE_UTC_OFFSET_MINUTES).
    pub marketplace_utc_offset_minutes: i32,
    /// Seller set crawled by every ingestion unit (SELLER_IDS, comma-separated).
    pub seller_ids: Vec<String>,
    /// One ingestion unit per term (SEARCH_TERMS, comma-separated).
    pub search_terms: Vec<String>,
    /// JSON file mapping seller id → display name (SELLER_MAP_PATH).
    pub seller_map_path: Option<String>,
    pub ingest: IngestSettings,
    /// Max page fetches in flight across all units (MARKETPLACE_CONCURRENCY).
    pub marketplace_concurrency: usize,
    pub gemini_api_key: String,
    pub gemini_api_url: String,
    pub gemini_model: String,
    pub price_batch_size: usize,
    pub price_concurrency: usize,
    pub price_test_mode: bool,
    /// Seconds between update cycles; 0 runs a single cycle and exits (CYCLE_INTERVAL_SECS).
    pub cycle_interval_secs: u64,
}

/// Retry and pacing knobs for one ingestion unit.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub max_pages: u32,
    pub page_delay: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            max_pages: 500,
            page_delay: Duration::from_millis(1500),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = IngestSettings::default();

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Config("GEMINI_API_KEY must be set".to_string()))?;

        let ingest = IngestSettings {
            max_attempts: parse_var("INGEST_MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            backoff_base: Duration::from_secs(parse_var(
                "INGEST_BACKOFF_SECS",
                defaults.backoff_base.as_secs(),
            )?),
            max_pages: parse_var("INGEST_MAX_PAGES", defaults.max_pages)?.max(1),
            page_delay: Duration::from_millis(parse_var(
                "INGEST_PAGE_DELAY_MS",
                defaults.page_delay.as_millis() as u64,
            )?),
        };

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "scout.db".to_string()),
            api_port: parse_var("API_PORT", 3000u16)?,
            marketplace_api_url: std::env::var("MARKETPLACE_API_URL")
                .unwrap_or_else(|_| MARKETPLACE_API_URL.to_string()),
            marketplace_utc_offset_minutes: parse_var("MARKETPLACE_UTC_OFFSET_MINUTES", -480i32)?,
            seller_ids: split_list(&std::env::var("SELLER_IDS").unwrap_or_else(|_| "19,198".to_string())),
            search_terms: parse_search_terms(&std::env::var("SEARCH_TERMS").unwrap_or_else(|_| "microwave".to_string())),
            seller_map_path: std::env::var("SELLER_MAP_PATH").ok().filter(|p| !p.trim().is_empty()),
            ingest,
            marketplace_concurrency: parse_var("MARKETPLACE_CONCURRENCY", 4usize)?.max(1),
            gemini_api_key,
            gemini_api_url: std::env::var("GEMINI_API_URL")
                .unwrap_or_else(|_| GEMINI_API_URL.to_string()),
            gemini_model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| GEMINI_MODEL.to_string()),
            price_batch_size: parse_var("PRICE_BATCH_SIZE", 30usize)?,
            price_concurrency: parse_var("PRICE_CONCURRENCY", MAX_AI_CONCURRENCY)?,
            price_test_mode: parse_var("PRICE_TEST_MODE", false)?,
            cycle_interval_secs: parse_var("CYCLE_INTERVAL_SECS", 0u64)?,
        })
    }
}

/// Reads `name` from the environment, falling back to `default` when unset.
/// A value that is set but unparsable is a configuration error.
fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw:?}"))),
        _ => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Search terms keep an explicit empty entry meaning "no keyword"; an
/// entirely empty list collapses to a single keyword-less unit.
fn parse_search_terms(raw: &str) -> Vec<String> {
    let terms = split_list(raw);
    if terms.is_empty() {
        vec![String::new()]
    } else {
        terms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_trims_and_drops_blanks() {
        assert_eq!(split_list(" 19, 198 ,,"), vec!["19".to_string(), "198".to_string()]);
    }

    #[test]
    fn empty_search_terms_become_one_keywordless_unit() {
        assert_eq!(parse_search_terms(" , "), vec![String::new()]);
        assert_eq!(parse_search_terms("microwave,lamp"), vec!["microwave", "lamp"]);
    }

    #[test]
    fn unparsable_values_are_config_errors() {
        std::env::set_var("SCOUT_TEST_BAD_NUMBER", "lots");
        assert!(matches!(
            parse_var("SCOUT_TEST_BAD_NUMBER", 3u32),
            Err(AppError::Config(_))
        ));
        assert_eq!(parse_var("SCOUT_TEST_UNSET_NUMBER", 3u32).unwrap(), 3);
    }

    #[test]
    fn blank_api_key_is_fatal() {
        std::env::set_var("GEMINI_API_KEY", "   ");
        assert!(matches!(Config::from_env(), Err(AppError::Config(_))));

        std::env::remove_var("GEMINI_API_KEY");
        assert!(matches!(Config::from_env(), Err(AppError::Config(_))));
    }

    #[test]
    fn ingest_defaults_match_crawl_policy() {
        let d = IngestSettings::default();
        assert_eq!(d.max_attempts, 3);
        assert_eq!(d.backoff_base, Duration::from_secs(2));
        assert_eq!(d.max_pages, 500);
    }
}
