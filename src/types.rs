use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Descriptive and commercial fields of a listing as the marketplace reports them.
/// Every crawl pass overwrites these wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewListing {
    pub id: String,
    pub seller_id: String,
    pub seller_name: String,
    pub product_name: String,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub search_term: String,
    /// Unix seconds (UTC).
    pub auction_end_at: i64,
    pub bids: i64,
    pub price: f64,
    pub shipping_price: f64,
}

/// A stored listing: marketplace fields plus the price enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Listing {
    pub id: String,
    pub seller_id: String,
    pub seller_name: String,
    pub product_name: String,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub search_term: String,
    pub auction_end_at: i64,
    pub bids: i64,
    pub price: f64,
    pub shipping_price: f64,
    pub estimated_price: Option<f64>,
    pub profit: Option<f64>,
    pub margin: Option<f64>,
    pub price_attempted: bool,
    pub last_price_update: Option<i64>,
}

impl Listing {
    /// A fresh, never-evaluated listing.
    pub fn from_new(new: NewListing) -> Self {
        Self {
            id: new.id,
            seller_id: new.seller_id,
            seller_name: new.seller_name,
            product_name: new.product_name,
            category: new.category,
            image_url: new.image_url,
            search_term: new.search_term,
            auction_end_at: new.auction_end_at,
            bids: new.bids,
            price: new.price,
            shipping_price: new.shipping_price,
            estimated_price: None,
            profit: None,
            margin: None,
            price_attempted: false,
            last_price_update: None,
        }
    }

    /// Overwrites the marketplace fields, leaving enrichment untouched.
    pub fn refresh_from(&mut self, new: NewListing) {
        let enrichment = (
            self.estimated_price,
            self.profit,
            self.margin,
            self.price_attempted,
            self.last_price_update,
        );
        *self = Self::from_new(new);
        (
            self.estimated_price,
            self.profit,
            self.margin,
            self.price_attempted,
            self.last_price_update,
        ) = enrichment;
    }

    /// Active and lacking a completed or attempted estimate.
    pub fn is_pending(&self, now_secs: i64) -> bool {
        (self.estimated_price.is_none() || !self.price_attempted) && self.auction_end_at > now_secs
    }
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

/// All enrichment fields, written together in one statement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub estimated_price: f64,
    pub profit: f64,
    pub margin: f64,
    /// Unix seconds of the attempt.
    pub updated_at: i64,
}

impl Enrichment {
    pub fn compute(price: f64, shipping_price: f64, estimate: f64, updated_at: i64) -> Self {
        let profit = estimate - price - shipping_price;
        Self {
            estimated_price: estimate,
            profit,
            margin: margin_pct(profit, price),
            updated_at,
        }
    }
}

/// Profit as a percentage of purchase price; 0 when the price is not positive.
pub fn margin_pct(profit: f64, price: f64) -> f64 {
    if price > 0.0 {
        profit / price * 100.0
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Estimation outcome
// ---------------------------------------------------------------------------

/// Result of one appraisal attempt. Each variant keeps the cause so callers can
/// pick a policy; `amount()` applies the default one (anything unvalued is $0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Estimate {
    /// The model answered with a dollar amount.
    Success(f64),
    /// The image could not be loaded; `text_only` is what the text-only request produced.
    ImageFailure { text_only: Option<f64> },
    /// The model answered, but with no dollar token in it.
    ParseFailure,
    /// The inference call itself failed (transport, status, or envelope).
    NetworkFailure,
    /// The listing had too little to appraise; no call was made.
    Skipped,
}

impl Estimate {
    /// The valued amount, if this attempt produced one.
    pub fn valued(&self) -> Option<f64> {
        match *self {
            Estimate::Success(amount) => Some(amount),
            Estimate::ImageFailure { text_only } => text_only,
            Estimate::ParseFailure | Estimate::NetworkFailure | Estimate::Skipped => None,
        }
    }

    /// Amount written to the store. Zero means "not worth buying".
    pub fn amount(&self) -> f64 {
        self.valued().unwrap_or(0.0)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Estimate::Success(_) => "success",
            Estimate::ImageFailure { .. } => "image_failure",
            Estimate::ParseFailure => "parse_failure",
            Estimate::NetworkFailure => "network_failure",
            Estimate::Skipped => "skipped",
        }
    }
}

// ---------------------------------------------------------------------------
// Run reports
// ---------------------------------------------------------------------------

/// Tally of one price-update pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriceUpdateReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl PriceUpdateReport {
    pub fn merge(&mut self, other: PriceUpdateReport) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}
