//! Best-effort extraction of a dollar amount from free model text.
//! The model is asked for `$XX.XX` but the format is not guaranteed; anything
//! without a recognisable token yields `None`.

use once_cell::sync::Lazy;
use regex::Regex;

static DOLLAR_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\s?(\d{1,3}(?:,\d{3})+|\d+)(?:\.(\d{1,2}))?").expect("valid dollar regex"));

/// First `$<digits>[.<cents>]` token in `text`, thousands separators allowed.
pub fn parse_dollar_amount(text: &str) -> Option<f64> {
    let caps = DOLLAR_TOKEN.captures(text)?;
    let whole = caps.get(1)?.as_str().replace(',', "");
    let amount = match caps.get(2) {
        Some(cents) => format!("{whole}.{}", cents.as_str()),
        None => whole,
    };
    amount.parse::<f64>().ok().filter(|v| v.is_finite())
}
