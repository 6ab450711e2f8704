use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{MARKETPLACE_TIMEOUT_SECS, PAGE_SIZE};
use crate::error::Result;
use crate::marketplace::sellers::SellerDirectory;
use crate::types::NewListing;

/// The search endpoint turns away clients that do not look like a browser.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";

/// One successfully fetched search page.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<NewListing>,
    /// Items in the raw response, including any dropped as malformed.
    /// Pagination decisions use this, not `items.len()`.
    pub received: usize,
    /// The marketplace's own count of matches, when it reports one.
    pub total_count: Option<u64>,
}

/// One paginated search request against the marketplace.
///
/// Implementations swallow every failure (transport, timeout, status, body)
/// and report it as `None`, so the orchestrator handles all of them the same way.
#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    async fn fetch_page(&self, seller_ids: &[String], page: u32, search_term: &str) -> Option<SearchPage>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct HttpMarketplaceClient {
    http: reqwest::Client,
    api_url: String,
    sellers: SellerDirectory,
    /// Zone assumed for end times that carry no offset.
    local_offset: FixedOffset,
}

impl HttpMarketplaceClient {
    pub fn new(api_url: String, sellers: SellerDirectory, utc_offset_minutes: i32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(MARKETPLACE_TIMEOUT_SECS))
            .user_agent(BROWSER_USER_AGENT)
            .build()?;
        let local_offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        Ok(Self {
            http,
            api_url,
            sellers,
            local_offset,
        })
    }
}

#[async_trait]
impl MarketplaceClient for HttpMarketplaceClient {
    async fn fetch_page(&self, seller_ids: &[String], page: u32, search_term: &str) -> Option<SearchPage> {
        let sellers = seller_ids.join(",");
        debug!(sellers = %sellers, page, term = %search_term, "Fetching search page");

        let response = match self
            .http
            .post(&self.api_url)
            .header("Accept", "application/json")
            .header("Origin", "https://shopgoodwill.com")
            .header("Referer", "https://shopgoodwill.com/")
            .json(&search_body(&sellers, page, search_term))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!("[MARKETPLACE] timeout on page {page} for sellers {sellers}");
                return None;
            }
            Err(e) => {
                warn!("[MARKETPLACE] request failed on page {page} for sellers {sellers}: {e}");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            warn!("[MARKETPLACE] HTTP {status} on page {page} for sellers {sellers}: {snippet}");
            return None;
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("[MARKETPLACE] undecodable body on page {page}: {e}");
                return None;
            }
        };

        let page_data = parse_search_page(&body, search_term, &self.sellers, self.local_offset)?;
        debug!(
            "[MARKETPLACE] page {page}: {} items for sellers {sellers}",
            page_data.items.len()
        );
        Some(page_data)
    }
}

fn search_body(sellers: &str, page: u32, search_term: &str) -> Value {
    json!({
        "searchText": search_term,
        "selectedSellerIds": sellers,
        "page": page.to_string(),
        "pageSize": PAGE_SIZE.to_string(),
        "categoryId": 0,
        "categoryLevel": 1,
        "catIds": "",
        "lowPrice": "0",
        "highPrice": "999999",
        "searchClosedAuctions": "false",
        "searchDescriptions": "false",
        "searchUSOnlyShipping": "true",
        "searchPickupOnly": "false",
        "searchNoPickupOnly": "false",
        "searchOneCentShippingOnly": "false",
        "searchBuyNowOnly": "",
        "sortColumn": "1",
        "sortDescending": "false",
        "savedSearchId": 0,
        "useBuyerPrefs": "true",
    })
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Extracts the items of a search response. `None` means the response had no
/// `searchResults.items` array at all; an empty array is a valid empty page.
pub fn parse_search_page(
    body: &Value,
    search_term: &str,
    sellers: &SellerDirectory,
    local_offset: FixedOffset,
) -> Option<SearchPage> {
    let results = body.get("searchResults")?;
    let raw_items = results.get("items")?.as_array()?;

    let total_count = results.get("totalItems").and_then(lenient_u64);

    let items = raw_items
        .iter()
        .filter_map(|raw| {
            let parsed = parse_item(raw, search_term, sellers, local_offset);
            if parsed.is_none() {
                let id = raw.get("itemId").and_then(id_string).unwrap_or_else(|| "?".to_string());
                warn!("[MARKETPLACE] skipping malformed item {id}");
            }
            parsed
        })
        .collect();

    Some(SearchPage {
        items,
        received: raw_items.len(),
        total_count,
    })
}

fn parse_item(
    v: &Value,
    search_term: &str,
    sellers: &SellerDirectory,
    local_offset: FixedOffset,
) -> Option<NewListing> {
    let id = v.get("itemId").and_then(id_string)?;
    let product_name = v.get("title")?.as_str()?.trim().to_string();
    let price = v.get("currentPrice").and_then(lenient_f64)?;
    let auction_end_at = parse_end_time(v.get("endTime")?.as_str()?, local_offset)?;

    let seller_id = v.get("sellerId").and_then(id_string).unwrap_or_default();
    let seller_name = sellers.name_for(&seller_id);

    let category = v
        .get("categoryName")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(normalize_category);

    let image_url = v
        .get("imageURL")
        .and_then(|u| u.as_str())
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());

    Some(NewListing {
        id,
        seller_id,
        seller_name,
        product_name,
        category,
        image_url,
        search_term: search_term.to_string(),
        auction_end_at,
        bids: v.get("numBids").and_then(lenient_u64).unwrap_or(0) as i64,
        price,
        shipping_price: v.get("shippingPrice").and_then(lenient_f64).unwrap_or(0.0),
    })
}

/// Apparel sizes ("Size 10", "Size M", …) are all filed under one category.
pub fn normalize_category(raw: &str) -> String {
    if raw.starts_with("Size") {
        "Clothing".to_string()
    } else {
        raw.to_string()
    }
}

/// Parses an end time to Unix seconds. Timestamps without an offset are read in
/// the marketplace's local zone.
pub fn parse_end_time(raw: &str, local_offset: FixedOffset) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    local_offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp())
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn lenient_u64(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacific() -> FixedOffset {
        FixedOffset::west_opt(8 * 3600).unwrap()
    }

    fn sellers() -> SellerDirectory {
        SellerDirectory::from_json(r#"{"19": "Seattle"}"#).unwrap()
    }

    #[test]
    fn parses_items_and_normalizes_fields() {
        let body = json!({
            "searchResults": {
                "totalItems": 2,
                "items": [
                    {
                        "itemId": 123456,
                        "sellerId": 19,
                        "title": " Sharp Carousel Microwave ",
                        "currentPrice": 14.99,
                        "shippingPrice": "12.50",
                        "endTime": "2030-03-10T19:30:00",
                        "numBids": 3,
                        "imageURL": "https://img.example/1.jpg",
                        "categoryName": "Size 10"
                    },
                    {
                        "itemId": "789",
                        "sellerId": "77",
                        "title": "Lamp",
                        "currentPrice": "5",
                        "endTime": "2030-03-10T19:30:00Z"
                    }
                ]
            }
        });

        let page = parse_search_page(&body, "microwave", &sellers(), pacific()).unwrap();
        assert_eq!(page.total_count, Some(2));
        assert_eq!(page.items.len(), 2);

        let first = &page.items[0];
        assert_eq!(first.id, "123456");
        assert_eq!(first.seller_id, "19");
        assert_eq!(first.seller_name, "Seattle");
        assert_eq!(first.product_name, "Sharp Carousel Microwave");
        assert_eq!(first.shipping_price, 12.5);
        assert_eq!(first.bids, 3);
        assert_eq!(first.category.as_deref(), Some("Clothing"));
        assert_eq!(first.search_term, "microwave");

        let second = &page.items[1];
        assert_eq!(second.seller_name, "Unknown Seller");
        assert_eq!(second.shipping_price, 0.0);
        assert_eq!(second.bids, 0);
        assert_eq!(second.image_url, None);
        // Local 19:30 at UTC-8 is eight hours after 19:30 UTC.
        assert_eq!(first.auction_end_at - second.auction_end_at, 8 * 3600);
    }

    #[test]
    fn malformed_items_are_dropped_not_fatal() {
        let body = json!({
            "searchResults": {
                "items": [
                    { "itemId": 1, "title": "No price", "endTime": "2030-01-01T00:00:00" },
                    { "itemId": 2, "title": "Ok", "currentPrice": 1.0, "endTime": "2030-01-01T00:00:00" },
                    { "itemId": 3, "title": "Bad time", "currentPrice": 1.0, "endTime": "soon" }
                ]
            }
        });
        let page = parse_search_page(&body, "", &sellers(), pacific()).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.received, 3);
        assert_eq!(page.items[0].id, "2");
        assert_eq!(page.total_count, None);
    }

    #[test]
    fn missing_results_is_none_but_empty_items_is_a_page() {
        assert!(parse_search_page(&json!({"error": "x"}), "", &sellers(), pacific()).is_none());
        let empty = parse_search_page(&json!({"searchResults": {"items": []}}), "", &sellers(), pacific());
        assert_eq!(empty.unwrap().items.len(), 0);
    }

    #[test]
    fn end_time_formats() {
        let utc_ts = parse_end_time("2030-01-01T00:00:00Z", pacific()).unwrap();
        assert_eq!(parse_end_time("2030-01-01T00:00:00+00:00", pacific()), Some(utc_ts));
        assert_eq!(parse_end_time("2029-12-31T16:00:00", pacific()), Some(utc_ts));
        assert_eq!(parse_end_time("2029-12-31T16:00:00.250", pacific()), Some(utc_ts));
        assert_eq!(parse_end_time("", pacific()), None);
    }

    #[test]
    fn search_body_carries_paging_and_keyword() {
        let body = search_body("19,198", 3, "microwave");
        assert_eq!(body["page"], "3");
        assert_eq!(body["pageSize"], "40");
        assert_eq!(body["selectedSellerIds"], "19,198");
        assert_eq!(body["searchText"], "microwave");
    }

    async fn serve(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn client(url: String) -> HttpMarketplaceClient {
        HttpMarketplaceClient::new(url, sellers(), -480).unwrap()
    }

    #[tokio::test]
    async fn fetch_failures_become_none() {
        use axum::http::StatusCode;
        use axum::routing::post;

        let base = serve(
            axum::Router::new()
                .route("/down", post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "maintenance") }))
                .route("/html", post(|| async { "<html>not json</html>" }))
                .route("/odd", post(|| async { axum::Json(json!({"message": "no results key"})) })),
        )
        .await;
        let sellers = ["19".to_string()];

        for path in ["down", "html", "odd"] {
            let page = client(format!("{base}/{path}")).fetch_page(&sellers, 1, "microwave").await;
            assert!(page.is_none(), "/{path} should fail");
        }
        // Nothing listens on port 1.
        let refused = client("http://127.0.0.1:1/search".to_string())
            .fetch_page(&sellers, 1, "microwave")
            .await;
        assert!(refused.is_none());
    }

    #[tokio::test]
    async fn fetch_posts_search_and_parses_page() {
        use axum::http::HeaderMap;
        use axum::routing::post;

        let app = axum::Router::new().route(
            "/search",
            post(|headers: HeaderMap, axum::Json(body): axum::Json<Value>| async move {
                let browser = headers
                    .get("user-agent")
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|ua| ua.starts_with("Mozilla/5.0"));
                if !browser || body["page"] != "2" || body["searchText"] != "lamp" {
                    return axum::Json(json!({}));
                }
                axum::Json(json!({
                    "searchResults": {
                        "totalItems": 41,
                        "items": [{
                            "itemId": 9, "sellerId": 19, "title": "Brass lamp",
                            "currentPrice": 7.5, "endTime": "2030-01-01T00:00:00"
                        }]
                    }
                }))
            }),
        );
        let base = serve(app).await;

        let page = client(format!("{base}/search"))
            .fetch_page(&["19".to_string()], 2, "lamp")
            .await
            .unwrap();
        assert_eq!(page.received, 1);
        assert_eq!(page.total_count, Some(41));
        assert_eq!(page.items[0].seller_name, "Seattle");
        assert_eq!(page.items[0].search_term, "lamp");
    }
}
