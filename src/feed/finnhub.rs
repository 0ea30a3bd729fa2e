use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::AppError;
use crate::feed::{compact_error_body, now_ms, QuoteSource};
use crate::model::observation::Observation;

/// `/api/v1/quote` response. Finnhub reports unknown fields as 0.
#[derive(Debug, Deserialize)]
pub struct FinnhubQuote {
    /// Current price.
    pub c: Option<f64>,
    #[serde(default)]
    pub h: f64,
    #[serde(default)]
    pub l: f64,
    #[serde(default)]
    pub o: f64,
    /// Previous close.
    #[serde(default)]
    pub pc: f64,
    #[serde(default)]
    pub error: Option<String>,
}

fn positive(v: f64) -> Option<f64> {
    (v.is_finite() && v > 0.0).then_some(v)
}

/// Parse a quote body stamped `timestamp_ms`.
///
/// A zero current price means no trading (market closed) and yields `None`.
pub fn parse_quote(body: &str, timestamp_ms: u64) -> Result<Option<Observation>, AppError> {
    let quote: FinnhubQuote = serde_json::from_str(body)?;
    if let Some(err) = quote.error {
        return Err(AppError::Feed(format!("finnhub API error: {}", err)));
    }
    let price = quote
        .c
        .ok_or_else(|| AppError::Feed("finnhub quote has no current price".to_string()))?;
    if price == 0.0 {
        return Ok(None);
    }
    if !(price.is_finite() && price > 0.0) {
        return Err(AppError::Feed(format!(
            "finnhub returned unusable price {}",
            price
        )));
    }

    let previous = positive(quote.pc);
    let change = previous.map(|pc| price - pc);
    Ok(Some(Observation {
        timestamp_ms,
        price,
        open: positive(quote.o),
        high: positive(quote.h),
        low: positive(quote.l),
        change,
        change_percent: previous.zip(change).map(|(pc, d)| d / pc * 100.0),
    }))
}

/// Map a non-success quote response to a feed error.
fn status_error(symbol: &str, status: StatusCode, body: &str) -> Option<AppError> {
    if status.is_success() {
        return None;
    }
    let msg = match status {
        StatusCode::UNAUTHORIZED => format!("finnhub rejected the API key for {} (401)", symbol),
        StatusCode::TOO_MANY_REQUESTS => format!("finnhub rate limit exceeded for {} (429)", symbol),
        _ => format!(
            "quote request for {} failed ({}): {}",
            symbol,
            status,
            compact_error_body(body)
        ),
    };
    Some(AppError::Feed(msg))
}

pub struct FinnhubQuoteSource {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl FinnhubQuoteSource {
    pub fn new(base_url: &str, timeout_ms: u64, api_key: Option<String>) -> Result<Self, AppError> {
        let api_key = api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                AppError::Config("finnhub needs FEED_API_KEY or FINNHUB_API_KEY".to_string())
            })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl QuoteSource for FinnhubQuoteSource {
    async fn fetch_quote(&self, symbol: &str) -> Result<Option<Observation>, AppError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let url = format!("{}/api/v1/quote", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("symbol", symbol.as_str()), ("token", self.api_key.as_str())])
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if let Some(err) = status_error(&symbol, status, &body) {
            return Err(err);
        }
        parse_quote(&body, now_ms())
    }

    fn name(&self) -> &str {
        "finnhub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{"c":261.74,"d":0.89,"dp":0.3412,"h":263.31,"l":260.68,"o":261.07,"pc":260.85,"t":1582641000}"#;

    #[test]
    fn parses_quote_and_derives_change_from_previous_close() {
        let obs = parse_quote(SAMPLE, 5_000).unwrap().expect("sample");
        assert_eq!(obs.timestamp_ms, 5_000);
        assert_eq!(obs.price, 261.74);
        assert_eq!(obs.open, Some(261.07));
        assert_eq!(obs.high, Some(263.31));
        assert_eq!(obs.low, Some(260.68));
        assert!((obs.change.unwrap() - 0.89).abs() < 1e-9);
        assert!((obs.change_percent.unwrap() - 0.89 / 260.85 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn zero_price_means_market_closed() {
        let body = r#"{"c":0,"d":null,"dp":null,"h":0,"l":0,"o":0,"pc":0,"t":0}"#;
        assert!(parse_quote(body, 1).unwrap().is_none());
    }

    #[test]
    fn missing_previous_close_leaves_change_empty() {
        let obs = parse_quote(r#"{"c":10.5}"#, 1).unwrap().expect("sample");
        assert_eq!(obs.change, None);
        assert_eq!(obs.change_percent, None);
        assert_eq!(obs.open, None);
    }

    #[test]
    fn api_error_payload_is_a_feed_error() {
        let err = parse_quote(r#"{"error":"Invalid API key"}"#, 1).unwrap_err();
        assert!(matches!(err, AppError::Feed(ref m) if m.contains("Invalid API key")));
        assert!(matches!(
            parse_quote(r#"{"c":-1.0}"#, 1),
            Err(AppError::Feed(_))
        ));
        assert!(matches!(parse_quote("<html>", 1), Err(AppError::Json(_))));
    }

    #[test]
    fn auth_and_rate_limit_statuses_are_named() {
        let unauthorized = status_error("AAPL", StatusCode::UNAUTHORIZED, "").unwrap();
        assert!(unauthorized.to_string().contains("401"));
        let limited = status_error("AAPL", StatusCode::TOO_MANY_REQUESTS, "").unwrap();
        assert!(limited.to_string().contains("rate limit"));
        assert!(limited.is_retryable());
        let other = status_error("AAPL", StatusCode::BAD_GATEWAY, "upstream\n down").unwrap();
        assert!(other.to_string().contains("upstream down"));
        assert!(status_error("AAPL", StatusCode::OK, "").is_none());
    }

    #[test]
    fn api_key_is_required() {
        assert!(matches!(
            FinnhubQuoteSource::new("https://finnhub.io", 1_000, None),
            Err(AppError::Config(_))
        ));
        let source =
            FinnhubQuoteSource::new("https://finnhub.io/", 1_000, Some(" key ".to_string())).unwrap();
        assert_eq!(source.base_url(), "https://finnhub.io");
        assert_eq!(source.name(), "finnhub");
    }
}
