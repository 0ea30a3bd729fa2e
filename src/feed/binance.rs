use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::AppError;
use crate::feed::{compact_error_body, now_ms, QuoteSource};
use crate::model::observation::Observation;

/// Deserialize Binance string-encoded numbers to f64.
fn string_to_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<f64>().map_err(serde::de::Error::custom)
}

/// Subset of the `/api/v3/ticker/24hr` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24hr {
    pub symbol: String,
    #[serde(deserialize_with = "string_to_f64")]
    pub last_price: f64,
    #[serde(deserialize_with = "string_to_f64")]
    pub open_price: f64,
    #[serde(deserialize_with = "string_to_f64")]
    pub high_price: f64,
    #[serde(deserialize_with = "string_to_f64")]
    pub low_price: f64,
    #[serde(deserialize_with = "string_to_f64")]
    pub price_change: f64,
    #[serde(deserialize_with = "string_to_f64")]
    pub price_change_percent: f64,
}

impl Ticker24hr {
    pub fn into_observation(self, timestamp_ms: u64) -> Observation {
        Observation {
            timestamp_ms,
            price: self.last_price,
            open: Some(self.open_price),
            high: Some(self.high_price),
            low: Some(self.low_price),
            change: Some(self.price_change),
            change_percent: Some(self.price_change_percent),
        }
    }
}

/// Parse a 24hr ticker body into an observation stamped `timestamp_ms`.
pub fn parse_ticker(body: &str, timestamp_ms: u64) -> Result<Observation, AppError> {
    let ticker: Ticker24hr = serde_json::from_str(body)?;
    let obs = ticker.into_observation(timestamp_ms);
    if !obs.is_valid() {
        return Err(AppError::Feed(format!(
            "ticker returned unusable price {}",
            obs.price
        )));
    }
    Ok(obs)
}

pub struct BinanceQuoteSource {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BinanceQuoteSource {
    pub fn new(base_url: &str, timeout_ms: u64, api_key: Option<String>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl QuoteSource for BinanceQuoteSource {
    async fn fetch_quote(&self, symbol: &str) -> Result<Option<Observation>, AppError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let mut req = self.http.get(&url).query(&[("symbol", symbol.as_str())]);
        if let Some(key) = &self.api_key {
            req = req.header("X-MBX-APIKEY", key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AppError::Feed(format!(
                "ticker request for {} failed ({}): {}",
                symbol,
                status,
                compact_error_body(&body)
            )));
        }

        parse_ticker(&body, now_ms()).map(Some)
    }

    fn name(&self) -> &str {
        "binance"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "symbol": "BTCUSDT",
        "priceChange": "-94.99999800",
        "priceChangePercent": "-95.960",
        "weightedAvgPrice": "0.29628482",
        "lastPrice": "4.00000200",
        "openPrice": "99.00000000",
        "highPrice": "100.00000000",
        "lowPrice": "0.10000000",
        "volume": "8913.30000000",
        "closeTime": 1499869899040
    }"#;

    #[test]
    fn parses_string_encoded_ticker() {
        let obs = parse_ticker(SAMPLE, 1_000).unwrap();
        assert_eq!(obs.timestamp_ms, 1_000);
        assert!((obs.price - 4.000002).abs() < 1e-12);
        assert_eq!(obs.open, Some(99.0));
        assert_eq!(obs.high, Some(100.0));
        assert_eq!(obs.low, Some(0.1));
        assert_eq!(obs.change_percent, Some(-95.96));
    }

    #[test]
    fn rejects_zero_price() {
        let body = SAMPLE.replace("4.00000200", "0.00000000");
        let err = parse_ticker(&body, 1).unwrap_err();
        assert!(matches!(err, AppError::Feed(_)));
    }

    #[test]
    fn rejects_malformed_body() {
        let err = parse_ticker("{\"symbol\":\"BTCUSDT\"}", 1).unwrap_err();
        assert!(matches!(err, AppError::Json(_)));
    }

    #[test]
    fn base_url_drops_trailing_slash_and_blank_key() {
        let source =
            BinanceQuoteSource::new("https://api.binance.com/", 1_000, Some("  ".to_string()))
                .unwrap();
        assert_eq!(source.base_url(), "https://api.binance.com");
        assert_eq!(source.name(), "binance");
    }
}
