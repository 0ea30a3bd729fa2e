pub mod binance;
pub mod finnhub;
pub mod worker;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{FeedConfig, QuoteProvider};
use crate::error::AppError;
use crate::model::observation::Observation;

pub use binance::BinanceQuoteSource;
pub use finnhub::FinnhubQuoteSource;
pub use worker::{spawn_ingestion_worker, IngestionSettings, IngestionStats};

/// Anything that can produce the latest quote for a symbol.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// `Ok(None)` means the source answered but has no sample right now
    /// (e.g. the market is closed).
    async fn fetch_quote(&self, symbol: &str) -> Result<Option<Observation>, AppError>;

    fn name(&self) -> &str;
}

/// Build the quote source selected by `feed.provider`.
pub fn build_quote_source(cfg: &FeedConfig) -> Result<Arc<dyn QuoteSource>, AppError> {
    let source: Arc<dyn QuoteSource> = match cfg.provider {
        QuoteProvider::Binance => Arc::new(BinanceQuoteSource::new(
            cfg.base_url(),
            cfg.request_timeout_ms,
            cfg.api_key.clone(),
        )?),
        QuoteProvider::Finnhub => Arc::new(FinnhubQuoteSource::new(
            cfg.base_url(),
            cfg.request_timeout_ms,
            cfg.api_key.clone(),
        )?),
    };
    Ok(source)
}

/// Collapse whitespace and cap an upstream error body for log lines.
pub(crate) fn compact_error_body(body: &str) -> String {
    let normalized = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.len() > 180 {
        let cut = (0..=180)
            .rev()
            .find(|i| normalized.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}...", &normalized[..cut])
    } else {
        normalized
    }
}

pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_long_error_bodies() {
        let long = "x ".repeat(300);
        let compact = compact_error_body(&long);
        assert!(compact.ends_with("..."));
        assert!(compact.len() <= 183);
    }

    #[test]
    fn short_bodies_are_only_normalised() {
        assert_eq!(compact_error_body("  bad\n  symbol "), "bad symbol");
    }
}
