use forecast_monitor::config::{Config, FeedConfig, QuoteProvider};
use forecast_monitor::error::AppError;
use forecast_monitor::feed::build_quote_source;

#[test]
fn default_provider_is_binance() {
    let source = build_quote_source(&FeedConfig::default()).expect("source");
    assert_eq!(source.name(), "binance");
}

#[test]
fn finnhub_is_selected_from_config() {
    let mut config = Config::from_toml_str("[feed]\nprovider = \"finnhub\"\nsymbols = [\"AAPL\"]")
        .expect("config");
    config.feed.api_key = Some("demo-key".to_string());
    let source = build_quote_source(&config.feed).expect("source");
    assert_eq!(source.name(), "finnhub");
}

#[test]
fn finnhub_without_api_key_is_a_config_error() {
    let cfg = FeedConfig {
        provider: QuoteProvider::Finnhub,
        api_key: None,
        ..FeedConfig::default()
    };
    let err = build_quote_source(&cfg).err().expect("missing key");
    assert!(matches!(err, AppError::Config(_)));
    assert!(!err.is_retryable());
}
