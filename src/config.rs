use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub tuner: TunerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteProvider {
    /// Public 24h ticker; crypto pairs such as BTCUSDT.
    Binance,
    /// Stock quotes; needs an API key.
    Finnhub,
}

impl QuoteProvider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Binance => "https://api.binance.com",
            Self::Finnhub => "https://finnhub.io",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub provider: QuoteProvider,
    /// Overrides the provider's default REST endpoint.
    pub rest_base_url: Option<String>,
    pub symbols: Vec<String>,
    pub poll_interval: String,
    pub request_timeout_ms: u64,
    pub history_capacity: usize,
    pub max_consecutive_errors: u32,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            provider: QuoteProvider::Binance,
            rest_base_url: None,
            symbols: vec!["BTCUSDT".to_string()],
            poll_interval: "10s".to_string(),
            request_timeout_ms: 5_000,
            history_capacity: 1_000,
            max_consecutive_errors: 5,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecasterKind {
    Kalman,
    Secondary,
    Ensemble,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub model: ForecasterKind,
    pub horizon_minutes: u32,
    pub min_samples: usize,
    pub secondary_min_samples: usize,
    pub secondary_max_order: usize,
    pub kalman_weight: f64,
    pub secondary_weight: f64,
    pub min_ensemble_weight: f64,
    /// Newly validated component forecasts between ensemble re-weightings.
    pub weight_refresh_every: u64,
    /// Extra horizons reported alongside the tracked one.
    pub report_horizons: Vec<u32>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            model: ForecasterKind::Kalman,
            horizon_minutes: 5,
            min_samples: 10,
            secondary_min_samples: 30,
            secondary_max_order: 5,
            kalman_weight: 0.4,
            secondary_weight: 0.6,
            min_ensemble_weight: 0.1,
            weight_refresh_every: 10,
            report_horizons: vec![1, 5, 10],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub capacity: usize,
    pub retention_hours: u64,
    pub tolerance_secs: u64,
    pub recent_window: usize,
    pub effectiveness: EffectivenessConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            retention_hours: 24,
            tolerance_secs: 30,
            recent_window: 10,
            effectiveness: EffectivenessConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn tolerance_ms(&self) -> u64 {
        self.tolerance_secs.saturating_mul(1_000)
    }

    pub fn retention_ms(&self) -> u64 {
        self.retention_hours.saturating_mul(3_600_000)
    }
}

/// Weighting and scaling of the composite effectiveness index.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EffectivenessConfig {
    pub direction_weight: f64,
    pub price_weight: f64,
    pub calibration_weight: f64,
    /// MAPE (in %) is multiplied by this before being subtracted from 100.
    pub mape_scale: f64,
    pub target_coverage: f64,
    pub under_coverage_penalty: f64,
    pub over_coverage_penalty: f64,
}

impl Default for EffectivenessConfig {
    fn default() -> Self {
        Self {
            direction_weight: 1.0 / 3.0,
            price_weight: 1.0 / 3.0,
            calibration_weight: 1.0 / 3.0,
            mape_scale: 20.0,
            target_coverage: 95.0,
            under_coverage_penalty: 2.0,
            over_coverage_penalty: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    pub horizon_minutes: u32,
    /// Alerts kept per symbol.
    pub capacity: usize,
    pub recent_window: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            horizon_minutes: 5,
            capacity: 500,
            recent_window: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TunerSettings {
    pub enabled: bool,
    /// Number of newly validated alerts between tuning passes.
    pub tune_every_alerts: u64,
    pub state_dir: String,
    pub initial_alert_threshold_pct: f64,
    pub initial_process_noise: f64,
    pub initial_measurement_noise: f64,
}

impl Default for TunerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tune_every_alerts: 10,
            state_dir: "data/tuner".to_string(),
            initial_alert_threshold_pct: 0.5,
            initial_process_noise: 0.01,
            initial_measurement_noise: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: "forecast-monitor.log".to_string(),
        }
    }
}

/// Parse an interval string (e.g. "10s", "1m", "1h") into milliseconds.
pub fn parse_interval_ms(s: &str) -> Result<u64> {
    if s.len() < 2 {
        bail!("invalid interval '{}': expected format like '10s'", s);
    }

    let (num_str, suffix) = s.split_at(s.len() - 1);
    let n: u64 = num_str.parse().with_context(|| {
        format!(
            "invalid interval '{}': quantity must be a positive integer",
            s
        )
    })?;
    if n == 0 {
        bail!("invalid interval '{}': quantity must be > 0", s);
    }

    let unit_ms = match suffix {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        _ => bail!(
            "invalid interval '{}': unsupported suffix '{}', expected one of s/m/h",
            s,
            suffix
        ),
    };

    n.checked_mul(unit_ms)
        .with_context(|| format!("invalid interval '{}': value is too large", s))
}

impl FeedConfig {
    pub fn base_url(&self) -> &str {
        self.rest_base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    pub fn poll_interval_ms(&self) -> Result<u64> {
        parse_interval_ms(&self.poll_interval)
    }

    pub fn monitored_symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for sym in &self.symbols {
            let s = sym.trim().to_ascii_uppercase();
            if !s.is_empty() && !out.iter().any(|v| v == &s) {
                out.push(s);
            }
        }
        out
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = std::env::var("FORECAST_MONITOR_CONFIG")
            .unwrap_or_else(|_| "config/default.toml".to_string());
        Self::load_from_path(Path::new(&path))
    }

    pub fn load_from_path(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let mut config = Self::from_toml_str(&config_str)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;
        config.feed.api_key = std::env::var("FEED_API_KEY")
            .or_else(|_| std::env::var("FINNHUB_API_KEY"))
            .ok();
        Ok(config)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("invalid config toml")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.feed
            .poll_interval_ms()
            .context("feed.poll_interval is invalid")?;
        if self.feed.monitored_symbols().is_empty() {
            bail!("feed.symbols must name at least one symbol");
        }
        if self.forecast.horizon_minutes == 0 {
            bail!("forecast.horizon_minutes must be > 0");
        }
        if self.forecast.min_samples < 2 {
            bail!("forecast.min_samples must be >= 2");
        }
        let w = self.forecast.kalman_weight + self.forecast.secondary_weight;
        if (w - 1.0).abs() > 1e-6 {
            bail!(
                "forecast.kalman_weight + forecast.secondary_weight must equal 1.0 (got {})",
                w
            );
        }
        if self.forecast.report_horizons.iter().any(|h| *h == 0) {
            bail!("forecast.report_horizons must all be > 0");
        }
        if self.tuner.tune_every_alerts == 0 {
            bail!("tuner.tune_every_alerts must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_toml() {
        let toml_str = r#"
[feed]
rest_base_url = "https://api.binance.com"
symbols = ["btcusdt", "ETHUSDT", "BTCUSDT", "  "]
poll_interval = "10s"
request_timeout_ms = 4000
history_capacity = 500

[forecast]
model = "ensemble"
horizon_minutes = 5
min_samples = 12
kalman_weight = 0.5
secondary_weight = 0.5

[tracker]
capacity = 200
tolerance_secs = 20

[tuner]
tune_every_alerts = 10
state_dir = "data/test-tuner"

[logging]
level = "debug"
"#;
        let config = Config::from_toml_str(toml_str).unwrap();
        assert_eq!(
            config.feed.monitored_symbols(),
            vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
        );
        assert_eq!(config.feed.poll_interval_ms().unwrap(), 10_000);
        assert_eq!(config.feed.provider, QuoteProvider::Binance);
        assert_eq!(config.feed.base_url(), "https://api.binance.com");
        assert_eq!(config.forecast.model, ForecasterKind::Ensemble);
        assert_eq!(config.forecast.min_samples, 12);
        assert_eq!(config.forecast.secondary_min_samples, 30);
        assert_eq!(config.tracker.capacity, 200);
        assert_eq!(config.tracker.tolerance_ms(), 20_000);
        assert_eq!(config.tracker.retention_ms(), 24 * 3_600_000);
        assert_eq!(config.alerts.horizon_minutes, 5);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.forecast.model, ForecasterKind::Kalman);
        assert_eq!(config.forecast.horizon_minutes, 5);
        assert_eq!(config.feed.history_capacity, 1_000);
        assert!((config.tuner.initial_measurement_noise - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn finnhub_provider_uses_its_own_endpoint() {
        let config = Config::from_toml_str("[feed]\nprovider = \"finnhub\"\nsymbols = [\"aapl\"]").unwrap();
        assert_eq!(config.feed.provider, QuoteProvider::Finnhub);
        assert_eq!(config.feed.base_url(), "https://finnhub.io");
        assert_eq!(config.feed.monitored_symbols(), vec!["AAPL".to_string()]);

        let blank = Config::from_toml_str("[feed]\nrest_base_url = \"  \"").unwrap();
        assert_eq!(blank.feed.base_url(), "https://api.binance.com");
        assert!(Config::from_toml_str("[feed]\nprovider = \"yahoo\"").is_err());
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let toml_str = r#"
[forecast]
kalman_weight = 0.5
secondary_weight = 0.7
"#;
        assert!(Config::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn parse_interval_valid() {
        assert_eq!(parse_interval_ms("10s").unwrap(), 10_000);
        assert_eq!(parse_interval_ms("1m").unwrap(), 60_000);
        assert_eq!(parse_interval_ms("2h").unwrap(), 7_200_000);
    }

    #[test]
    fn parse_interval_rejects_invalid_inputs() {
        assert!(parse_interval_ms("").is_err());
        assert!(parse_interval_ms("s").is_err());
        assert!(parse_interval_ms("0s").is_err());
        assert!(parse_interval_ms("1d").is_err());
    }
}
