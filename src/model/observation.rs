use serde::{Deserialize, Serialize};

/// A single quote sample taken from the feed. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp_ms: u64,
    pub price: f64,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub change: Option<f64>,
    #[serde(default)]
    pub change_percent: Option<f64>,
}

impl Observation {
    /// Create a bare price sample (no OHLC or day-change fields).
    pub fn new(timestamp_ms: u64, price: f64) -> Self {
        Self {
            timestamp_ms,
            price,
            open: None,
            high: None,
            low: None,
            change: None,
            change_percent: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}
