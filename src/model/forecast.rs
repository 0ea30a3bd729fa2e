use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

/// Ordered so that `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn score(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 2.0,
            Self::High => 3.0,
        }
    }

    pub fn from_score(score: f64) -> Self {
        if score >= 2.5 {
            Self::High
        } else if score >= 1.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelLabel {
    Kalman,
    AutoAr,
    Ensemble,
    /// Ensemble configured but the secondary model could not produce a result.
    KalmanFallback,
}

impl ModelLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kalman => "kalman",
            Self::AutoAr => "auto-ar",
            Self::Ensemble => "ensemble(kalman+auto-ar)",
            Self::KalmanFallback => "kalman(ensemble-fallback)",
        }
    }
}

impl fmt::Display for ModelLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub current_price: f64,
    pub predicted_price: f64,
    /// Lower edge of the 95% interval.
    pub lower_bound: f64,
    /// Upper edge of the 95% interval.
    pub upper_bound: f64,
    /// Price units per minute.
    pub velocity: f64,
    /// One standard deviation of the predicted price.
    pub uncertainty: f64,
    pub trend: Trend,
    pub confidence: ConfidenceLevel,
    pub horizon_minutes: u32,
    pub model_label: ModelLabel,
    /// Timestamp of the newest observation the forecast was derived from.
    pub as_of_ms: u64,
}

impl ForecastResult {
    pub fn price_change(&self) -> f64 {
        self.predicted_price - self.current_price
    }

    pub fn price_change_pct(&self) -> f64 {
        if self.current_price.abs() <= f64::EPSILON {
            return 0.0;
        }
        self.price_change() / self.current_price * 100.0
    }
}
