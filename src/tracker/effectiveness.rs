use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::EffectivenessConfig;

/// Five-tier reading of the 0-100 effectiveness index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EffectivenessTier {
    Critical,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl EffectivenessTier {
    pub fn from_index(index: f64) -> Self {
        if index >= 80.0 {
            Self::Excellent
        } else if index >= 65.0 {
            Self::Good
        } else if index >= 50.0 {
            Self::Fair
        } else if index >= 35.0 {
            Self::Poor
        } else {
            Self::Critical
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Fair => "FAIR",
            Self::Poor => "POOR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for EffectivenessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite 0-100 score: direction, price accuracy and interval calibration.
///
/// All inputs are percentages. Calibration peaks at the target coverage and
/// drops on both sides, faster for under-coverage.
pub fn effectiveness_index(
    directional_accuracy: f64,
    mape: f64,
    interval_coverage: f64,
    cfg: &EffectivenessConfig,
) -> f64 {
    let direction = directional_accuracy.clamp(0.0, 100.0);
    let price = 100.0 - (mape.abs() * cfg.mape_scale).min(100.0);
    let gap = interval_coverage - cfg.target_coverage;
    let penalty = if gap < 0.0 {
        -gap * cfg.under_coverage_penalty
    } else {
        gap * cfg.over_coverage_penalty
    };
    let calibration = (100.0 - penalty).clamp(0.0, 100.0);

    let wd = cfg.direction_weight.max(0.0);
    let wp = cfg.price_weight.max(0.0);
    let wc = cfg.calibration_weight.max(0.0);
    let total = wd + wp + wc;
    if total <= f64::EPSILON {
        return (direction + price + calibration) / 3.0;
    }
    ((wd * direction + wp * price + wc * calibration) / total).clamp(0.0, 100.0)
}

/// Human-readable verdict from direction and MAPE.
pub fn summary_label(directional_accuracy: f64, mape: f64) -> &'static str {
    if directional_accuracy >= 70.0 && mape < 1.0 {
        "Excellent: high accuracy, low error"
    } else if directional_accuracy >= 60.0 && mape < 1.5 {
        "Good: reliable predictions"
    } else if directional_accuracy >= 50.0 && mape < 2.5 {
        "Fair: moderate accuracy"
    } else {
        "Poor: needs parameter tuning"
    }
}

pub const NO_DATA_LABEL: &str = "No data yet";
