use std::sync::RwLock;

use crate::error::AppError;
use crate::forecast::kalman::KalmanForecaster;
use crate::forecast::{trend_from_velocity, Forecaster, Z_95};
use crate::model::forecast::{ConfidenceLevel, ForecastResult, ModelLabel};
use crate::model::observation::Observation;

pub const DEFAULT_KALMAN_WEIGHT: f64 = 0.4;
pub const DEFAULT_SECONDARY_WEIGHT: f64 = 0.6;
pub const MIN_ENSEMBLE_WEIGHT: f64 = 0.1;

/// Convex weights of the two component models. Always sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleWeights {
    pub kalman: f64,
    pub secondary: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            kalman: DEFAULT_KALMAN_WEIGHT,
            secondary: DEFAULT_SECONDARY_WEIGHT,
        }
    }
}

impl EnsembleWeights {
    /// Normalise arbitrary non-negative weights; degenerate input gives the defaults.
    pub fn new(kalman: f64, secondary: f64) -> Self {
        let k = if kalman.is_finite() { kalman.max(0.0) } else { 0.0 };
        let s = if secondary.is_finite() {
            secondary.max(0.0)
        } else {
            0.0
        };
        let total = k + s;
        if total <= f64::EPSILON {
            return Self::default();
        }
        Self {
            kalman: k / total,
            secondary: s / total,
        }
    }

    /// Weights proportional to effectiveness, each floored at `min_weight`.
    /// `None` when neither score is positive.
    pub fn from_effectiveness(kalman_eff: f64, secondary_eff: f64, min_weight: f64) -> Option<Self> {
        let k = if kalman_eff.is_finite() { kalman_eff.max(0.0) } else { 0.0 };
        let s = if secondary_eff.is_finite() {
            secondary_eff.max(0.0)
        } else {
            0.0
        };
        let total = k + s;
        if total <= f64::EPSILON {
            return None;
        }
        let floor = min_weight.clamp(0.0, 0.5);
        let kalman = (k / total).clamp(floor, 1.0 - floor);
        Some(Self {
            kalman,
            secondary: 1.0 - kalman,
        })
    }
}

/// Confidence-weighted merge of two forecasts of the same horizon.
///
/// The point forecast is the weighted mean. The interval is the union of the
/// component intervals, so the combined band never under-covers either model.
pub fn combine(
    kalman: &ForecastResult,
    secondary: &ForecastResult,
    weights: EnsembleWeights,
) -> ForecastResult {
    let wk = weights.kalman;
    let ws = weights.secondary;
    let predicted_price = wk * kalman.predicted_price + ws * secondary.predicted_price;
    let lower_bound = kalman.lower_bound.min(secondary.lower_bound).min(predicted_price);
    let upper_bound = kalman.upper_bound.max(secondary.upper_bound).max(predicted_price);
    let velocity = wk * kalman.velocity + ws * secondary.velocity;
    let confidence = ConfidenceLevel::from_score(
        wk * kalman.confidence.score() + ws * secondary.confidence.score(),
    );

    ForecastResult {
        current_price: kalman.current_price,
        predicted_price,
        lower_bound,
        upper_bound,
        velocity,
        uncertainty: (upper_bound - lower_bound) / (2.0 * Z_95),
        trend: trend_from_velocity(velocity, kalman.current_price),
        confidence,
        horizon_minutes: kalman.horizon_minutes,
        model_label: ModelLabel::Ensemble,
        as_of_ms: kalman.as_of_ms.max(secondary.as_of_ms),
    }
}

pub struct EnsembleForecaster {
    kalman: KalmanForecaster,
    secondary: Box<dyn Forecaster>,
    weights: RwLock<EnsembleWeights>,
    min_weight: f64,
}

impl EnsembleForecaster {
    pub fn new(
        kalman: KalmanForecaster,
        secondary: Box<dyn Forecaster>,
        weights: EnsembleWeights,
        min_weight: f64,
    ) -> Self {
        Self {
            kalman,
            secondary,
            weights: RwLock::new(weights),
            min_weight,
        }
    }

    pub fn weights(&self) -> EnsembleWeights {
        match self.weights.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Re-weight from the latest effectiveness scores; keeps the old weights
    /// when neither score is positive.
    pub fn update_weights(&self, kalman_eff: f64, secondary_eff: f64) -> EnsembleWeights {
        let Some(next) =
            EnsembleWeights::from_effectiveness(kalman_eff, secondary_eff, self.min_weight)
        else {
            return self.weights();
        };
        let prev = match self.weights.write() {
            Ok(mut guard) => std::mem::replace(&mut *guard, next),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), next),
        };
        tracing::info!(
            kalman_eff,
            secondary_eff,
            kalman_before = prev.kalman,
            kalman_after = next.kalman,
            secondary_before = prev.secondary,
            secondary_after = next.secondary,
            "Ensemble weights updated"
        );
        next
    }

    pub fn kalman(&self) -> &KalmanForecaster {
        &self.kalman
    }

    pub fn secondary(&self) -> &dyn Forecaster {
        self.secondary.as_ref()
    }
}

impl Forecaster for EnsembleForecaster {
    fn forecast(
        &self,
        history: &[Observation],
        horizon_minutes: u32,
    ) -> Result<ForecastResult, AppError> {
        let kalman = self.kalman.forecast(history, horizon_minutes)?;
        match self.secondary.forecast(history, horizon_minutes) {
            Ok(secondary) => Ok(combine(&kalman, &secondary, self.weights())),
            Err(e) => {
                tracing::debug!(error = %e, "Secondary estimator unavailable; using Kalman only");
                Ok(ForecastResult {
                    model_label: ModelLabel::KalmanFallback,
                    ..kalman
                })
            }
        }
    }

    fn label(&self) -> ModelLabel {
        ModelLabel::Ensemble
    }

    fn min_samples(&self) -> usize {
        self.kalman.min_samples()
    }
}
