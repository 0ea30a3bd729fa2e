pub mod auto_ar;
pub mod ensemble;
pub mod kalman;
pub mod signal;

use crate::config::{ForecastConfig, ForecasterKind};
use crate::error::AppError;
use crate::model::forecast::{ConfidenceLevel, ForecastResult, ModelLabel, Trend};
use crate::model::observation::Observation;
use crate::tuner::TunerHandle;

pub use auto_ar::{AutoArFit, AutoArForecaster};
pub use ensemble::{combine, EnsembleForecaster, EnsembleWeights};
pub use kalman::{FilterState, KalmanForecaster};
pub use signal::trading_signal;

/// Two-sided 95% normal quantile.
pub const Z_95: f64 = 1.96;
/// Below this speed (percent of price per minute) the trend is reported flat.
pub const FLAT_VELOCITY_PCT_PER_MIN: f64 = 0.001;
pub const HIGH_CONFIDENCE_MAX_REL_UNCERTAINTY_PCT: f64 = 0.5;
pub const MEDIUM_CONFIDENCE_MAX_REL_UNCERTAINTY_PCT: f64 = 1.5;

/// Anything that turns a history snapshot into a point forecast with a 95% interval.
pub trait Forecaster: Send + Sync {
    fn forecast(
        &self,
        history: &[Observation],
        horizon_minutes: u32,
    ) -> Result<ForecastResult, AppError>;

    fn label(&self) -> ModelLabel;

    fn min_samples(&self) -> usize;
}

/// Forecaster variant chosen once from configuration.
pub enum ForecasterModel {
    Kalman(KalmanForecaster),
    Secondary(AutoArForecaster),
    Ensemble(EnsembleForecaster),
}

impl ForecasterModel {
    pub fn from_config(cfg: &ForecastConfig, tuning: TunerHandle) -> Self {
        let kalman = KalmanForecaster::new(cfg.min_samples, tuning);
        let secondary = AutoArForecaster::new(cfg.secondary_min_samples, cfg.secondary_max_order);
        match cfg.model {
            ForecasterKind::Kalman => Self::Kalman(kalman),
            ForecasterKind::Secondary => Self::Secondary(secondary),
            ForecasterKind::Ensemble => Self::Ensemble(EnsembleForecaster::new(
                kalman,
                Box::new(secondary),
                EnsembleWeights::new(cfg.kalman_weight, cfg.secondary_weight),
                cfg.min_ensemble_weight,
            )),
        }
    }

    pub fn as_ensemble(&self) -> Option<&EnsembleForecaster> {
        match self {
            Self::Ensemble(e) => Some(e),
            _ => None,
        }
    }
}

impl Forecaster for ForecasterModel {
    fn forecast(
        &self,
        history: &[Observation],
        horizon_minutes: u32,
    ) -> Result<ForecastResult, AppError> {
        match self {
            Self::Kalman(m) => m.forecast(history, horizon_minutes),
            Self::Secondary(m) => m.forecast(history, horizon_minutes),
            Self::Ensemble(m) => m.forecast(history, horizon_minutes),
        }
    }

    fn label(&self) -> ModelLabel {
        match self {
            Self::Kalman(m) => m.label(),
            Self::Secondary(m) => m.label(),
            Self::Ensemble(m) => m.label(),
        }
    }

    fn min_samples(&self) -> usize {
        match self {
            Self::Kalman(m) => m.min_samples(),
            Self::Secondary(m) => m.min_samples(),
            Self::Ensemble(m) => m.min_samples(),
        }
    }
}

/// Forecast several horizons from one snapshot; horizons that fail are skipped.
pub fn forecast_horizons<F: Forecaster + ?Sized>(
    forecaster: &F,
    history: &[Observation],
    horizons: &[u32],
) -> Vec<ForecastResult> {
    horizons
        .iter()
        .filter_map(|h| forecaster.forecast(history, *h).ok())
        .collect()
}

pub(crate) fn valid_observations(history: &[Observation]) -> Vec<&Observation> {
    history.iter().filter(|o| o.is_valid()).collect()
}

pub(crate) fn ensure_samples(got: usize, required: usize) -> Result<(), AppError> {
    if got < required {
        return Err(AppError::InsufficientData { required, got });
    }
    Ok(())
}

pub fn trend_from_velocity(velocity: f64, reference_price: f64) -> Trend {
    let eps = (reference_price.abs() * FLAT_VELOCITY_PCT_PER_MIN / 100.0).max(1e-12);
    if velocity > eps {
        Trend::Up
    } else if velocity < -eps {
        Trend::Down
    } else {
        Trend::Flat
    }
}

pub fn confidence_from_uncertainty(uncertainty: f64, predicted_price: f64) -> ConfidenceLevel {
    if !uncertainty.is_finite() || predicted_price <= f64::EPSILON {
        return ConfidenceLevel::Low;
    }
    let rel_pct = uncertainty / predicted_price * 100.0;
    if rel_pct < HIGH_CONFIDENCE_MAX_REL_UNCERTAINTY_PCT {
        ConfidenceLevel::High
    } else if rel_pct < MEDIUM_CONFIDENCE_MAX_REL_UNCERTAINTY_PCT {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    }
}

/// Median spacing between consecutive observations, in minutes.
pub(crate) fn median_step_minutes(obs: &[&Observation]) -> Option<f64> {
    let mut steps: Vec<f64> = obs
        .windows(2)
        .filter_map(|w| {
            let dt = w[1].timestamp_ms.saturating_sub(w[0].timestamp_ms);
            (dt > 0).then_some(dt as f64 / 60_000.0)
        })
        .collect();
    if steps.is_empty() {
        return None;
    }
    steps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(steps[steps.len() / 2])
}
