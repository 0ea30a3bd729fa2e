use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::tracker::alert::AlertMetrics;
use crate::tracker::prediction::PredictionMetrics;
use crate::tuner::params::{
    TunerConfig, TunerHandle, ALERT_THRESHOLD_MAX_PCT, ALERT_THRESHOLD_MIN_PCT,
    MEASUREMENT_NOISE_MAX, MEASUREMENT_NOISE_MIN, PROCESS_NOISE_MAX, PROCESS_NOISE_MIN,
};
use crate::tuner::store::TunerConfigStore;

/// Tuning never runs on fewer validated alerts than this.
pub const MIN_VALIDATED_ALERTS: u64 = 10;
pub const DEFAULT_TUNE_EVERY_ALERTS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TunedParameter {
    AlertThreshold,
    ProcessNoise,
    MeasurementNoise,
}

impl fmt::Display for TunedParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlertThreshold => "alert_threshold_pct",
            Self::ProcessNoise => "process_noise",
            Self::MeasurementNoise => "measurement_noise",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Adjustment {
    pub parameter: TunedParameter,
    pub rule: &'static str,
    pub factor: f64,
    pub before: f64,
    pub after: f64,
    /// The raw product fell outside the allowed range.
    pub clamped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningReport {
    pub symbol: String,
    pub config: TunerConfig,
    pub adjustments: Vec<Adjustment>,
    pub persisted: bool,
}

/// Apply both adjustment layers to `current` and return the clamped result.
///
/// Layer 1 moves the alert threshold from alert accuracy (first matching rule
/// wins). Layer 2 moves the estimator noise from prediction accuracy; its
/// rules are independent of each other and of layer 1.
pub fn tune(
    current: &TunerConfig,
    alerts: &AlertMetrics,
    predictions: &PredictionMetrics,
) -> (TunerConfig, Vec<Adjustment>) {
    let mut next = current.clamped();
    let mut adjustments = Vec::new();

    if let Some(overall) = alerts.accuracy {
        let recent = alerts.recent_accuracy.unwrap_or(overall);
        let rule = if overall < 60.0 {
            Some(("alert_accuracy_low", 1.20))
        } else if overall >= 70.0 && recent < 50.0 {
            Some(("alert_recent_degraded", 1.10))
        } else if overall >= 80.0 {
            Some(("alert_accuracy_high", 0.95))
        } else {
            None
        };
        if let Some((name, factor)) = rule {
            let adj = scale(
                TunedParameter::AlertThreshold,
                name,
                next.alert_threshold_pct,
                factor,
                ALERT_THRESHOLD_MIN_PCT,
                ALERT_THRESHOLD_MAX_PCT,
            );
            next.alert_threshold_pct = adj.after;
            adjustments.push(adj);
        }
    }

    if let Some(stats) = predictions.stats.as_ref() {
        if stats.mape > 1.5 {
            let adj = scale(
                TunedParameter::MeasurementNoise,
                "prediction_mape_high",
                next.measurement_noise,
                1.15,
                MEASUREMENT_NOISE_MIN,
                MEASUREMENT_NOISE_MAX,
            );
            next.measurement_noise = adj.after;
            adjustments.push(adj);
        }
        if stats.directional_accuracy < 55.0 {
            let adj = scale(
                TunedParameter::ProcessNoise,
                "prediction_direction_weak",
                next.process_noise,
                1.25,
                PROCESS_NOISE_MIN,
                PROCESS_NOISE_MAX,
            );
            next.process_noise = adj.after;
            adjustments.push(adj);
        }
        if stats.mape < 0.5 && stats.directional_accuracy >= 75.0 {
            let adj = scale(
                TunedParameter::MeasurementNoise,
                "prediction_excellent",
                next.measurement_noise,
                0.90,
                MEASUREMENT_NOISE_MIN,
                MEASUREMENT_NOISE_MAX,
            );
            next.measurement_noise = adj.after;
            adjustments.push(adj);
        }
    }

    (next, adjustments)
}

fn scale(
    parameter: TunedParameter,
    rule: &'static str,
    before: f64,
    factor: f64,
    lo: f64,
    hi: f64,
) -> Adjustment {
    let raw = before * factor;
    let after = raw.clamp(lo, hi);
    Adjustment {
        parameter,
        rule,
        factor,
        before,
        after,
        clamped: after != raw,
    }
}

/// Closed-loop tuner for one symbol: reads tracker metrics, writes the shared
/// parameters and persists them.
pub struct AdaptiveTuner {
    symbol: String,
    handle: TunerHandle,
    store: Arc<dyn TunerConfigStore>,
    tune_every: u64,
    last_tuned_at: u64,
}

impl AdaptiveTuner {
    pub fn new(
        symbol: &str,
        handle: TunerHandle,
        store: Arc<dyn TunerConfigStore>,
        tune_every: u64,
    ) -> Self {
        Self {
            symbol: symbol.trim().to_ascii_uppercase(),
            handle,
            store,
            tune_every: tune_every.max(1),
            last_tuned_at: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn handle(&self) -> &TunerHandle {
        &self.handle
    }

    pub fn current(&self) -> TunerConfig {
        self.handle.snapshot()
    }

    /// Load persisted parameters into the shared handle, if any were saved.
    pub fn restore(&self) -> Result<Option<TunerConfig>> {
        let loaded = self.store.load(&self.symbol)?;
        if let Some(cfg) = loaded {
            self.handle.replace(cfg);
            tracing::info!(
                symbol = %self.symbol,
                alert_threshold_pct = cfg.alert_threshold_pct,
                process_noise = cfg.process_noise,
                measurement_noise = cfg.measurement_noise,
                "Restored tuner config"
            );
        }
        Ok(loaded.map(|c| c.clamped()))
    }

    /// Run a tuning pass once every `tune_every` newly validated alerts.
    ///
    /// Returns `None` when the pass is not due. A failed save is logged and
    /// reported through `persisted`, the in-memory update still applies.
    pub fn maybe_tune(
        &mut self,
        alerts: &AlertMetrics,
        predictions: &PredictionMetrics,
        now_ms: u64,
    ) -> Option<TuningReport> {
        if alerts.lifetime_validated < MIN_VALIDATED_ALERTS || alerts.accuracy.is_none() {
            return None;
        }
        if alerts.lifetime_validated.saturating_sub(self.last_tuned_at) < self.tune_every {
            return None;
        }
        self.last_tuned_at = alerts.lifetime_validated;

        let current = self.handle.snapshot();
        let (mut next, adjustments) = tune(&current, alerts, predictions);
        for adj in &adjustments {
            tracing::info!(
                symbol = %self.symbol,
                parameter = %adj.parameter,
                rule = adj.rule,
                factor = adj.factor,
                before = adj.before,
                after = adj.after,
                clamped = adj.clamped,
                "Tuner adjusted parameter"
            );
        }
        if adjustments.is_empty() {
            tracing::debug!(
                symbol = %self.symbol,
                alert_accuracy = ?alerts.accuracy,
                "Tuning pass made no changes"
            );
            return Some(TuningReport {
                symbol: self.symbol.clone(),
                config: current,
                adjustments,
                persisted: false,
            });
        }

        next.last_updated_ms = Some(now_ms);
        self.handle.replace(next);
        let persisted = match self.store.save(&self.symbol, &next) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, error = %e, "Failed to persist tuner config");
                false
            }
        };

        Some(TuningReport {
            symbol: self.symbol.clone(),
            config: next,
            adjustments,
            persisted,
        })
    }
}
