use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

pub const PROCESS_NOISE_MIN: f64 = 0.01;
pub const PROCESS_NOISE_MAX: f64 = 0.05;
pub const MEASUREMENT_NOISE_MIN: f64 = 0.05;
pub const MEASUREMENT_NOISE_MAX: f64 = 0.3;
/// Alert threshold bounds, in percent of price.
pub const ALERT_THRESHOLD_MIN_PCT: f64 = 0.05;
pub const ALERT_THRESHOLD_MAX_PCT: f64 = 2.0;

/// Self-tuned parameters shared by the estimator and the alert trigger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TunerConfig {
    pub alert_threshold_pct: f64,
    pub process_noise: f64,
    pub measurement_noise: f64,
    #[serde(default)]
    pub last_updated_ms: Option<u64>,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            alert_threshold_pct: 0.5,
            process_noise: 0.01,
            measurement_noise: 0.1,
            last_updated_ms: None,
        }
    }
}

impl TunerConfig {
    pub fn new(alert_threshold_pct: f64, process_noise: f64, measurement_noise: f64) -> Self {
        Self {
            alert_threshold_pct,
            process_noise,
            measurement_noise,
            last_updated_ms: None,
        }
        .clamped()
    }

    /// Force every parameter into its allowed range. NaN falls back to the default.
    pub fn clamped(self) -> Self {
        let d = Self::default();
        Self {
            alert_threshold_pct: clamp_or(
                self.alert_threshold_pct,
                ALERT_THRESHOLD_MIN_PCT,
                ALERT_THRESHOLD_MAX_PCT,
                d.alert_threshold_pct,
            ),
            process_noise: clamp_or(
                self.process_noise,
                PROCESS_NOISE_MIN,
                PROCESS_NOISE_MAX,
                d.process_noise,
            ),
            measurement_noise: clamp_or(
                self.measurement_noise,
                MEASUREMENT_NOISE_MIN,
                MEASUREMENT_NOISE_MAX,
                d.measurement_noise,
            ),
            last_updated_ms: self.last_updated_ms,
        }
    }
}

fn clamp_or(v: f64, lo: f64, hi: f64, fallback: f64) -> f64 {
    if v.is_nan() {
        fallback
    } else {
        v.clamp(lo, hi)
    }
}

/// Atomically replaceable [`TunerConfig`] shared between tuner and readers.
#[derive(Debug, Clone, Default)]
pub struct TunerHandle {
    inner: Arc<RwLock<TunerConfig>>,
}

impl TunerHandle {
    pub fn new(cfg: TunerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(cfg.clamped())),
        }
    }

    /// Copy of the current parameters. A poisoned lock still yields the last value.
    pub fn snapshot(&self) -> TunerConfig {
        match self.inner.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn replace(&self, cfg: TunerConfig) {
        let cfg = cfg.clamped();
        match self.inner.write() {
            Ok(mut guard) => *guard = cfg,
            Err(poisoned) => *poisoned.into_inner() = cfg,
        }
    }
}
