use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use crate::config::{Config, ForecastConfig, TrackerConfig};
use crate::forecast::{forecast_horizons, trading_signal, EnsembleWeights, Forecaster, ForecasterModel};
use crate::history::SharedHistory;
use crate::model::forecast::ForecastResult;
use crate::model::observation::Observation;
use crate::model::signal::TradingSignal;
use crate::tracker::{
    AlertAccuracyTracker, AlertMetrics, AlertRecord, AlertRequest, PredictionMetrics,
    PredictionRecord, PredictionTracker,
};
use crate::tuner::{AdaptiveTuner, TunerConfig, TunerConfigStore, TunerHandle, TuningReport};

/// What one `on_observation` pass did.
#[derive(Debug, Clone, Default)]
pub struct PipelineStep {
    pub validated_predictions: Vec<PredictionRecord>,
    pub validated_alerts: Vec<AlertRecord>,
    pub forecast: Option<ForecastResult>,
    pub alert: Option<AlertRecord>,
    pub tuning: Option<TuningReport>,
    pub weights: Option<EnsembleWeights>,
}

/// Shadow trackers scoring each ensemble component on its own.
struct ComponentTrackers {
    kalman: PredictionTracker,
    secondary: PredictionTracker,
    refresh_every: u64,
    last_refresh_at: u64,
}

impl ComponentTrackers {
    fn new(symbol: &str, cfg: &TrackerConfig, refresh_every: u64) -> Self {
        Self {
            kalman: PredictionTracker::new(symbol, cfg.clone()),
            secondary: PredictionTracker::new(symbol, cfg.clone()),
            refresh_every: refresh_every.max(1),
            last_refresh_at: 0,
        }
    }

    fn due(&self) -> bool {
        let settled = self
            .kalman
            .lifetime_validated()
            .min(self.secondary.lifetime_validated());
        settled.saturating_sub(self.last_refresh_at) >= self.refresh_every
    }
}

/// Everything the monitor keeps for one symbol.
pub struct SymbolPipeline {
    symbol: String,
    history: SharedHistory,
    forecaster: ForecasterModel,
    horizon_minutes: u32,
    report_horizons: Vec<u32>,
    predictions: PredictionTracker,
    alerts: Arc<Mutex<AlertAccuracyTracker>>,
    alerts_enabled: bool,
    tuner: AdaptiveTuner,
    tuner_enabled: bool,
    components: Option<ComponentTrackers>,
}

impl SymbolPipeline {
    /// Build the pipeline and restore any persisted tuning for `symbol`.
    pub fn new(
        symbol: &str,
        cfg: &Config,
        history: SharedHistory,
        alerts: Arc<Mutex<AlertAccuracyTracker>>,
        store: Arc<dyn TunerConfigStore>,
    ) -> Self {
        let symbol = symbol.trim().to_ascii_uppercase();
        let tuning = TunerHandle::new(TunerConfig::new(
            cfg.tuner.initial_alert_threshold_pct,
            cfg.tuner.initial_process_noise,
            cfg.tuner.initial_measurement_noise,
        ));
        let tuner = AdaptiveTuner::new(&symbol, tuning.clone(), store, cfg.tuner.tune_every_alerts);
        if let Err(e) = tuner.restore() {
            tracing::warn!(symbol = %symbol, error = %e, "Could not restore tuner config; using defaults");
        }

        let forecaster = ForecasterModel::from_config(&cfg.forecast, tuning);
        let components = forecaster.as_ensemble().map(|_| {
            ComponentTrackers::new(&symbol, &cfg.tracker, cfg.forecast.weight_refresh_every)
        });

        Self {
            predictions: PredictionTracker::new(&symbol, cfg.tracker.clone()),
            horizon_minutes: cfg.forecast.horizon_minutes,
            report_horizons: report_horizons(&cfg.forecast),
            alerts_enabled: cfg.alerts.enabled,
            tuner_enabled: cfg.tuner.enabled,
            symbol,
            history,
            forecaster,
            alerts,
            tuner,
            components,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn history(&self) -> &SharedHistory {
        &self.history
    }

    pub fn forecaster(&self) -> &ForecasterModel {
        &self.forecaster
    }

    pub fn tuning(&self) -> TunerConfig {
        self.tuner.current()
    }

    /// Validate → forecast → record → alert → maybe tune → maybe re-weight.
    pub fn on_observation(&mut self, now_ms: u64) -> Result<PipelineStep> {
        let snapshot = self.history.snapshot()?;
        let mut step = PipelineStep {
            validated_predictions: self.predictions.validate(&snapshot, now_ms),
            validated_alerts: self
                .lock_alerts()?
                .validate(&self.symbol, &snapshot, now_ms),
            ..PipelineStep::default()
        };
        if let Some(components) = self.components.as_mut() {
            components.kalman.validate(&snapshot, now_ms);
            components.secondary.validate(&snapshot, now_ms);
        }

        match self.forecaster.forecast(&snapshot, self.horizon_minutes) {
            Ok(forecast) => {
                self.predictions.record(&forecast, now_ms);
                self.record_components(&snapshot, now_ms);
                if self.alerts_enabled {
                    let threshold = self.tuner.current().alert_threshold_pct;
                    if let Some(req) = AlertRequest::from_forecast(&self.symbol, &forecast, threshold) {
                        step.alert = Some(self.lock_alerts()?.record(req, now_ms));
                    }
                }
                step.forecast = Some(forecast);
            }
            Err(e) => {
                tracing::debug!(
                    symbol = %self.symbol,
                    error = %e,
                    samples = snapshot.len(),
                    "Forecast skipped"
                );
            }
        }

        if self.tuner_enabled {
            let alert_metrics = self.alert_metrics()?;
            let prediction_metrics = self.predictions.metrics();
            step.tuning = self
                .tuner
                .maybe_tune(&alert_metrics, &prediction_metrics, now_ms);
        }
        step.weights = self.refresh_weights();
        Ok(step)
    }

    /// Forecast the configured horizon from the current history.
    pub fn forecast(&self) -> Result<ForecastResult> {
        let snapshot = self.history.snapshot()?;
        Ok(self.forecaster.forecast(&snapshot, self.horizon_minutes)?)
    }

    /// Forecasts for every report horizon that has enough data.
    pub fn forecast_report(&self) -> Result<Vec<ForecastResult>> {
        let snapshot = self.history.snapshot()?;
        Ok(forecast_horizons(&self.forecaster, &snapshot, &self.report_horizons))
    }

    pub fn trading_signal(&self) -> Result<TradingSignal> {
        let forecast = self.forecast()?;
        Ok(trading_signal(&forecast))
    }

    /// Record a forecast produced outside the pipeline loop.
    pub fn record_prediction(&mut self, forecast: &ForecastResult, now_ms: u64) -> PredictionRecord {
        self.predictions.record(forecast, now_ms)
    }

    pub fn validate_pending(&mut self, now_ms: u64) -> Result<Vec<PredictionRecord>> {
        let snapshot = self.history.snapshot()?;
        Ok(self.predictions.validate(&snapshot, now_ms))
    }

    pub fn prediction_metrics(&self) -> PredictionMetrics {
        self.predictions.metrics()
    }

    pub fn recent_predictions(&self, limit: usize) -> Vec<PredictionRecord> {
        self.predictions.recent_validated(limit)
    }

    pub fn alert_metrics(&self) -> Result<AlertMetrics> {
        Ok(self.lock_alerts()?.metrics_for(&self.symbol))
    }

    /// Drop tracker records older than the retention window.
    pub fn prune(&mut self, now_ms: u64) -> Result<usize> {
        let mut removed = self.predictions.prune(now_ms);
        removed += self.lock_alerts()?.prune(now_ms);
        if let Some(components) = self.components.as_mut() {
            components.kalman.prune(now_ms);
            components.secondary.prune(now_ms);
        }
        Ok(removed)
    }

    /// Run a tuning pass now if one is due, regardless of `tuner.enabled`.
    pub fn tune(&mut self, now_ms: u64) -> Result<Option<TuningReport>> {
        let alert_metrics = self.alert_metrics()?;
        let prediction_metrics = self.predictions.metrics();
        Ok(self
            .tuner
            .maybe_tune(&alert_metrics, &prediction_metrics, now_ms))
    }

    fn record_components(&mut self, snapshot: &[Observation], now_ms: u64) {
        let (Some(components), Some(ensemble)) =
            (self.components.as_mut(), self.forecaster.as_ensemble())
        else {
            return;
        };
        // Only score the pair together so both trackers see the same targets.
        let kalman = ensemble.kalman().forecast(snapshot, self.horizon_minutes);
        let secondary = ensemble.secondary().forecast(snapshot, self.horizon_minutes);
        if let (Ok(k), Ok(s)) = (kalman, secondary) {
            components.kalman.record(&k, now_ms);
            components.secondary.record(&s, now_ms);
        }
    }

    fn refresh_weights(&mut self) -> Option<EnsembleWeights> {
        let components = self.components.as_mut()?;
        let ensemble = self.forecaster.as_ensemble()?;
        if !components.due() {
            return None;
        }
        let k_eff = components.kalman.metrics().effectiveness_index()?;
        let s_eff = components.secondary.metrics().effectiveness_index()?;
        components.last_refresh_at = components
            .kalman
            .lifetime_validated()
            .min(components.secondary.lifetime_validated());
        Some(ensemble.update_weights(k_eff, s_eff))
    }

    fn lock_alerts(&self) -> Result<MutexGuard<'_, AlertAccuracyTracker>> {
        self.alerts
            .lock()
            .map_err(|_| anyhow!("alert tracker lock poisoned"))
    }
}

fn report_horizons(cfg: &ForecastConfig) -> Vec<u32> {
    let mut horizons: Vec<u32> = cfg
        .report_horizons
        .iter()
        .copied()
        .filter(|h| *h > 0)
        .collect();
    if !horizons.contains(&cfg.horizon_minutes) {
        horizons.push(cfg.horizon_minutes);
    }
    horizons.sort_unstable();
    horizons.dedup();
    horizons
}
