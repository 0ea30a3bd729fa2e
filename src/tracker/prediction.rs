use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;
use crate::model::forecast::{ConfidenceLevel, ForecastResult, ModelLabel};
use crate::model::observation::Observation;
use crate::tracker::effectiveness::{
    effectiveness_index, summary_label, EffectivenessTier, NO_DATA_LABEL,
};
use crate::tracker::{direction_sign, lookup_target, mean, RecordStatus, TargetLookup};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutcome {
    pub actual_price: f64,
    pub actual_timestamp_ms: u64,
    /// `actual - predicted`, in price units.
    pub error: f64,
    /// `error` as a percentage of the price at issue time.
    pub error_pct: f64,
    pub within_interval: bool,
    pub validated_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: String,
    pub symbol: String,
    pub created_at_ms: u64,
    pub horizon_minutes: u32,
    pub current_price: f64,
    pub predicted_price: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub velocity: f64,
    pub uncertainty: f64,
    pub confidence: ConfidenceLevel,
    pub model_label: ModelLabel,
    /// Newest observation the forecast saw; validation needs history at least this fresh.
    pub source_as_of_ms: u64,
    pub status: RecordStatus,
    pub outcome: Option<PredictionOutcome>,
}

impl PredictionRecord {
    pub fn target_ms(&self) -> u64 {
        self.created_at_ms
            .saturating_add(self.horizon_minutes as u64 * 60_000)
    }

    pub fn is_pending(&self) -> bool {
        self.status == RecordStatus::Pending
    }

    /// Did the forecast get the sign of the move right?
    pub fn direction_correct(&self) -> Option<bool> {
        let outcome = self.outcome.as_ref()?;
        let predicted = direction_sign(self.predicted_price - self.current_price);
        let actual = direction_sign(outcome.actual_price - self.current_price);
        Some(predicted == actual)
    }
}

/// Aggregate accuracy over validated records. Percent-valued fields are 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyStats {
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
    pub directional_accuracy: f64,
    pub interval_coverage: f64,
    pub recent_mape: f64,
    pub effectiveness_index: f64,
    pub effectiveness: EffectivenessTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMetrics {
    pub total_predictions: usize,
    pub pending: usize,
    pub validated_predictions: usize,
    pub unvalidatable: usize,
    /// `None` until at least one record has been validated.
    pub stats: Option<AccuracyStats>,
    pub summary_label: String,
}

impl PredictionMetrics {
    pub fn no_data() -> Self {
        Self {
            total_predictions: 0,
            pending: 0,
            validated_predictions: 0,
            unvalidatable: 0,
            stats: None,
            summary_label: NO_DATA_LABEL.to_string(),
        }
    }

    pub fn effectiveness_index(&self) -> Option<f64> {
        self.stats.as_ref().map(|s| s.effectiveness_index)
    }
}

/// Pending and settled forecasts for one symbol.
#[derive(Debug)]
pub struct PredictionTracker {
    symbol: String,
    cfg: TrackerConfig,
    records: VecDeque<PredictionRecord>,
    lifetime_validated: u64,
}

impl PredictionTracker {
    pub fn new(symbol: &str, cfg: TrackerConfig) -> Self {
        let cap = cfg.capacity.max(1);
        Self {
            symbol: symbol.trim().to_ascii_uppercase(),
            cfg,
            records: VecDeque::with_capacity(cap),
            lifetime_validated: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_pending()).count()
    }

    /// Validations since construction, unaffected by eviction.
    pub fn lifetime_validated(&self) -> u64 {
        self.lifetime_validated
    }

    /// Store a freshly issued forecast as pending.
    pub fn record(&mut self, forecast: &ForecastResult, now_ms: u64) -> PredictionRecord {
        let rec = PredictionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: self.symbol.clone(),
            created_at_ms: now_ms,
            horizon_minutes: forecast.horizon_minutes,
            current_price: forecast.current_price,
            predicted_price: forecast.predicted_price,
            lower_bound: forecast.lower_bound,
            upper_bound: forecast.upper_bound,
            velocity: forecast.velocity,
            uncertainty: forecast.uncertainty,
            confidence: forecast.confidence,
            model_label: forecast.model_label,
            source_as_of_ms: forecast.as_of_ms,
            status: RecordStatus::Pending,
            outcome: None,
        };
        self.records.push_back(rec.clone());
        self.prune(now_ms);
        while self.records.len() > self.cfg.capacity.max(1) {
            let _ = self.records.pop_front();
        }
        rec
    }

    /// Settle every due pending record against `history`.
    ///
    /// Returns only the records validated by this call, so repeating the call
    /// with the same inputs returns an empty list.
    pub fn validate(&mut self, history: &[Observation], now_ms: u64) -> Vec<PredictionRecord> {
        let newest = history.last().map(|o| o.timestamp_ms).unwrap_or(0);
        let tolerance_ms = self.cfg.tolerance_ms();
        let mut validated = Vec::new();
        let mut missed = 0usize;
        let mut stale = 0usize;

        for rec in self.records.iter_mut().filter(|r| r.is_pending()) {
            if newest < rec.source_as_of_ms {
                stale += 1;
                continue;
            }
            match lookup_target(history, rec.target_ms(), tolerance_ms, now_ms) {
                TargetLookup::NotDue | TargetLookup::Waiting => {}
                TargetLookup::Missed => {
                    rec.status = RecordStatus::Unvalidatable;
                    missed += 1;
                }
                TargetLookup::Found(obs) => {
                    let error = obs.price - rec.predicted_price;
                    let error_pct = if rec.current_price.abs() > f64::EPSILON {
                        error / rec.current_price * 100.0
                    } else {
                        0.0
                    };
                    rec.outcome = Some(PredictionOutcome {
                        actual_price: obs.price,
                        actual_timestamp_ms: obs.timestamp_ms,
                        error,
                        error_pct,
                        within_interval: rec.lower_bound <= obs.price
                            && obs.price <= rec.upper_bound,
                        validated_at_ms: now_ms,
                    });
                    rec.status = RecordStatus::Validated;
                    validated.push(rec.clone());
                }
            }
        }

        if stale > 0 {
            tracing::warn!(
                symbol = %self.symbol,
                stale,
                "History snapshot older than recorded forecasts; skipping them"
            );
        }
        if missed > 0 {
            tracing::debug!(
                symbol = %self.symbol,
                missed,
                tolerance_ms,
                "Predictions marked unvalidatable"
            );
        }
        self.lifetime_validated = self
            .lifetime_validated
            .saturating_add(validated.len() as u64);
        validated
    }

    /// Drop records created more than the retention window ago.
    pub fn prune(&mut self, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(self.cfg.retention_ms());
        let before = self.records.len();
        self.records.retain(|r| r.created_at_ms >= cutoff);
        before - self.records.len()
    }

    /// Most recently validated records, oldest first.
    pub fn recent_validated(&self, limit: usize) -> Vec<PredictionRecord> {
        let settled = self.validated_in_order();
        let skip = settled.len().saturating_sub(limit);
        settled.into_iter().skip(skip).cloned().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &PredictionRecord> {
        self.records.iter()
    }

    pub fn metrics(&self) -> PredictionMetrics {
        let settled = self.validated_in_order();
        let unvalidatable = self
            .records
            .iter()
            .filter(|r| r.status == RecordStatus::Unvalidatable)
            .count();
        let stats = accuracy_stats(&settled, &self.cfg);
        let summary = stats
            .as_ref()
            .map(|s| summary_label(s.directional_accuracy, s.mape).to_string())
            .unwrap_or_else(|| NO_DATA_LABEL.to_string());

        PredictionMetrics {
            total_predictions: self.records.len(),
            pending: self.pending_count(),
            validated_predictions: settled.len(),
            unvalidatable,
            stats,
            summary_label: summary,
        }
    }

    fn validated_in_order(&self) -> Vec<&PredictionRecord> {
        let mut settled: Vec<&PredictionRecord> = self
            .records
            .iter()
            .filter(|r| r.status == RecordStatus::Validated && r.outcome.is_some())
            .collect();
        settled.sort_by_key(|r| {
            (
                r.outcome.as_ref().map(|o| o.validated_at_ms).unwrap_or(0),
                r.created_at_ms,
            )
        });
        settled
    }
}

/// Accuracy over validated records given in validation order.
pub fn accuracy_stats(records: &[&PredictionRecord], cfg: &TrackerConfig) -> Option<AccuracyStats> {
    let outcomes: Vec<(&PredictionRecord, &PredictionOutcome)> = records
        .iter()
        .filter_map(|r| r.outcome.as_ref().map(|o| (*r, o)))
        .collect();
    if outcomes.is_empty() {
        return None;
    }
    let n = outcomes.len() as f64;

    let abs_errors: Vec<f64> = outcomes.iter().map(|(_, o)| o.error.abs()).collect();
    let abs_pct: Vec<f64> = outcomes.iter().map(|(_, o)| o.error_pct.abs()).collect();
    let mae = mean(&abs_errors)?;
    let rmse = (outcomes.iter().map(|(_, o)| o.error * o.error).sum::<f64>() / n).sqrt();
    let mape = mean(&abs_pct)?;

    let hits = outcomes
        .iter()
        .filter(|(r, _)| r.direction_correct().unwrap_or(false))
        .count() as f64;
    let directional_accuracy = hits / n * 100.0;

    let covered = outcomes.iter().filter(|(_, o)| o.within_interval).count() as f64;
    let interval_coverage = covered / n * 100.0;

    let recent_start = abs_pct.len().saturating_sub(cfg.recent_window.max(1));
    let recent_mape = mean(&abs_pct[recent_start..])?;

    let index = effectiveness_index(
        directional_accuracy,
        mape,
        interval_coverage,
        &cfg.effectiveness,
    );

    Some(AccuracyStats {
        mae,
        rmse,
        mape,
        directional_accuracy,
        interval_coverage,
        recent_mape,
        effectiveness_index: index,
        effectiveness: EffectivenessTier::from_index(index),
    })
}
