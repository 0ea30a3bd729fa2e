use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::AlertConfig;
use crate::model::forecast::ForecastResult;
use crate::model::observation::Observation;
use crate::tracker::{direction_sign, lookup_target, RecordStatus, TargetLookup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    pub fn from_delta(delta: f64) -> Self {
        match direction_sign(delta) {
            1 => Self::Up,
            -1 => Self::Down,
            _ => Self::Flat,
        }
    }
}

/// Everything needed to open a threshold-crossing alert.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRequest {
    pub symbol: String,
    pub reference_price: f64,
    pub predicted_direction: Direction,
    pub predicted_magnitude_pct: f64,
    pub threshold_pct: f64,
    pub source_as_of_ms: u64,
}

impl AlertRequest {
    /// Fire when the forecast's expected move reaches the active threshold.
    pub fn from_forecast(symbol: &str, forecast: &ForecastResult, threshold_pct: f64) -> Option<Self> {
        let change_pct = forecast.price_change_pct();
        let magnitude = change_pct.abs();
        if !magnitude.is_finite() || magnitude < threshold_pct || magnitude <= 0.0 {
            return None;
        }
        Some(Self {
            symbol: symbol.trim().to_ascii_uppercase(),
            reference_price: forecast.current_price,
            predicted_direction: Direction::from_delta(change_pct),
            predicted_magnitude_pct: magnitude,
            threshold_pct,
            source_as_of_ms: forecast.as_of_ms,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertOutcome {
    pub actual_price: f64,
    pub actual_timestamp_ms: u64,
    pub actual_direction: Direction,
    pub actual_magnitude_pct: f64,
    pub correct: bool,
    pub validated_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub symbol: String,
    pub created_at_ms: u64,
    pub horizon_minutes: u32,
    pub reference_price: f64,
    pub predicted_direction: Direction,
    pub predicted_magnitude_pct: f64,
    pub threshold_at_trigger_pct: f64,
    pub source_as_of_ms: u64,
    pub status: RecordStatus,
    pub outcome: Option<AlertOutcome>,
}

impl AlertRecord {
    pub fn target_ms(&self) -> u64 {
        self.created_at_ms
            .saturating_add(self.horizon_minutes as u64 * 60_000)
    }

    pub fn is_pending(&self) -> bool {
        self.status == RecordStatus::Pending
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertSymbolStats {
    pub validated: usize,
    pub correct: usize,
    pub accuracy: Option<f64>,
    pub recent_accuracy: Option<f64>,
    pub lifetime_validated: u64,
}

/// Alert accuracy snapshot. Accuracies are percentages, `None` before any validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertMetrics {
    pub total_alerts: usize,
    pub pending: usize,
    pub validated: usize,
    pub unvalidatable: usize,
    pub correct: usize,
    pub accuracy: Option<f64>,
    pub recent_accuracy: Option<f64>,
    /// Validations since start-up, unaffected by eviction.
    pub lifetime_validated: u64,
    /// Alerts evicted while still pending.
    pub dropped_pending: u64,
    pub by_symbol: BTreeMap<String, AlertSymbolStats>,
}

/// Validation bookkeeping for triggered alerts across symbols.
#[derive(Debug)]
pub struct AlertAccuracyTracker {
    cfg: AlertConfig,
    tolerance_ms: u64,
    retention_ms: u64,
    records: VecDeque<AlertRecord>,
    lifetime_validated: HashMap<String, u64>,
    dropped_pending: HashMap<String, u64>,
}

impl AlertAccuracyTracker {
    pub fn new(cfg: AlertConfig, tolerance_ms: u64, retention_ms: u64) -> Self {
        let cap = cfg.capacity.max(1);
        Self {
            cfg,
            tolerance_ms,
            retention_ms,
            records: VecDeque::with_capacity(cap),
            lifetime_validated: HashMap::new(),
            dropped_pending: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&mut self, req: AlertRequest, now_ms: u64) -> AlertRecord {
        let rec = AlertRecord {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: req.symbol,
            created_at_ms: now_ms,
            horizon_minutes: self.cfg.horizon_minutes,
            reference_price: req.reference_price,
            predicted_direction: req.predicted_direction,
            predicted_magnitude_pct: req.predicted_magnitude_pct,
            threshold_at_trigger_pct: req.threshold_pct,
            source_as_of_ms: req.source_as_of_ms,
            status: RecordStatus::Pending,
            outcome: None,
        };
        tracing::info!(
            symbol = %rec.symbol,
            direction = ?rec.predicted_direction,
            magnitude_pct = rec.predicted_magnitude_pct,
            threshold_pct = rec.threshold_at_trigger_pct,
            "Alert triggered"
        );
        self.records.push_back(rec.clone());
        self.prune(now_ms);
        self.enforce_capacity(&rec.symbol);
        rec
    }

    /// Keep at most `capacity` alerts for `symbol`, dropping settled ones first.
    fn enforce_capacity(&mut self, symbol: &str) {
        let cap = self.cfg.capacity.max(1);
        let mut count = self.records.iter().filter(|r| r.symbol == symbol).count();
        while count > cap {
            let victim = self
                .records
                .iter()
                .position(|r| r.symbol == symbol && !r.is_pending())
                .or_else(|| self.records.iter().position(|r| r.symbol == symbol));
            let Some(rec) = victim.and_then(|idx| self.records.remove(idx)) else {
                break;
            };
            count -= 1;
            if rec.is_pending() {
                let dropped = self.dropped_pending.entry(rec.symbol.clone()).or_insert(0);
                *dropped = dropped.saturating_add(1);
                tracing::warn!(symbol = %rec.symbol, id = %rec.id, "Pending alert evicted before validation");
            }
        }
    }

    /// Settle due alerts of `symbol` against that symbol's history.
    ///
    /// An alert is correct when the realised direction matches and the realised
    /// move is at least the threshold active when it fired.
    pub fn validate(
        &mut self,
        symbol: &str,
        history: &[Observation],
        now_ms: u64,
    ) -> Vec<AlertRecord> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let newest = history.last().map(|o| o.timestamp_ms).unwrap_or(0);
        let tolerance_ms = self.tolerance_ms;
        let mut validated = Vec::new();

        for rec in self
            .records
            .iter_mut()
            .filter(|r| r.is_pending() && r.symbol == symbol)
        {
            if newest < rec.source_as_of_ms {
                continue;
            }
            match lookup_target(history, rec.target_ms(), tolerance_ms, now_ms) {
                TargetLookup::NotDue | TargetLookup::Waiting => {}
                TargetLookup::Missed => {
                    rec.status = RecordStatus::Unvalidatable;
                    tracing::debug!(symbol = %rec.symbol, id = %rec.id, "Alert unvalidatable");
                }
                TargetLookup::Found(obs) => {
                    let delta = obs.price - rec.reference_price;
                    let actual_direction = Direction::from_delta(delta);
                    let actual_magnitude_pct = if rec.reference_price.abs() > f64::EPSILON {
                        (delta / rec.reference_price * 100.0).abs()
                    } else {
                        0.0
                    };
                    let correct = actual_direction == rec.predicted_direction
                        && actual_magnitude_pct >= rec.threshold_at_trigger_pct;
                    rec.outcome = Some(AlertOutcome {
                        actual_price: obs.price,
                        actual_timestamp_ms: obs.timestamp_ms,
                        actual_direction,
                        actual_magnitude_pct,
                        correct,
                        validated_at_ms: now_ms,
                    });
                    rec.status = RecordStatus::Validated;
                    validated.push(rec.clone());
                }
            }
        }

        if !validated.is_empty() {
            let counter = self.lifetime_validated.entry(symbol).or_insert(0);
            *counter = counter.saturating_add(validated.len() as u64);
        }
        validated
    }

    pub fn prune(&mut self, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(self.retention_ms);
        let before = self.records.len();
        self.records.retain(|r| r.created_at_ms >= cutoff);
        before - self.records.len()
    }

    /// Metrics across every symbol, with a per-symbol breakdown.
    pub fn metrics(&self) -> AlertMetrics {
        self.metrics_filtered(None)
    }

    /// Metrics restricted to one symbol.
    pub fn metrics_for(&self, symbol: &str) -> AlertMetrics {
        let symbol = symbol.trim().to_ascii_uppercase();
        self.metrics_filtered(Some(&symbol))
    }

    fn metrics_filtered(&self, symbol: Option<&str>) -> AlertMetrics {
        let scoped: Vec<&AlertRecord> = self
            .records
            .iter()
            .filter(|r| symbol.map(|s| r.symbol == s).unwrap_or(true))
            .collect();

        let mut by_symbol: BTreeMap<String, Vec<&AlertRecord>> = BTreeMap::new();
        for rec in scoped.iter().copied() {
            by_symbol.entry(rec.symbol.clone()).or_default().push(rec);
        }
        let by_symbol: BTreeMap<String, AlertSymbolStats> = by_symbol
            .into_iter()
            .map(|(sym, recs)| {
                let (validated, correct, accuracy, recent) =
                    accuracy_summary(&recs, self.cfg.recent_window);
                let lifetime = self.lifetime_validated.get(&sym).copied().unwrap_or(0);
                (
                    sym,
                    AlertSymbolStats {
                        validated,
                        correct,
                        accuracy,
                        recent_accuracy: recent,
                        lifetime_validated: lifetime,
                    },
                )
            })
            .collect();

        let (validated, correct, accuracy, recent_accuracy) =
            accuracy_summary(&scoped, self.cfg.recent_window);
        let lifetime_validated = match symbol {
            Some(s) => self.lifetime_validated.get(s).copied().unwrap_or(0),
            None => self.lifetime_validated.values().sum(),
        };
        let dropped_pending = match symbol {
            Some(s) => self.dropped_pending.get(s).copied().unwrap_or(0),
            None => self.dropped_pending.values().sum(),
        };

        AlertMetrics {
            total_alerts: scoped.len(),
            pending: scoped.iter().filter(|r| r.is_pending()).count(),
            validated,
            unvalidatable: scoped
                .iter()
                .filter(|r| r.status == RecordStatus::Unvalidatable)
                .count(),
            correct,
            accuracy,
            recent_accuracy,
            lifetime_validated,
            dropped_pending,
            by_symbol,
        }
    }
}

/// (validated, correct, accuracy %, recent accuracy %) over validated alerts.
fn accuracy_summary(
    records: &[&AlertRecord],
    recent_window: usize,
) -> (usize, usize, Option<f64>, Option<f64>) {
    let mut settled: Vec<&AlertOutcome> = records
        .iter()
        .filter(|r| r.status == RecordStatus::Validated)
        .filter_map(|r| r.outcome.as_ref())
        .collect();
    settled.sort_by_key(|o| o.validated_at_ms);

    let validated = settled.len();
    let correct = settled.iter().filter(|o| o.correct).count();
    if validated == 0 {
        return (0, 0, None, None);
    }
    let accuracy = correct as f64 / validated as f64 * 100.0;

    let start = validated.saturating_sub(recent_window.max(1));
    let recent = &settled[start..];
    let recent_correct = recent.iter().filter(|o| o.correct).count();
    let recent_accuracy = recent_correct as f64 / recent.len() as f64 * 100.0;

    (validated, correct, Some(accuracy), Some(recent_accuracy))
}
