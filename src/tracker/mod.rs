pub mod alert;
pub mod effectiveness;
pub mod prediction;

use serde::{Deserialize, Serialize};

use crate::model::observation::Observation;

pub use alert::{
    AlertAccuracyTracker, AlertMetrics, AlertOutcome, AlertRecord, AlertRequest,
    AlertSymbolStats, Direction,
};
pub use effectiveness::{effectiveness_index, summary_label, EffectivenessTier};
pub use prediction::{
    accuracy_stats, AccuracyStats, PredictionMetrics, PredictionOutcome, PredictionRecord, PredictionTracker,
};

/// Lifecycle of a tracked forecast or alert. Each record leaves `Pending` at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Pending,
    Validated,
    /// The target time passed with no observation inside the tolerance window.
    Unvalidatable,
}

/// Result of looking for the observation that settles a record.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetLookup<'a> {
    /// `now` has not reached the target time yet.
    NotDue,
    Found(&'a Observation),
    /// Target reached but the tolerance window is still open.
    Waiting,
    /// Tolerance window closed without a matching observation.
    Missed,
}

/// Find the observation closest to `target_ms` within `±tolerance_ms`.
///
/// `history` must be ordered by timestamp (duplicates allowed).
pub fn lookup_target(
    history: &[Observation],
    target_ms: u64,
    tolerance_ms: u64,
    now_ms: u64,
) -> TargetLookup<'_> {
    if now_ms < target_ms {
        return TargetLookup::NotDue;
    }
    let lo = target_ms.saturating_sub(tolerance_ms);
    let hi = target_ms.saturating_add(tolerance_ms);
    let start = history.partition_point(|o| o.timestamp_ms < lo);

    let best = history[start..]
        .iter()
        .take_while(|o| o.timestamp_ms <= hi)
        .filter(|o| o.is_valid())
        .min_by_key(|o| o.timestamp_ms.abs_diff(target_ms));

    match best {
        Some(obs) => TargetLookup::Found(obs),
        None if now_ms > hi => TargetLookup::Missed,
        None => TargetLookup::Waiting,
    }
}

/// Sign of a price move as -1, 0 or 1.
pub(crate) fn direction_sign(delta: f64) -> i8 {
    if delta > 0.0 {
        1
    } else if delta < 0.0 {
        -1
    } else {
        0
    }
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
