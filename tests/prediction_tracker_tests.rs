use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use forecast_monitor::config::TrackerConfig;
use forecast_monitor::model::forecast::{ConfidenceLevel, ForecastResult, ModelLabel, Trend};
use forecast_monitor::model::observation::Observation;
use forecast_monitor::tracker::{EffectivenessTier, PredictionTracker, RecordStatus};

const T0: u64 = 1_700_000_000_000;
const MINUTE_MS: u64 = 60_000;
const HORIZON_MS: u64 = 5 * MINUTE_MS;

fn forecast(as_of_ms: u64, predicted: f64, half_width: f64) -> ForecastResult {
    ForecastResult {
        current_price: 100.0,
        predicted_price: predicted,
        lower_bound: predicted - half_width,
        upper_bound: predicted + half_width,
        velocity: (predicted - 100.0) / 5.0,
        uncertainty: half_width / 1.96,
        trend: Trend::Up,
        confidence: ConfidenceLevel::Medium,
        horizon_minutes: 5,
        model_label: ModelLabel::Kalman,
        as_of_ms,
    }
}

fn tracker_with_capacity(capacity: usize) -> PredictionTracker {
    let cfg = TrackerConfig {
        capacity,
        ..TrackerConfig::default()
    };
    PredictionTracker::new("btcusdt", cfg)
}

fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[test]
fn metrics_without_validations_report_no_data() {
    let tracker = PredictionTracker::new("BTCUSDT", TrackerConfig::default());
    let m = tracker.metrics();
    assert_eq!(m.total_predictions, 0);
    assert_eq!(m.validated_predictions, 0);
    assert!(m.stats.is_none());
    assert_eq!(m.summary_label, "No data yet");
    assert_eq!(m.effectiveness_index(), None);
}

#[test]
fn validates_each_record_exactly_once() {
    let mut tracker = tracker_with_capacity(100);
    let rec = tracker.record(&forecast(T0, 101.0, 1.0), T0);
    assert_eq!(rec.symbol, "BTCUSDT");
    assert_eq!(rec.status, RecordStatus::Pending);

    let history = vec![
        Observation::new(T0, 100.0),
        Observation::new(T0 + HORIZON_MS + 5_000, 101.5),
    ];
    let now = T0 + HORIZON_MS + 10_000;
    let first = tracker.validate(&history, now);
    assert_eq!(first.len(), 1);
    let outcome = first[0].outcome.as_ref().expect("outcome");
    assert!((outcome.error - 0.5).abs() < 1e-12);
    assert!((outcome.error_pct - 0.5).abs() < 1e-12);
    assert!(outcome.within_interval);

    assert!(tracker.validate(&history, now).is_empty());
    assert!(tracker.validate(&history, now + MINUTE_MS).is_empty());
    assert_eq!(tracker.metrics().validated_predictions, 1);
    assert_eq!(tracker.lifetime_validated(), 1);
}

#[test]
fn records_are_not_validated_before_their_target_time() {
    let mut tracker = tracker_with_capacity(100);
    tracker.record(&forecast(T0, 101.0, 1.0), T0);
    let history = vec![Observation::new(T0 + MINUTE_MS, 100.2)];
    assert!(tracker.validate(&history, T0 + 2 * MINUTE_MS).is_empty());
    assert_eq!(tracker.pending_count(), 1);
}

#[test]
fn picks_the_observation_nearest_the_target() {
    let mut tracker = tracker_with_capacity(100);
    tracker.record(&forecast(T0, 101.0, 1.0), T0);
    let target = T0 + HORIZON_MS;
    let history = vec![
        Observation::new(target - 20_000, 99.0),
        Observation::new(target + 10_000, 103.0),
        Observation::new(target + 45_000, 110.0),
    ];
    let out = tracker.validate(&history, target + 60_000);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].outcome.as_ref().unwrap().actual_price, 103.0);
}

#[test]
fn missing_target_observation_becomes_unvalidatable_after_the_window() {
    let mut tracker = tracker_with_capacity(100);
    tracker.record(&forecast(T0, 101.0, 1.0), T0);
    let target = T0 + HORIZON_MS;
    let history = vec![
        Observation::new(target - 40_000, 100.0),
        Observation::new(target + 40_000, 100.0),
    ];

    // Window still open: keep waiting.
    assert!(tracker.validate(&history, target + 20_000).is_empty());
    assert_eq!(tracker.pending_count(), 1);

    assert!(tracker.validate(&history, target + 31_000).is_empty());
    assert_eq!(tracker.pending_count(), 0);
    let m = tracker.metrics();
    assert_eq!(m.unvalidatable, 1);
    assert_eq!(m.validated_predictions, 0);
    assert!(m.stats.is_none());
}

#[test]
fn stale_snapshot_leaves_records_pending() {
    let mut tracker = tracker_with_capacity(100);
    tracker.record(&forecast(T0 + 1_000, 101.0, 1.0), T0 + 1_000);
    let stale = vec![Observation::new(T0, 100.0)];
    assert!(tracker.validate(&stale, T0 + 2 * HORIZON_MS).is_empty());
    assert_eq!(tracker.pending_count(), 1);
}

#[test]
fn accuracy_metrics_and_effectiveness() {
    let mut tracker = tracker_with_capacity(100);
    let actuals = [101.0, 101.0, 101.0, 99.0];
    let mut history = Vec::new();
    for (i, actual) in actuals.iter().enumerate() {
        let created = T0 + i as u64 * MINUTE_MS;
        tracker.record(&forecast(created, 101.0, 1.0), created);
        history.push(Observation::new(created + HORIZON_MS, *actual));
    }
    let now = T0 + 10 * MINUTE_MS;
    assert_eq!(tracker.validate(&history, now).len(), 4);

    let m = tracker.metrics();
    let stats = m.stats.as_ref().expect("stats");
    assert!((stats.directional_accuracy - 75.0).abs() < 1e-9);
    assert!((stats.mape - 0.5).abs() < 1e-9);
    assert!((stats.mae - 0.5).abs() < 1e-9);
    assert!((stats.rmse - 1.0).abs() < 1e-9);
    assert!((stats.interval_coverage - 75.0).abs() < 1e-9);
    // (75 + (100 - 0.5 * 20) + (100 - 2 * 20)) / 3
    assert!((stats.effectiveness_index - 75.0).abs() < 1e-9);
    assert_eq!(stats.effectiveness, EffectivenessTier::Good);
    assert_eq!(m.summary_label, "Excellent: high accuracy, low error");
}

#[test]
fn recent_mape_uses_the_latest_validations() {
    let mut tracker = tracker_with_capacity(100);
    let mut history = Vec::new();
    for i in 0..12u64 {
        let created = T0 + i * MINUTE_MS;
        tracker.record(&forecast(created, 100.0, 10.0), created);
        let actual = if i < 2 { 105.0 } else { 101.0 };
        history.push(Observation::new(created + HORIZON_MS, actual));
    }
    tracker.validate(&history, T0 + 30 * MINUTE_MS);

    let stats = tracker.metrics().stats.expect("stats");
    assert!((stats.recent_mape - 1.0).abs() < 1e-9);
    assert!((stats.mape - 20.0 / 12.0).abs() < 1e-9);

    let recent = tracker.recent_validated(3);
    assert_eq!(recent.len(), 3);
    assert!(recent.iter().all(|r| r.status == RecordStatus::Validated));
}

#[test]
fn calibrated_intervals_cover_about_ninety_five_percent() {
    let mut rng = StdRng::seed_from_u64(2024);
    let mut tracker = tracker_with_capacity(1_000);
    let mut history = Vec::new();
    let n = 600u64;
    for i in 0..n {
        let created = T0 + i * MINUTE_MS;
        tracker.record(&forecast(created, 100.0, 1.96), created);
        history.push(Observation::new(created + HORIZON_MS, 100.0 + gaussian(&mut rng)));
    }
    let validated = tracker.validate(&history, T0 + (n + 10) * MINUTE_MS);
    assert_eq!(validated.len(), n as usize);

    let coverage = tracker.metrics().stats.expect("stats").interval_coverage;
    assert!(coverage > 91.0 && coverage < 99.0, "coverage {}", coverage);
}

#[test]
fn capacity_evicts_oldest_records() {
    let mut tracker = tracker_with_capacity(3);
    for i in 0..5u64 {
        tracker.record(&forecast(T0 + i, 101.0, 1.0), T0 + i);
    }
    assert_eq!(tracker.len(), 3);
    let oldest = tracker.records().map(|r| r.created_at_ms).min().unwrap();
    assert_eq!(oldest, T0 + 2);
}

#[test]
fn records_older_than_retention_are_pruned() {
    let mut tracker = tracker_with_capacity(100);
    tracker.record(&forecast(T0, 101.0, 1.0), T0);
    let later = T0 + 25 * 3_600_000;
    tracker.record(&forecast(later, 101.0, 1.0), later);
    assert_eq!(tracker.len(), 1);
    assert_eq!(tracker.prune(later + 25 * 3_600_000), 1);
    assert!(tracker.is_empty());
}
