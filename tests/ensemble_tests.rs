use forecast_monitor::config::{ForecastConfig, ForecasterKind};
use forecast_monitor::forecast::{
    combine, AutoArForecaster, EnsembleForecaster, EnsembleWeights, Forecaster, ForecasterModel,
    KalmanForecaster,
};
use forecast_monitor::model::forecast::{ConfidenceLevel, ForecastResult, ModelLabel, Trend};
use forecast_monitor::model::observation::Observation;
use forecast_monitor::tuner::TunerHandle;

fn series(n: usize) -> Vec<Observation> {
    (0..n)
        .map(|i| {
            let wobble = [0.0, 0.3, -0.2, 0.1][i % 4];
            Observation::new(1_700_000_000_000 + i as u64 * 60_000, 100.0 + 0.05 * i as f64 + wobble)
        })
        .collect()
}

fn result(predicted: f64, lower: f64, upper: f64, confidence: ConfidenceLevel) -> ForecastResult {
    ForecastResult {
        current_price: 100.0,
        predicted_price: predicted,
        lower_bound: lower,
        upper_bound: upper,
        velocity: (predicted - 100.0) / 5.0,
        uncertainty: (upper - lower) / 3.92,
        trend: Trend::Up,
        confidence,
        horizon_minutes: 5,
        model_label: ModelLabel::Kalman,
        as_of_ms: 1_000,
    }
}

fn ensemble() -> EnsembleForecaster {
    EnsembleForecaster::new(
        KalmanForecaster::default(),
        Box::new(AutoArForecaster::default()),
        EnsembleWeights::default(),
        0.1,
    )
}

#[test]
fn weights_are_normalised() {
    let w = EnsembleWeights::new(2.0, 3.0);
    assert!((w.kalman - 0.4).abs() < 1e-12);
    assert!((w.secondary - 0.6).abs() < 1e-12);

    let degenerate = EnsembleWeights::new(0.0, f64::NAN);
    assert_eq!(degenerate, EnsembleWeights::default());
}

#[test]
fn combine_takes_weighted_mean_and_union_interval() {
    let k = result(101.0, 100.5, 101.5, ConfidenceLevel::High);
    let s = result(102.0, 100.0, 103.0, ConfidenceLevel::Low);
    let out = combine(&k, &s, EnsembleWeights::new(0.4, 0.6));

    assert!((out.predicted_price - 101.6).abs() < 1e-9);
    assert_eq!(out.lower_bound, 100.0);
    assert_eq!(out.upper_bound, 103.0);
    // 0.4 * 3 + 0.6 * 1 = 1.8
    assert_eq!(out.confidence, ConfidenceLevel::Medium);
    assert_eq!(out.model_label, ModelLabel::Ensemble);
}

#[test]
fn combine_interval_always_contains_the_point_forecast() {
    let k = result(101.0, 100.9, 101.1, ConfidenceLevel::High);
    let s = result(105.0, 104.9, 105.1, ConfidenceLevel::High);
    let out = combine(&k, &s, EnsembleWeights::new(0.5, 0.5));
    assert!(out.lower_bound <= out.predicted_price && out.predicted_price <= out.upper_bound);
}

#[test]
fn update_weights_keeps_floor_and_sum() {
    let e = ensemble();
    for (k_eff, s_eff) in [(90.0, 10.0), (100.0, 0.0), (0.0, 100.0), (55.0, 45.0)] {
        let w = e.update_weights(k_eff, s_eff);
        assert!((w.kalman + w.secondary - 1.0).abs() < 1e-12);
        assert!(w.kalman >= 0.1 - 1e-12, "{:?}", w);
        assert!(w.secondary >= 0.1 - 1e-12, "{:?}", w);
        assert_eq!(e.weights(), w);
    }
}

#[test]
fn update_weights_ignores_all_zero_scores() {
    let e = ensemble();
    let before = e.weights();
    assert_eq!(e.update_weights(0.0, 0.0), before);
}

#[test]
fn falls_back_to_kalman_when_secondary_lacks_data() {
    let history = series(15);
    let e = ensemble();
    let out = e.forecast(&history, 5).expect("forecast");
    let kalman = KalmanForecaster::default()
        .forecast(&history, 5)
        .expect("kalman");

    assert_eq!(out.model_label, ModelLabel::KalmanFallback);
    assert_eq!(out.predicted_price, kalman.predicted_price);
}

#[test]
fn combines_both_models_with_enough_history() {
    let history = series(60);
    let out = ensemble().forecast(&history, 5).expect("forecast");
    assert_eq!(out.model_label, ModelLabel::Ensemble);
    assert!(out.lower_bound <= out.predicted_price && out.predicted_price <= out.upper_bound);
}

#[test]
fn model_is_chosen_from_config() {
    let mut cfg = ForecastConfig::default();
    cfg.model = ForecasterKind::Ensemble;
    let model = ForecasterModel::from_config(&cfg, TunerHandle::default());
    assert!(model.as_ensemble().is_some());
    assert_eq!(model.label(), ModelLabel::Ensemble);

    cfg.model = ForecasterKind::Secondary;
    let model = ForecasterModel::from_config(&cfg, TunerHandle::default());
    assert!(model.as_ensemble().is_none());
    assert_eq!(model.min_samples(), 30);
}
