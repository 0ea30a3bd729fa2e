use forecast_monitor::forecast::trading_signal;
use forecast_monitor::model::forecast::{ConfidenceLevel, ForecastResult, ModelLabel, Trend};
use forecast_monitor::model::signal::Signal;

fn forecast(predicted: f64, uncertainty: f64, confidence: ConfidenceLevel) -> ForecastResult {
    ForecastResult {
        current_price: 100.0,
        predicted_price: predicted,
        lower_bound: predicted - 1.96 * uncertainty,
        upper_bound: predicted + 1.96 * uncertainty,
        velocity: (predicted - 100.0) / 5.0,
        uncertainty,
        trend: if predicted > 100.0 { Trend::Up } else { Trend::Down },
        confidence,
        horizon_minutes: 5,
        model_label: ModelLabel::Kalman,
        as_of_ms: 0,
    }
}

#[test]
fn confident_rise_is_a_buy() {
    let s = trading_signal(&forecast(100.5, 0.2, ConfidenceLevel::High));
    assert_eq!(s.signal, Signal::Buy);
    assert!((s.price_change_pct - 0.5).abs() < 1e-9);
    assert!(s.reason.contains("upward"));
}

#[test]
fn confident_fall_is_a_sell() {
    let s = trading_signal(&forecast(99.4, 1.0, ConfidenceLevel::Medium));
    assert_eq!(s.signal, Signal::Sell);
}

#[test]
fn low_confidence_holds_even_on_large_moves() {
    let s = trading_signal(&forecast(101.0, 3.0, ConfidenceLevel::Low));
    assert_eq!(s.signal, Signal::Hold);
    assert!(s.reason.contains("confidence too low"));
}

#[test]
fn small_moves_hold() {
    let s = trading_signal(&forecast(100.1, 0.05, ConfidenceLevel::High));
    assert_eq!(s.signal, Signal::Hold);
}

#[test]
fn strength_is_bounded_and_grows_with_the_move() {
    let weak = trading_signal(&forecast(100.1, 0.1, ConfidenceLevel::High));
    let strong = trading_signal(&forecast(101.0, 0.1, ConfidenceLevel::High));
    assert!(strong.strength > weak.strength);
    assert!(strong.strength <= 100);

    let huge = trading_signal(&forecast(150.0, 0.0, ConfidenceLevel::High));
    assert_eq!(huge.strength, 100);
}
