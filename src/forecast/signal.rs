use crate::forecast::MEDIUM_CONFIDENCE_MAX_REL_UNCERTAINTY_PCT;
use crate::model::forecast::{ConfidenceLevel, ForecastResult};
use crate::model::signal::{Signal, TradingSignal};

/// Expected move (in %) needed for a directional signal.
pub const SIGNAL_MOVE_THRESHOLD_PCT: f64 = 0.3;
/// Velocity (in % of price per minute) at which the velocity term saturates.
const VELOCITY_SATURATION_PCT_PER_MIN: f64 = 0.1;

/// Derive BUY/SELL/HOLD and a 0-100 strength from a forecast.
pub fn trading_signal(forecast: &ForecastResult) -> TradingSignal {
    let change_pct = forecast.price_change_pct();
    let strength = signal_strength(forecast, change_pct);
    let confident = forecast.confidence >= ConfidenceLevel::Medium;

    let (signal, reason) = if change_pct > SIGNAL_MOVE_THRESHOLD_PCT && confident {
        (
            Signal::Buy,
            format!("{} predicts upward move (+{:.2}%)", forecast.model_label, change_pct),
        )
    } else if change_pct < -SIGNAL_MOVE_THRESHOLD_PCT && confident {
        (
            Signal::Sell,
            format!("{} predicts downward move ({:.2}%)", forecast.model_label, change_pct),
        )
    } else if change_pct.abs() > SIGNAL_MOVE_THRESHOLD_PCT {
        (
            Signal::Hold,
            format!("Move of {:.2}% but confidence too low", change_pct),
        )
    } else {
        (
            Signal::Hold,
            "Low expected movement or high uncertainty".to_string(),
        )
    };

    TradingSignal {
        signal,
        strength,
        reason,
        price_change_pct: change_pct,
    }
}

fn signal_strength(forecast: &ForecastResult, change_pct: f64) -> u8 {
    let move_pts = (50.0 * change_pct.abs() / SIGNAL_MOVE_THRESHOLD_PCT).min(50.0);

    let velocity_pct = if forecast.current_price > f64::EPSILON {
        forecast.velocity.abs() / forecast.current_price * 100.0
    } else {
        0.0
    };
    let velocity_pts = (30.0 * velocity_pct / VELOCITY_SATURATION_PCT_PER_MIN).min(30.0);

    let rel_uncertainty_pct = if forecast.predicted_price > f64::EPSILON {
        forecast.uncertainty / forecast.predicted_price * 100.0
    } else {
        f64::INFINITY
    };
    let normalized = (rel_uncertainty_pct / MEDIUM_CONFIDENCE_MAX_REL_UNCERTAINTY_PCT).clamp(0.0, 1.0);
    let certainty_pts = ((1.0 - normalized) * 20.0).min(20.0);

    let total = move_pts + velocity_pts + certainty_pts;
    if total.is_finite() {
        total.round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}
