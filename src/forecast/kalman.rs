use crate::error::AppError;
use crate::forecast::{
    confidence_from_uncertainty, ensure_samples, trend_from_velocity, valid_observations,
    Forecaster, Z_95,
};
use crate::model::forecast::{ForecastResult, ModelLabel};
use crate::model::observation::Observation;
use crate::tuner::TunerHandle;

pub const KALMAN_MIN_SAMPLES: usize = 10;
/// Noise scale floor, as a fraction of the last price (1 bp).
const SCALE_FLOOR_FRACTION: f64 = 1e-4;
/// Backtest pairs needed before the horizon calibration replaces the one-step one.
const MIN_CALIBRATION_PAIRS: usize = 10;
/// How far an observation may sit from a backtest target time.
const CALIBRATION_TOLERANCE_MS: u64 = 30_000;

/// Sufficient statistic of the constant-velocity filter: `[price, velocity]`,
/// its covariance, and the noise parameters it was run with.
///
/// Lives for a single forecast call. The filter is re-run over the full
/// snapshot every time, so the result depends only on the data passed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterState {
    pub x: [f64; 2],
    pub p: [[f64; 2]; 2],
    pub process_noise: f64,
    pub measurement_noise: f64,
    /// Empirical variance of one-step price differences; Q and R scale with it.
    pub noise_scale: f64,
}

impl FilterState {
    /// Seed at the first price with zero velocity and a wide prior.
    pub fn seed(price: f64, process_noise: f64, measurement_noise: f64, noise_scale: f64) -> Self {
        let p0 = price.abs().max(1.0).powi(2);
        Self {
            x: [price, 0.0],
            p: [[p0, 0.0], [0.0, p0]],
            process_noise,
            measurement_noise,
            noise_scale,
        }
    }

    fn q(&self, dt: f64) -> [[f64; 2]; 2] {
        let s = self.process_noise.max(0.0) * self.noise_scale;
        [
            [s * dt.powi(3) / 3.0, s * dt.powi(2) / 2.0],
            [s * dt.powi(2) / 2.0, s * dt],
        ]
    }

    fn r(&self) -> f64 {
        (self.measurement_noise.max(0.0) * self.noise_scale).max(1e-18)
    }

    /// x' = F x, P' = F P Fᵗ + Q with F = [[1, dt], [0, 1]].
    pub fn predict(&mut self, dt: f64) {
        let dt = dt.max(0.0);
        let [x0, x1] = self.x;
        self.x = [x0 + dt * x1, x1];

        let p = self.p;
        let q = self.q(dt);
        let p00 = p[0][0] + dt * (p[1][0] + p[0][1]) + dt * dt * p[1][1] + q[0][0];
        let p01 = p[0][1] + dt * p[1][1] + q[0][1];
        let p11 = p[1][1] + q[1][1];
        self.p = [[p00, p01], [p01, p11]];
    }

    /// Squared innovation of `z` over its predicted variance, before updating.
    pub fn innovation_ratio(&self, z: f64) -> Option<f64> {
        let s = self.p[0][0] + self.r();
        let y = z - self.x[0];
        (s > 0.0 && s.is_finite()).then(|| y * y / s)
    }

    /// Observe a price (H = [1, 0]).
    pub fn update(&mut self, z: f64) {
        let y = z - self.x[0];
        let s = self.p[0][0] + self.r();
        if s <= 0.0 || !s.is_finite() {
            return;
        }
        let k0 = self.p[0][0] / s;
        let k1 = self.p[1][0] / s;
        self.x = [self.x[0] + k0 * y, self.x[1] + k1 * y];

        let p = self.p;
        let p00 = (1.0 - k0) * p[0][0];
        let p01 = (1.0 - k0) * p[0][1];
        let p11 = p[1][1] - k1 * p[0][1];
        self.p = [[p00.max(0.0), p01], [p01, p11.max(0.0)]];
    }

    /// Price variance after propagating the covariance `horizon_minutes` one-minute steps.
    pub fn projected_price_variance(&self, horizon_minutes: u32) -> f64 {
        let mut st = *self;
        for _ in 0..horizon_minutes {
            st.predict(1.0);
        }
        st.p[0][0].max(0.0)
    }

    /// Variance of the observed price `horizon_minutes` ahead: state spread plus R.
    pub fn predictive_variance(&self, horizon_minutes: u32) -> f64 {
        self.projected_price_variance(horizon_minutes) + self.r()
    }
}

/// Filter state right after observing one price.
#[derive(Debug, Clone, Copy)]
struct FilterStep<'a> {
    obs: &'a Observation,
    state: FilterState,
    innovation_ratio: Option<f64>,
}

/// Constant-velocity Kalman forecaster reading its noise parameters from the tuner.
#[derive(Debug, Clone)]
pub struct KalmanForecaster {
    min_samples: usize,
    tuning: TunerHandle,
}

impl Default for KalmanForecaster {
    fn default() -> Self {
        Self::new(KALMAN_MIN_SAMPLES, TunerHandle::default())
    }
}

impl KalmanForecaster {
    pub fn new(min_samples: usize, tuning: TunerHandle) -> Self {
        Self {
            min_samples: min_samples.max(2),
            tuning,
        }
    }

    pub fn tuning(&self) -> &TunerHandle {
        &self.tuning
    }

    /// Run the filter forward over the whole history and return its final state.
    pub fn run_filter(
        &self,
        history: &[Observation],
        process_noise: f64,
        measurement_noise: f64,
    ) -> Result<FilterState, AppError> {
        let obs = valid_observations(history);
        ensure_samples(obs.len(), self.min_samples)?;
        let steps = trace_filter(&obs, process_noise, measurement_noise);
        Ok(steps
            .last()
            .map(|s| s.state)
            .unwrap_or_else(|| seed_state(&obs, process_noise, measurement_noise)))
    }

    /// Forecast with explicit noise parameters instead of the tuned ones.
    pub fn forecast_with(
        &self,
        history: &[Observation],
        horizon_minutes: u32,
        process_noise: f64,
        measurement_noise: f64,
    ) -> Result<ForecastResult, AppError> {
        let obs = valid_observations(history);
        ensure_samples(obs.len(), self.min_samples)?;
        let steps = trace_filter(&obs, process_noise, measurement_noise);
        let (st, current_price, as_of_ms) = match steps.last() {
            Some(last) => (last.state, last.obs.price, last.obs.timestamp_ms),
            None => {
                return Err(AppError::InsufficientData {
                    required: self.min_samples,
                    got: obs.len(),
                })
            }
        };

        let velocity = st.x[1];
        let predicted_price = current_price + velocity * horizon_minutes as f64;
        let calibration = calibration_factor(&steps, &obs, horizon_minutes);
        let uncertainty = (calibration * st.predictive_variance(horizon_minutes))
            .max(0.0)
            .sqrt();

        Ok(ForecastResult {
            current_price,
            predicted_price,
            lower_bound: predicted_price - Z_95 * uncertainty,
            upper_bound: predicted_price + Z_95 * uncertainty,
            velocity,
            uncertainty,
            trend: trend_from_velocity(velocity, current_price),
            confidence: confidence_from_uncertainty(uncertainty, predicted_price),
            horizon_minutes,
            model_label: ModelLabel::Kalman,
            as_of_ms,
        })
    }
}

impl Forecaster for KalmanForecaster {
    fn forecast(
        &self,
        history: &[Observation],
        horizon_minutes: u32,
    ) -> Result<ForecastResult, AppError> {
        let tuned = self.tuning.snapshot();
        self.forecast_with(
            history,
            horizon_minutes,
            tuned.process_noise,
            tuned.measurement_noise,
        )
    }

    fn label(&self) -> ModelLabel {
        ModelLabel::Kalman
    }

    fn min_samples(&self) -> usize {
        self.min_samples
    }
}

/// Sample variance of one-step differences, floored at (1 bp of last price)².
fn noise_scale(obs: &[&Observation]) -> f64 {
    let last = obs.last().map(|o| o.price.abs()).unwrap_or(1.0);
    let floor = (last * SCALE_FLOOR_FRACTION).max(1e-8).powi(2);
    let diffs: Vec<f64> = obs.windows(2).map(|w| w[1].price - w[0].price).collect();
    if diffs.len() < 2 {
        return floor;
    }
    let n = diffs.len() as f64;
    let mean = diffs.iter().sum::<f64>() / n;
    let var = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.max(floor)
}

fn seed_state(obs: &[&Observation], process_noise: f64, measurement_noise: f64) -> FilterState {
    let first = obs.first().map(|o| o.price).unwrap_or(0.0);
    FilterState::seed(first, process_noise, measurement_noise, noise_scale(obs))
}

/// Run the filter over `obs`, keeping the state after every update.
fn trace_filter<'a>(
    obs: &[&'a Observation],
    process_noise: f64,
    measurement_noise: f64,
) -> Vec<FilterStep<'a>> {
    let mut st = seed_state(obs, process_noise, measurement_noise);
    let mut steps = Vec::with_capacity(obs.len().saturating_sub(1));
    for w in obs.windows(2) {
        let dt = w[1].timestamp_ms.saturating_sub(w[0].timestamp_ms) as f64 / 60_000.0;
        st.predict(dt);
        let innovation_ratio = st.innovation_ratio(w[1].price);
        st.update(w[1].price);
        steps.push(FilterStep {
            obs: w[1],
            state: st,
            innovation_ratio,
        });
    }
    steps
}

/// Realised over modelled squared error, used to scale the predictive variance.
///
/// Replays the forecast rule `price + velocity * h` at every past step whose
/// target time is covered by the history. Short histories fall back to the
/// one-step innovations. Degenerate data (no error at all) leaves the model
/// variance unscaled.
fn calibration_factor(steps: &[FilterStep<'_>], obs: &[&Observation], horizon_minutes: u32) -> f64 {
    let warmup = (steps.len() / 4).clamp(2, 20);
    let horizon_ms = horizon_minutes as u64 * 60_000;

    let mut ratios: Vec<f64> = steps
        .iter()
        .skip(warmup)
        .filter_map(|step| {
            let actual = nearest_observation(obs, step.obs.timestamp_ms + horizon_ms)?;
            let predicted = step.obs.price + step.state.x[1] * horizon_minutes as f64;
            let var = step.state.predictive_variance(horizon_minutes);
            (var > 0.0).then(|| (actual.price - predicted).powi(2) / var)
        })
        .collect();
    if ratios.len() < MIN_CALIBRATION_PAIRS {
        ratios = steps
            .iter()
            .skip(2)
            .filter_map(|step| step.innovation_ratio)
            .collect();
    }

    let factor = mean(&ratios).unwrap_or(0.0);
    if factor.is_finite() && factor > 0.0 {
        factor
    } else {
        1.0
    }
}

fn nearest_observation<'a>(obs: &[&'a Observation], target_ms: u64) -> Option<&'a Observation> {
    let lo = target_ms.saturating_sub(CALIBRATION_TOLERANCE_MS);
    let hi = target_ms.saturating_add(CALIBRATION_TOLERANCE_MS);
    let start = obs.partition_point(|o| o.timestamp_ms < lo);
    obs[start..]
        .iter()
        .take_while(|o| o.timestamp_ms <= hi)
        .min_by_key(|o| o.timestamp_ms.abs_diff(target_ms))
        .copied()
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}
