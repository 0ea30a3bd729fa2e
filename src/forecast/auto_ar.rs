use crate::error::AppError;
use crate::forecast::{
    confidence_from_uncertainty, median_step_minutes, trend_from_velocity, valid_observations,
    Forecaster, Z_95,
};
use crate::model::forecast::{ForecastResult, ModelLabel};
use crate::model::observation::Observation;

pub const AUTO_AR_MIN_SAMPLES: usize = 30;
pub const AUTO_AR_MAX_ORDER: usize = 5;
const MAX_FORECAST_STEPS: usize = 1_440;
/// Each candidate needs this many residual degrees of freedom beyond its parameter count.
const MIN_EXTRA_DOF: usize = 5;

/// Drift + AR(p) model fitted to first differences of price.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoArFit {
    pub order: usize,
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    pub residual_variance: f64,
    pub aic: f64,
}

impl AutoArFit {
    /// Mean forecast of the next `steps` differences, continuing from `diffs`.
    pub fn forecast_diffs(&self, diffs: &[f64], steps: usize) -> Vec<f64> {
        let mut buf: Vec<f64> = diffs.to_vec();
        let mut out = Vec::with_capacity(steps);
        for _ in 0..steps {
            let mut next = self.intercept;
            for (i, phi) in self.coefficients.iter().enumerate() {
                let lag = buf.len().checked_sub(i + 1).map(|idx| buf[idx]).unwrap_or(0.0);
                next += phi * lag;
            }
            buf.push(next);
            out.push(next);
        }
        out
    }

    /// Variance of the cumulative (price-level) forecast error after `steps` differences.
    pub fn cumulative_error_variance(&self, steps: usize) -> f64 {
        let p = self.coefficients.len();
        let mut psi = vec![0.0; steps.max(1)];
        psi[0] = 1.0;
        for j in 1..psi.len() {
            let mut v = 0.0;
            for i in 1..=p.min(j) {
                v += self.coefficients[i - 1] * psi[j - i];
            }
            psi[j] = v;
        }
        let mut cum = 0.0;
        let mut total = 0.0;
        for w in psi.iter().take(steps) {
            cum += w;
            total += cum * cum;
        }
        self.residual_variance.max(0.0) * total
    }
}

/// Secondary estimator: picks the AR order on price differences by AIC.
#[derive(Debug, Clone)]
pub struct AutoArForecaster {
    min_samples: usize,
    max_order: usize,
}

impl Default for AutoArForecaster {
    fn default() -> Self {
        Self::new(AUTO_AR_MIN_SAMPLES, AUTO_AR_MAX_ORDER)
    }
}

impl AutoArForecaster {
    pub fn new(min_samples: usize, max_order: usize) -> Self {
        Self {
            min_samples: min_samples.max(3),
            max_order,
        }
    }

    /// Fit every admissible order 0..=max_order and keep the lowest AIC.
    pub fn fit(&self, history: &[Observation]) -> Result<AutoArFit, AppError> {
        let obs = valid_observations(history);
        if obs.len() < self.min_samples {
            return Err(AppError::InsufficientData {
                required: self.min_samples,
                got: obs.len(),
            });
        }
        let diffs: Vec<f64> = obs.windows(2).map(|w| w[1].price - w[0].price).collect();

        let mut best: Option<AutoArFit> = None;
        for order in 0..=self.max_order {
            let rows = diffs.len().saturating_sub(order);
            if rows < order + 1 + MIN_EXTRA_DOF {
                break;
            }
            let Some(candidate) = fit_order(&diffs, order) else {
                continue;
            };
            let better = best.as_ref().map(|b| candidate.aic < b.aic).unwrap_or(true);
            if better {
                best = Some(candidate);
            }
        }
        best.ok_or_else(|| {
            AppError::SecondaryUnavailable("no admissible AR order could be fitted".to_string())
        })
    }

    fn diffs(history: &[Observation]) -> Vec<f64> {
        valid_observations(history)
            .windows(2)
            .map(|w| w[1].price - w[0].price)
            .collect()
    }
}

impl Forecaster for AutoArForecaster {
    fn forecast(
        &self,
        history: &[Observation],
        horizon_minutes: u32,
    ) -> Result<ForecastResult, AppError> {
        let fit = self.fit(history)?;
        let obs = valid_observations(history);
        let Some(last) = obs.last() else {
            return Err(AppError::InsufficientData {
                required: self.min_samples,
                got: 0,
            });
        };
        let step = median_step_minutes(&obs).ok_or_else(|| {
            AppError::SecondaryUnavailable("observations carry no time spacing".to_string())
        })?;
        let steps = ((horizon_minutes as f64 / step).round() as usize).clamp(1, MAX_FORECAST_STEPS);

        let diffs = Self::diffs(history);
        let path = fit.forecast_diffs(&diffs, steps);
        let current_price = last.price;
        let predicted_price = current_price + path.iter().sum::<f64>();
        let uncertainty = fit.cumulative_error_variance(steps).sqrt();
        let horizon = (horizon_minutes as f64).max(f64::EPSILON);
        let velocity = (predicted_price - current_price) / horizon;

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
            model_label: ModelLabel::AutoAr,
            as_of_ms: last.timestamp_ms,
        })
    }

    fn label(&self) -> ModelLabel {
        ModelLabel::AutoAr
    }

    fn min_samples(&self) -> usize {
        self.min_samples
    }
}

fn fit_order(diffs: &[f64], order: usize) -> Option<AutoArFit> {
    let k = order + 1;
    let m = diffs.len() - order;

    // Normal equations XᵗX b = Xᵗy with X = [1, d(t-1), ..., d(t-p)].
    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    let mut row = vec![0.0; k];
    for t in order..diffs.len() {
        row[0] = 1.0;
        for i in 1..=order {
            row[i] = diffs[t - i];
        }
        for a in 0..k {
            xty[a] += row[a] * diffs[t];
            for b in 0..k {
                xtx[a][b] += row[a] * row[b];
            }
        }
    }
    let beta = solve_linear_system(xtx, xty)?;
    let coefficients = beta[1..].to_vec();
    // Require a stationary difference process.
    if coefficients.iter().map(|c| c.abs()).sum::<f64>() >= 1.0 {
        return None;
    }

    let mut sse = 0.0;
    for t in order..diffs.len() {
        let mut fitted = beta[0];
        for i in 1..=order {
            fitted += beta[i] * diffs[t - i];
        }
        sse += (diffs[t] - fitted).powi(2);
    }
    let dof = (m - k).max(1) as f64;
    let residual_variance = sse / dof;
    let mse = (sse / m as f64).max(1e-300);
    let aic = m as f64 * mse.ln() + 2.0 * k as f64;

    Some(AutoArFit {
        order,
        intercept: beta[0],
        coefficients,
        residual_variance,
        aic,
    })
}

/// Gaussian elimination with partial pivoting. `None` when the system is singular.
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    let scale = a
        .iter()
        .enumerate()
        .map(|(i, r)| r[i].abs())
        .fold(0.0_f64, f64::max)
        .max(1e-300);
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() <= scale * 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for r in (col + 1)..n {
            let f = a[r][col] / a[col][col];
            if f == 0.0 {
                continue;
            }
            for c in col..n {
                a[r][c] -= f * a[col][c];
            }
            b[r] -= f * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for r in (0..n).rev() {
        let mut acc = b[r];
        for c in (r + 1)..n {
            acc -= a[r][c] * x[c];
        }
        x[r] = acc / a[r][r];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}
