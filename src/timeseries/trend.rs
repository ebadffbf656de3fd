//! Exponential + linear trend model
//!
//! f(t; a, τ, s) = a·exp(-t/τ) + s·t
//!
//! An exponential transient (scanner warm-up) superposed on linear drift.
//! The constant offset is never a free parameter: both the data and the
//! model are demeaned over the sampled time points before fitting, and the
//! offset is restored afterwards for reporting.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Number of free trend parameters
pub const N_TREND_PARAMS: usize = 3;

/// Initial time constant in time-index units (default 3.0)
///
/// Tuned for phantom stabilisation curves, not a physical constant.
pub const DEFAULT_INITIAL_TIME_CONSTANT: f64 = 3.0;

/// Fitted trend parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrendParams {
    /// Exponential amplitude
    pub amplitude: f64,
    /// Exponential time constant (time-index units)
    pub time_constant: f64,
    /// Linear slope per time index
    pub slope: f64,
}

impl TrendParams {
    pub fn to_vec(self) -> Vec<f64> {
        vec![self.amplitude, self.time_constant, self.slope]
    }

    pub fn from_slice(x: &[f64]) -> Self {
        Self { amplitude: x[0], time_constant: x[1], slope: x[2] }
    }

    /// Fixed initial guess: a0 = range(y), τ0 = `initial_time_constant`, s0 = a0 / nt
    pub fn initial_guess(y: &[f64], initial_time_constant: f64) -> Self {
        let max = y.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = y.iter().cloned().fold(f64::INFINITY, f64::min);
        let range = max - min;
        Self {
            amplitude: range,
            time_constant: initial_time_constant,
            slope: range / y.len().max(1) as f64,
        }
    }

    /// Model value at time index `t`
    #[inline]
    pub fn eval(&self, t: f64) -> f64 {
        self.amplitude * (-t / self.time_constant).exp() + self.slope * t
    }
}

/// Time indices 0..nt as floats
pub fn time_index(nt: usize) -> Vec<f64> {
    (0..nt).map(|t| t as f64).collect()
}

/// Model evaluated at every `t`, demeaned over `t`
///
/// A non-positive time constant yields NaN so solvers reject the point.
pub fn demeaned_curve(params: &TrendParams, t: &[f64]) -> Vec<f64> {
    if !(params.time_constant > 0.0) {
        return vec![f64::NAN; t.len()];
    }
    let curve: Vec<f64> = t.iter().map(|&ti| params.eval(ti)).collect();
    let mean = curve.iter().sum::<f64>() / curve.len().max(1) as f64;
    curve.into_iter().map(|v| v - mean).collect()
}

/// Fitting residual r(t) = f_demeaned(t) - y_demeaned(t)
pub fn residuals(x: &[f64], t: &[f64], y_demeaned: &[f64]) -> Vec<f64> {
    demeaned_curve(&TrendParams::from_slice(x), t)
        .into_iter()
        .zip(y_demeaned)
        .map(|(f, y)| f - y)
        .collect()
}

/// Jacobian of [`residuals`] with respect to (a, τ, s)
///
/// Columns are the partial derivatives of f with their mean over `t`
/// removed, matching the demeaned model.
pub fn jacobian(x: &[f64], t: &[f64]) -> DMatrix<f64> {
    let p = TrendParams::from_slice(x);
    let n = t.len();
    let mut jac = DMatrix::<f64>::zeros(n, N_TREND_PARAMS);
    for (i, &ti) in t.iter().enumerate() {
        let e = (-ti / p.time_constant).exp();
        jac[(i, 0)] = e;
        jac[(i, 1)] = p.amplitude * ti * e / (p.time_constant * p.time_constant);
        jac[(i, 2)] = ti;
    }
    for c in 0..N_TREND_PARAMS {
        let mean = jac.column(c).sum() / n.max(1) as f64;
        for i in 0..n {
            jac[(i, c)] -= mean;
        }
    }
    jac
}
