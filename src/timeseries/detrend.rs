//! Robust detrending of region timeseries
//!
//! Fits the exponential + linear trend to each region with a Huber loss so
//! that sparse RF/gradient spikes do not drag the drift and time-constant
//! estimates, then returns the fitted curve and the residuals about it.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::solvers::{huber_levenberg_marquardt, LmParams, LmStatus};
use crate::timeseries::extract::RegionTimeseries;
use crate::timeseries::trend::{self, TrendParams, DEFAULT_INITIAL_TIME_CONSTANT};
use crate::utils::stats::mean;
use crate::volume::label_name;

/// Detrending parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetrendParams {
    /// Huber threshold in intensity units (default 1.0)
    pub huber_delta: f64,
    /// Initial exponential time constant in time-index units (default 3.0)
    pub initial_time_constant: f64,
    /// Solver iteration budget (default 200)
    pub max_iterations: usize,
    /// Solver relative tolerance (default 1e-10)
    pub tolerance: f64,
}

impl Default for DetrendParams {
    fn default() -> Self {
        Self {
            huber_delta: 1.0,
            initial_time_constant: DEFAULT_INITIAL_TIME_CONSTANT,
            max_iterations: 200,
            tolerance: 1e-10,
        }
    }
}

impl DetrendParams {
    /// Ordinary least squares with otherwise identical settings
    pub fn least_squares() -> Self {
        Self { huber_delta: f64::INFINITY, ..Self::default() }
    }

    fn solver_params(&self) -> LmParams {
        LmParams {
            delta: self.huber_delta,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        }
    }
}

/// Outcome of a trend fit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FitStatus {
    Converged,
    /// Iteration budget exhausted; the fit is used but is low confidence
    IterationLimit,
    /// The objective went non-finite; residuals are the raw demeaned series
    Diverged,
}

impl FitStatus {
    pub fn is_low_confidence(self) -> bool {
        !matches!(self, FitStatus::Converged)
    }
}

/// Trend fit for one region
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrendFitResult {
    pub label: i32,
    /// `None` when the fit diverged
    pub params: Option<TrendParams>,
    /// Temporal mean of the input series
    pub offset: f64,
    /// Fitted trend in the demeaned domain (zero mean over t)
    pub fitted: Vec<f64>,
    /// Input minus trend minus offset: deviation about the trend
    pub residuals: Vec<f64>,
    pub status: FitStatus,
}

impl TrendFitResult {
    /// Fitted trend in original intensity units
    pub fn fitted_with_offset(&self) -> Vec<f64> {
        self.fitted.iter().map(|f| f + self.offset).collect()
    }

    /// Detrended series in original intensity units (residuals + offset)
    pub fn detrended(&self) -> Vec<f64> {
        self.residuals.iter().map(|r| r + self.offset).collect()
    }
}

/// Per-region fits in extraction order; `None` marks an undefined region
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrendFits {
    fits: Vec<(i32, Option<TrendFitResult>)>,
}

impl TrendFits {
    pub fn new(fits: Vec<(i32, Option<TrendFitResult>)>) -> Self {
        Self { fits }
    }

    pub fn get(&self, label: i32) -> Option<&TrendFitResult> {
        self.fits
            .iter()
            .find(|(l, _)| *l == label)
            .and_then(|(_, f)| f.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, Option<&TrendFitResult>)> {
        self.fits.iter().map(|(l, f)| (*l, f.as_ref()))
    }
}

/// Fit the trend model to a single series
///
/// Returns `None` if the series is empty or contains non-finite values.
pub fn fit_trend(label: i32, y: &[f64], params: &DetrendParams) -> Option<TrendFitResult> {
    let offset = mean(y)?;
    let nt = y.len();
    let y_demeaned: Vec<f64> = y.iter().map(|v| v - offset).collect();
    let t = trend::time_index(nt);
    let x0 = TrendParams::initial_guess(y, params.initial_time_constant);

    let result = huber_levenberg_marquardt(
        |x| trend::residuals(x, &t, &y_demeaned),
        |x| trend::jacobian(x, &t),
        &x0.to_vec(),
        &params.solver_params(),
    );

    let fitted_params = TrendParams::from_slice(&result.x);
    let fitted = trend::demeaned_curve(&fitted_params, &t);

    if result.status == LmStatus::NonFinite || fitted.iter().any(|v| !v.is_finite()) {
        warn!(
            "Trend fit for region {} ({}) did not converge, reporting untrended residuals",
            label,
            label_name(label)
        );
        return Some(TrendFitResult {
            label,
            params: None,
            offset,
            fitted: vec![0.0; nt],
            residuals: y_demeaned,
            status: FitStatus::Diverged,
        });
    }

    let status = match result.status {
        LmStatus::Converged => FitStatus::Converged,
        _ => {
            warn!(
                "Trend fit for region {} ({}) hit the iteration limit ({})",
                label,
                label_name(label),
                params.max_iterations
            );
            FitStatus::IterationLimit
        }
    };

    debug!(
        "Region {} trend: a={:.4} tau={:.4} s={:.6} ({} iterations, cost {:.3e})",
        label, fitted_params.amplitude, fitted_params.time_constant, fitted_params.slope,
        result.iterations, result.cost
    );

    let residuals = y_demeaned
        .iter()
        .zip(fitted.iter())
        .map(|(y, f)| y - f)
        .collect();

    Some(TrendFitResult {
        label,
        params: Some(fitted_params),
        offset,
        fitted,
        residuals,
        status,
    })
}

/// Robustly detrend every region
///
/// Undefined regions are skipped and stay undefined.
pub fn detrend_timeseries(ts: &RegionTimeseries, params: &DetrendParams) -> TrendFits {
    let fits = ts
        .regions()
        .iter()
        .map(|region| {
            let fit = region
                .values
                .as_deref()
                .and_then(|y| fit_trend(region.label, y, params));
            if fit.is_none() {
                warn!("Skipping trend fit for undefined region {} ({})", region.label, region.name());
            }
            (region.label, fit)
        })
        .collect();
    TrendFits { fits }
}
