//! Robust Levenberg-Marquardt
//!
//! Minimises Σ ρ(rᵢ) for a Huber loss ρ over a small parameter vector.
//! Each iteration reweights the residuals (IRLS weights min(1, δ/|r|)),
//! so the weighted normal equations carry the exact robust gradient, and
//! takes a damped Gauss-Newton step that is kept only if the robust cost
//! drops.
//!
//! Reference:
//! Holland & Welsch, "Robust regression using iteratively reweighted
//! least-squares", Comm. Statist. Theory Methods 6(9), 1977.

use nalgebra::{DMatrix, DVector};

/// Solver settings
#[derive(Clone, Debug)]
pub struct LmParams {
    /// Huber threshold in residual units; `f64::INFINITY` gives ordinary least squares
    pub delta: f64,
    /// Maximum number of accepted or rejected outer iterations (default 200)
    pub max_iterations: usize,
    /// Relative tolerance on cost decrease and step size (default 1e-10)
    pub tolerance: f64,
}

impl Default for LmParams {
    fn default() -> Self {
        Self {
            delta: 1.0,
            max_iterations: 200,
            tolerance: 1e-10,
        }
    }
}

/// How the solve ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LmStatus {
    /// Cost or step fell below tolerance, or no further decrease was possible
    Converged,
    /// Iteration budget exhausted with a finite cost
    IterationLimit,
    /// The objective was non-finite at the start point
    NonFinite,
}

#[derive(Clone, Debug)]
pub struct LmResult {
    pub x: Vec<f64>,
    /// Robust cost Σ ρ(rᵢ) at `x`
    pub cost: f64,
    pub iterations: usize,
    pub status: LmStatus,
}

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;

/// Huber loss: r²/2 inside ±δ, δ(|r| - δ/2) outside
#[inline]
pub fn huber_rho(r: f64, delta: f64) -> f64 {
    let a = r.abs();
    if a <= delta {
        0.5 * r * r
    } else {
        delta * (a - 0.5 * delta)
    }
}

/// IRLS weight ψ(r)/r for the Huber loss
#[inline]
pub fn huber_weight(r: f64, delta: f64) -> f64 {
    let a = r.abs();
    if a <= delta {
        1.0
    } else {
        delta / a
    }
}

/// Robust cost of a residual vector, non-finite if any residual is
pub fn robust_cost(residuals: &[f64], delta: f64) -> f64 {
    residuals.iter().map(|&r| huber_rho(r, delta)).sum()
}

/// Solve min Σ ρ(r(x)) starting from `x0`
///
/// # Arguments
/// * `residual_fn` - Closure returning r(x); non-finite entries mark x as invalid
/// * `jacobian_fn` - Closure returning ∂r/∂x as an (m x n) matrix
/// * `x0` - Initial guess
/// * `params` - Loss threshold and stopping criteria
pub fn huber_levenberg_marquardt<F, G>(
    residual_fn: F,
    jacobian_fn: G,
    x0: &[f64],
    params: &LmParams,
) -> LmResult
where
    F: Fn(&[f64]) -> Vec<f64>,
    G: Fn(&[f64]) -> DMatrix<f64>,
{
    let n = x0.len();
    let delta = params.delta;
    let tol = params.tolerance;

    let mut x = x0.to_vec();
    let mut r = residual_fn(&x);
    let mut cost = robust_cost(&r, delta);
    if !cost.is_finite() {
        return LmResult { x, cost, iterations: 0, status: LmStatus::NonFinite };
    }

    let mut lambda = LAMBDA_INIT;

    for iter in 0..params.max_iterations {
        let jac = jacobian_fn(&x);

        // Weighted normal equations: A = JᵀWJ, g = JᵀWr
        let mut a = DMatrix::<f64>::zeros(n, n);
        let mut g = DVector::<f64>::zeros(n);
        for (i, &ri) in r.iter().enumerate() {
            let w = huber_weight(ri, delta);
            for p in 0..n {
                let jp = jac[(i, p)];
                g[p] += w * jp * ri;
                for q in p..n {
                    a[(p, q)] += w * jp * jac[(i, q)];
                }
            }
        }
        for p in 0..n {
            for q in 0..p {
                a[(p, q)] = a[(q, p)];
            }
        }

        let max_diag = (0..n).fold(0.0_f64, |m, p| m.max(a[(p, p)]));
        if g.amax() <= 1e-15 * (1.0 + max_diag) {
            return LmResult { x, cost, iterations: iter, status: LmStatus::Converged };
        }
        let diag_floor = (max_diag * 1e-12).max(1e-300);

        let mut damped = a.clone();
        for p in 0..n {
            damped[(p, p)] += lambda * a[(p, p)].max(diag_floor);
        }

        let step = damped
            .clone()
            .cholesky()
            .map(|c| c.solve(&(-&g)))
            .or_else(|| damped.lu().solve(&(-&g)));

        let Some(step) = step else {
            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                return LmResult { x, cost, iterations: iter, status: LmStatus::Converged };
            }
            continue;
        };

        let x_new: Vec<f64> = x.iter().zip(step.iter()).map(|(xi, di)| xi + di).collect();
        let r_new = residual_fn(&x_new);
        let cost_new = robust_cost(&r_new, delta);

        if cost_new.is_finite() && cost_new < cost {
            let decrease = cost - cost_new;
            let x_norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();
            x = x_new;
            r = r_new;
            cost = cost_new;
            lambda = (lambda / 10.0).max(LAMBDA_MIN);

            if decrease <= tol * cost || step.norm() <= tol * (x_norm + tol) || cost <= 1e-30 {
                return LmResult { x, cost, iterations: iter + 1, status: LmStatus::Converged };
            }
        } else {
            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                // No descent direction left at machine precision
                return LmResult { x, cost, iterations: iter + 1, status: LmStatus::Converged };
            }
        }
    }

    LmResult { x, cost, iterations: params.max_iterations, status: LmStatus::IterationLimit }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huber_rho_is_continuous_at_threshold() {
        let delta = 1.5;
        let inside = huber_rho(delta - 1e-9, delta);
        let outside = huber_rho(delta + 1e-9, delta);
        assert!((inside - outside).abs() < 1e-8);
        assert_eq!(huber_rho(-2.0, f64::INFINITY), 2.0);
    }

    #[test]
    fn test_huber_weight() {
        assert_eq!(huber_weight(0.5, 1.0), 1.0);
        assert_eq!(huber_weight(-4.0, 1.0), 0.25);
        assert_eq!(huber_weight(1e6, f64::INFINITY), 1.0);
    }

    fn line_problem(t: &[f64], y: &[f64], delta: f64) -> LmResult {
        let residual = |x: &[f64]| -> Vec<f64> {
            t.iter().zip(y).map(|(&ti, &yi)| x[0] + x[1] * ti - yi).collect()
        };
        let jacobian = |_: &[f64]| DMatrix::from_fn(t.len(), 2, |i, j| if j == 0 { 1.0 } else { t[i] });
        let params = LmParams { delta, ..Default::default() };
        huber_levenberg_marquardt(residual, jacobian, &[0.0, 0.0], &params)
    }

    #[test]
    fn test_exact_line_fit() {
        let t: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = t.iter().map(|&ti| 2.0 - 0.5 * ti).collect();
        let result = line_problem(&t, &y, 1.0);
        assert_eq!(result.status, LmStatus::Converged);
        assert!((result.x[0] - 2.0).abs() < 1e-6);
        assert!((result.x[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_outlier_pulls_ols_more_than_huber() {
        let t: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let mut y: Vec<f64> = t.iter().map(|&ti| 1.0 + 0.2 * ti).collect();
        y[29] += 50.0;

        let robust = line_problem(&t, &y, 1.0);
        let ols = line_problem(&t, &y, f64::INFINITY);

        let robust_err = (robust.x[1] - 0.2).abs();
        let ols_err = (ols.x[1] - 0.2).abs();
        assert!(robust_err < 0.015, "Huber slope error {}", robust_err);
        assert!(ols_err > 5.0 * robust_err, "OLS {} vs Huber {}", ols_err, robust_err);
    }

    #[test]
    fn test_non_finite_start() {
        let residual = |_: &[f64]| vec![f64::NAN];
        let jacobian = |_: &[f64]| DMatrix::zeros(1, 1);
        let result = huber_levenberg_marquardt(residual, jacobian, &[1.0], &LmParams::default());
        assert_eq!(result.status, LmStatus::NonFinite);
    }
}
