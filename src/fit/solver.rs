//! Bounded nonlinear least squares.
//!
//! Projected Levenberg-Marquardt on box constraints:
//!
//! - forward-difference Jacobian (steps point inward at an active bound)
//! - variables sitting on a bound with the gradient pushing outward are
//!   frozen for the iteration (active set)
//! - the damped step is solved as the tall system `[J_F; √(λ·D_F)]·δ = [−r; 0]`
//!   with `D` the squared column norms of `J`
//! - the trial point is projected back into the box; the step is accepted on
//!   any cost decrease and `λ` follows Nielsen's gain-ratio update
//!
//! `max_evaluations` caps residual evaluations at trial points (the initial
//! point included); finite-difference evaluations are not counted.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::error::{ModelError, ModelResult};
use crate::math::solve_damped;

const LAMBDA_MAX: f64 = 1e30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    pub max_evaluations: usize,
    /// Relative cost decrease below which the solve stops.
    pub ftol: f64,
    /// Relative step size below which the solve stops.
    pub xtol: f64,
    /// Projected-gradient norm below which the solve stops.
    pub gtol: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_evaluations: 2000,
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    GradientConverged,
    CostConverged,
    StepConverged,
    MaxEvaluations,
    NoFreeParameters,
}

impl SolverStatus {
    pub fn label(self) -> &'static str {
        match self {
            SolverStatus::GradientConverged => "gradient tolerance reached",
            SolverStatus::CostConverged => "cost tolerance reached",
            SolverStatus::StepConverged => "step tolerance reached",
            SolverStatus::MaxEvaluations => "evaluation limit reached",
            SolverStatus::NoFreeParameters => "no free parameters",
        }
    }

    pub fn converged(self) -> bool {
        !matches!(self, SolverStatus::MaxEvaluations)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverReport {
    pub x: Vec<f64>,
    pub residual: Vec<f64>,
    /// `½‖r‖²` at `x`.
    pub cost: f64,
    pub evaluations: usize,
    pub iterations: usize,
    pub status: SolverStatus,
}

/// Minimize `½‖f(x)‖²` subject to `lower ≤ x ≤ upper`.
///
/// `f` must return vectors of one fixed length; `x0` must be feasible.
pub fn least_squares<F>(
    mut f: F,
    x0: &[f64],
    lower: &[f64],
    upper: &[f64],
    opts: &SolverOptions,
) -> ModelResult<SolverReport>
where
    F: FnMut(&[f64]) -> Vec<f64>,
{
    let n = x0.len();
    check_len("lower bounds", n, lower.len())?;
    check_len("upper bounds", n, upper.len())?;
    for j in 0..n {
        if !(lower[j] < upper[j]) {
            return Err(ModelError::InvalidConfig(format!(
                "Bound {j} is empty: lower {} is not below upper {}.",
                lower[j], upper[j]
            )));
        }
        if !(x0[j] >= lower[j] && x0[j] <= upper[j]) {
            return Err(ModelError::InvalidConfig(format!(
                "Start value {j} ({}) lies outside [{}, {}].",
                x0[j], lower[j], upper[j]
            )));
        }
    }

    let mut x = x0.to_vec();
    let mut r = f(&x);
    let mut evaluations = 1;
    let mut iterations = 0;
    let m = r.len();
    let mut cost = half_sq(&r);

    if n == 0 {
        return Ok(SolverReport {
            x,
            residual: r,
            cost,
            evaluations,
            iterations,
            status: SolverStatus::NoFreeParameters,
        });
    }

    let mut lambda = -1.0;
    let mut nu = 2.0;

    let status = 'outer: loop {
        let jac = jacobian(&mut f, &x, &r, lower, upper)?;
        let g = jac.transpose() * DVector::from_column_slice(&r);

        let pg_norm = (0..n)
            .map(|j| (x[j] - (x[j] - g[j]).clamp(lower[j], upper[j])).abs())
            .fold(0.0, f64::max);
        if pg_norm <= opts.gtol {
            break SolverStatus::GradientConverged;
        }

        let free: Vec<usize> = (0..n)
            .filter(|&j| {
                let pinned_low = x[j] <= lower[j] && g[j] > 0.0;
                let pinned_high = x[j] >= upper[j] && g[j] < 0.0;
                !(pinned_low || pinned_high)
            })
            .collect();

        let diag: Vec<f64> = (0..n)
            .map(|j| jac.column(j).norm_squared().max(f64::EPSILON))
            .collect();
        if lambda < 0.0 {
            lambda = 1e-3 * diag.iter().copied().fold(0.0, f64::max);
        }

        let x_norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();

        loop {
            if evaluations >= opts.max_evaluations {
                break 'outer SolverStatus::MaxEvaluations;
            }
            if lambda > LAMBDA_MAX {
                break 'outer SolverStatus::StepConverged;
            }

            let Some(delta) = damped_step(&jac, &r, &free, &diag, lambda) else {
                lambda *= nu;
                nu *= 2.0;
                continue;
            };

            let x_new: Vec<f64> = (0..n)
                .map(|j| (x[j] + delta[j]).clamp(lower[j], upper[j]))
                .collect();
            let p: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
            let p_norm = p.iter().map(|v| v * v).sum::<f64>().sqrt();
            if p_norm <= opts.xtol * (opts.xtol + x_norm) {
                break 'outer SolverStatus::StepConverged;
            }

            let r_new = f(&x_new);
            evaluations += 1;
            check_len("residual", m, r_new.len())?;
            let cost_new = half_sq(&r_new);

            let jp = &jac * DVector::from_column_slice(&p);
            let model_cost = 0.5
                * r.iter()
                    .zip(jp.iter())
                    .map(|(ri, ji)| (ri + ji).powi(2))
                    .sum::<f64>();
            let predicted = cost - model_cost;
            let actual = cost - cost_new;

            if cost_new.is_finite() && predicted > 0.0 && actual > 0.0 {
                let rho = actual / predicted;
                lambda *= (1.0 - (2.0 * rho - 1.0).powi(3)).max(1.0 / 3.0);
                nu = 2.0;

                let cost_old = cost;
                x = x_new;
                r = r_new;
                cost = cost_new;
                iterations += 1;

                if actual <= opts.ftol * cost_old {
                    break 'outer SolverStatus::CostConverged;
                }
                break;
            }

            lambda *= nu;
            nu *= 2.0;
        }
    };

    Ok(SolverReport {
        x,
        residual: r,
        cost,
        evaluations,
        iterations,
        status,
    })
}

fn half_sq(r: &[f64]) -> f64 {
    0.5 * r.iter().map(|v| v * v).sum::<f64>()
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> ModelResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ModelError::ShapeMismatch {
            what,
            expected,
            actual,
        })
    }
}

fn jacobian<F>(
    f: &mut F,
    x: &[f64],
    r: &[f64],
    lower: &[f64],
    upper: &[f64],
) -> ModelResult<DMatrix<f64>>
where
    F: FnMut(&[f64]) -> Vec<f64>,
{
    let m = r.len();
    let n = x.len();
    let base_step = f64::EPSILON.sqrt();

    let mut jac = DMatrix::zeros(m, n);
    let mut xp = x.to_vec();
    for j in 0..n {
        let mut h = base_step * x[j].abs().max(1.0);
        if x[j] + h > upper[j] {
            let room_up = upper[j] - x[j];
            let room_down = x[j] - lower[j];
            h = if room_down >= h {
                -h
            } else if room_up >= room_down {
                room_up
            } else {
                -room_down
            };
        }
        if h == 0.0 {
            continue;
        }

        xp[j] = x[j] + h;
        let rp = f(&xp);
        xp[j] = x[j];
        check_len("residual", m, rp.len())?;

        for i in 0..m {
            jac[(i, j)] = (rp[i] - r[i]) / h;
        }
    }
    Ok(jac)
}

/// Damped Gauss-Newton step restricted to the `free` columns.
fn damped_step(
    jac: &DMatrix<f64>,
    r: &[f64],
    free: &[usize],
    diag: &[f64],
    lambda: f64,
) -> Option<Vec<f64>> {
    let m = jac.nrows();
    let k = free.len();
    let mut step = vec![0.0; jac.ncols()];
    if k == 0 {
        return Some(step);
    }

    let sub = DMatrix::from_fn(m, k, |i, c| jac[(i, free[c])]);
    let rhs = DVector::from_iterator(m, r.iter().map(|ri| -ri));
    let damping: Vec<f64> = free.iter().map(|&j| lambda * diag[j]).collect();

    let delta = solve_damped(&sub, &rhs, &damping)?;
    for (c, &j) in free.iter().enumerate() {
        step[j] = delta[c];
    }
    Some(step)
}
