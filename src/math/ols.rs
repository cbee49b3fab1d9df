//! Damped linear least squares.
//!
//! Each Levenberg-Marquardt iteration solves
//!
//! ```text
//! minimize ‖J·δ − b‖² + Σ d_j·δ_j²
//! ```
//!
//! by stacking `diag(sqrt(d))` under `J` and handing the tall system to an
//! SVD. Overlapping arcs make Jacobian columns nearly collinear, so tiny
//! singular values are cut relative to the largest one.

use nalgebra::{DMatrix, DVector};

/// Relative singular-value cutoffs, tried in order.
const RELATIVE_CUTOFFS: [f64; 3] = [1e-14, 1e-12, 1e-10];

/// Solve the damped system; `damping[j]` is the weight on `δ_j²`.
///
/// Returns `None` for an empty or mismatched system, or when no cutoff
/// yields a finite step.
pub fn solve_damped(jac: &DMatrix<f64>, rhs: &DVector<f64>, damping: &[f64]) -> Option<DVector<f64>> {
    let (m, n) = jac.shape();
    if n == 0 || rhs.len() != m || damping.len() != n {
        return None;
    }

    let mut a = DMatrix::zeros(m + n, n);
    a.view_mut((0, 0), (m, n)).copy_from(jac);
    for (j, d) in damping.iter().enumerate() {
        a[(m + j, j)] = d.max(0.0).sqrt();
    }
    let mut b = DVector::zeros(m + n);
    b.rows_mut(0, m).copy_from(rhs);

    let svd = a.svd(true, true);
    let largest = svd.singular_values.iter().copied().fold(0.0, f64::max);
    if largest <= 0.0 || !largest.is_finite() {
        return None;
    }
    RELATIVE_CUTOFFS.iter().find_map(|&rel| {
        svd.solve(&b, rel * largest)
            .ok()
            .filter(|delta| delta.iter().all(|v| v.is_finite()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undamped_system_is_plain_least_squares() {
        // y = 2 + 3x sampled at x = 0, 1, 2
        let jac = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let rhs = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let delta = solve_damped(&jac, &rhs, &[0.0, 0.0]).unwrap();
        assert!((delta[0] - 2.0).abs() < 1e-10);
        assert!((delta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn damping_shrinks_the_step() {
        // (1 + d)·δ = 1
        let jac = DMatrix::from_row_slice(1, 1, &[1.0]);
        let rhs = DVector::from_row_slice(&[1.0]);
        let delta = solve_damped(&jac, &rhs, &[3.0]).unwrap();
        assert!((delta[0] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let jac = DMatrix::zeros(2, 2);
        let rhs = DVector::zeros(3);
        assert!(solve_damped(&jac, &rhs, &[1.0, 1.0]).is_none());
        assert!(solve_damped(&DMatrix::zeros(0, 0), &DVector::zeros(0), &[]).is_none());
    }
}
