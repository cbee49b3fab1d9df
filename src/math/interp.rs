//! Grid helpers: log spacing, sorted-array search, interpolation, trapezoid
//! integration.

use crate::error::{ModelError, ModelResult};

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> ModelResult<Vec<f64>> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(ModelError::InvalidConfig(format!(
            "Invalid log range: min={min}, max={max} (must be finite, >0, and max>min)."
        )));
    }
    if steps < 2 {
        return Err(ModelError::InvalidConfig("Log range steps must be >= 2.".into()));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    Ok((0..steps).map(|i| (ln_min + step * i as f64).exp()).collect())
}

/// First index `i` with `sorted[i] >= value`.
pub fn search_left(sorted: &[f64], value: f64) -> usize {
    sorted.partition_point(|&x| x < value)
}

/// First index `i` with `sorted[i] > value`.
pub fn search_right(sorted: &[f64], value: f64) -> usize {
    sorted.partition_point(|&x| x <= value)
}

/// Piecewise-linear interpolation, clamped to the end values outside `xs`.
///
/// `xs` must be ascending and the same length as `ys`.
pub fn interp_clamped(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    if x <= xs[0] {
        return ys[0];
    }
    let last = xs.len() - 1;
    if x >= xs[last] {
        return ys[last];
    }
    let hi = search_right(xs, x);
    lerp(x, xs[hi - 1], xs[hi], ys[hi - 1], ys[hi])
}

/// Piecewise-linear interpolation that extends the end segments outside `xs`.
pub fn interp_extrapolate(x: f64, xs: &[f64], ys: &[f64]) -> ModelResult<f64> {
    if xs.len() < 2 || xs.len() != ys.len() {
        return Err(ModelError::InvalidConfig(format!(
            "Linear extrapolation needs at least 2 matching points; got {} x and {} y.",
            xs.len(),
            ys.len()
        )));
    }
    let hi = search_right(xs, x).clamp(1, xs.len() - 1);
    Ok(lerp(x, xs[hi - 1], xs[hi], ys[hi - 1], ys[hi]))
}

fn lerp(x: f64, x0: f64, x1: f64, y0: f64, y1: f64) -> f64 {
    if x1 == x0 {
        return y0;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// Trapezoid integral of `ys` over `xs`.
pub fn trapz(xs: &[f64], ys: &[f64]) -> f64 {
    xs.windows(2)
        .zip(ys.windows(2))
        .map(|(x, y)| 0.5 * (y[0] + y[1]) * (x[1] - x[0]))
        .sum()
}

/// Trapezoid integral restricted to samples with `lo <= x <= hi`.
pub fn trapz_window(xs: &[f64], ys: &[f64], lo: f64, hi: f64) -> f64 {
    let (wx, wy): (Vec<f64>, Vec<f64>) = xs
        .iter()
        .zip(ys)
        .filter(|(x, _)| **x >= lo && **x <= hi)
        .map(|(x, y)| (*x, *y))
        .unzip();
    trapz(&wx, &wy)
}
