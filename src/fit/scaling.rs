//! Parameter scaling between natural units and optimizer space.
//!
//! - phase-type keys (`P*`) are optimized as `10·value`
//! - every other key is optimized as `log10(value)` and must be `> 0`
//!
//! Circuit parameters span many decades (Linf ~1e-6, Re ~1e4), so log space
//! keeps the finite-difference steps and the damping comparable across keys.

use crate::domain::{FitBounds, ParamKey, ParameterSet};
use crate::error::{ModelError, ModelResult};

const PHASE_FACTOR: f64 = 10.0;

pub fn scale_value(key: ParamKey, value: f64) -> ModelResult<f64> {
    if key.is_phase() {
        return Ok(value * PHASE_FACTOR);
    }
    if value <= 0.0 || value.is_nan() {
        return Err(ModelError::NonPositiveScaled { key, value });
    }
    Ok(value.log10())
}

pub fn descale_value(key: ParamKey, x: f64) -> f64 {
    if key.is_phase() {
        x / PHASE_FACTOR
    } else {
        10f64.powf(x)
    }
}

/// Scaled vector for `keys`, read from `params`.
pub fn scale(keys: &[ParamKey], params: &ParameterSet) -> ModelResult<Vec<f64>> {
    keys.iter()
        .map(|&key| scale_value(key, params.get(key)?))
        .collect()
}

/// Natural-unit parameters for `keys` from a scaled vector.
pub fn descale(keys: &[ParamKey], x: &[f64]) -> ParameterSet {
    keys.iter()
        .zip(x)
        .map(|(&key, &v)| (key, descale_value(key, v)))
        .collect()
}

/// Scaled `(lower, upper)` vectors for `keys`.
///
/// A log-scaled key needs a positive lower bound; `Pei` keeps its infinite
/// bounds through the ×10 scaling.
pub fn scaled_bounds(keys: &[ParamKey], bounds: &FitBounds) -> ModelResult<(Vec<f64>, Vec<f64>)> {
    let mut lower = Vec::with_capacity(keys.len());
    let mut upper = Vec::with_capacity(keys.len());
    for &key in keys {
        let (lo, hi) = bounds.get(key)?;
        let slo = scale_value(key, lo)?;
        let shi = scale_value(key, hi)?;
        if !(slo < shi) {
            return Err(ModelError::InvalidConfig(format!(
                "Lower bound of {key} ({lo}) must be strictly below its upper bound ({hi})."
            )));
        }
        lower.push(slo);
        upper.push(shi);
    }
    Ok((lower, upper))
}

/// Wrap the electrode phase exponent into `[-1, 3)`.
pub fn wrap_pei(value: f64) -> f64 {
    (value + 1.0).rem_euclid(4.0) - 1.0
}
