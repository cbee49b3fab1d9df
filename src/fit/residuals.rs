//! Residual formulations and soft penalties.
//!
//! The fit minimizes `½‖r‖²` where `r` is the concatenation of:
//!
//! - the weighted model residual (Cole or Bode form), `2·n` entries
//! - optionally, the Gaussian prior on the scaled free parameters
//! - optionally, the frequency-ordering penalty (`Fh ≥ Fm ≥ Fl`), 2 entries
//!
//! Every entry of the model residual shares one dynamic weight which grows
//! when any CPE exponent drifts toward zero.

use crate::domain::{FitMode, ParamKey, ParameterSet, Spectrum};
use crate::error::{ModelError, ModelResult};
use crate::models::C64;

/// CPE exponents whose low values inflate the residual weight.
pub const WEIGHTED_EXPONENTS: [ParamKey; 4] =
    [ParamKey::Ph, ParamKey::Pm, ParamKey::Pl, ParamKey::Pef];

/// Floor added to |phase| before taking log10 in the Bode residual.
const PHASE_FLOOR_DEG: f64 = 1e-10;

/// `Π (1 + base · exp(exponent · P))` over [`WEIGHTED_EXPONENTS`].
pub fn dynamic_weight(params: &ParameterSet, base: f64, exponent: f64) -> ModelResult<f64> {
    WEIGHTED_EXPONENTS.iter().try_fold(1.0, |acc, &key| {
        Ok(acc * (1.0 + base * (exponent * params.get(key)?).exp()))
    })
}

/// Weighted model residual for either formulation.
pub fn model_residual(
    mode: FitMode,
    model_z: &[C64],
    spectrum: &Spectrum,
    weight: f64,
) -> ModelResult<Vec<f64>> {
    if model_z.len() != spectrum.len() {
        return Err(ModelError::ShapeMismatch {
            what: "model impedance vs spectrum",
            expected: spectrum.len(),
            actual: model_z.len(),
        });
    }
    let res = match mode {
        FitMode::Cole => cole_residual(model_z, spectrum, weight),
        FitMode::Bode => bode_residual(model_z, spectrum, weight),
    };
    if res.iter().all(|v| v.is_finite()) {
        Ok(res)
    } else {
        Err(ModelError::NonFiniteResidual)
    }
}

/// `[(Re Z − Re E)·w ..., (Im Z − Im E)·w ...]`.
pub fn cole_residual(model_z: &[C64], spectrum: &Spectrum, weight: f64) -> Vec<f64> {
    let re = model_z
        .iter()
        .zip(spectrum.z_real())
        .map(|(z, e)| (z.re - e) * weight);
    let im = model_z
        .iter()
        .zip(spectrum.z_imag())
        .map(|(z, e)| (z.im - e) * weight);
    re.chain(im).collect()
}

/// `[Δlog10|Z|·w ..., Δlog10(|phase°| + floor)·w ...]`.
pub fn bode_residual(model_z: &[C64], spectrum: &Spectrum, weight: f64) -> Vec<f64> {
    let measured: Vec<C64> = spectrum.impedance();

    let abs = model_z
        .iter()
        .zip(&measured)
        .map(|(z, e)| (z.norm().log10() - e.norm().log10()) * weight);
    let phase = model_z.iter().zip(&measured).map(|(z, e)| {
        let pz = (z.arg().to_degrees().abs() + PHASE_FLOOR_DEG).log10();
        let pe = (e.arg().to_degrees().abs() + PHASE_FLOOR_DEG).log10();
        (pz - pe) * weight
    });
    abs.chain(phase).collect()
}

/// Positive parts of `Fm − Fh` and `Fl − Fm`.
pub fn order_violation(params: &ParameterSet) -> ModelResult<[f64; 2]> {
    let fh = params.get(ParamKey::Fh)?;
    let fm = params.get(ParamKey::Fm)?;
    let fl = params.get(ParamKey::Fl)?;
    Ok([(fm - fh).max(0.0), (fl - fm).max(0.0)])
}

/// Ordering violation scaled by `scaling · prior_weight`.
pub fn order_penalty(params: &ParameterSet, scaling: f64, prior_weight: f64) -> ModelResult<[f64; 2]> {
    let [a, b] = order_violation(params)?;
    Ok([a * scaling * prior_weight, b * scaling * prior_weight])
}

/// `prior_weight · (x − x0) / ((upper − lower) · fraction)` per free key.
///
/// Unbounded keys have an infinite sigma and contribute zero.
pub fn gaussian_prior(
    x: &[f64],
    x0: &[f64],
    lower: &[f64],
    upper: &[f64],
    prior_weight: f64,
    fraction: f64,
) -> Vec<f64> {
    x.iter()
        .zip(x0)
        .zip(lower.iter().zip(upper))
        .map(|((xi, x0i), (lo, hi))| {
            let sigma = (hi - lo) * fraction;
            if sigma.is_infinite() {
                0.0
            } else {
                prior_weight * (xi - x0i) / sigma
            }
        })
        .collect()
}
