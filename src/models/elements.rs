//! Circuit primitives: inductor, constant-phase element, parallel combination.
//!
//! Each primitive validates its physical domain and returns a `ModelError`
//! instead of producing `inf`/`NaN`:
//!
//! - inductor: `Z = j·2πf·L`
//! - CPE: `Z = 1 / (Q · j^Pi · (2πf)^Pf)`
//! - parallel: `Z = 1 / (1/Z1 + 1/Z2)`
//! - Q from resonant frequency: `Q = 1 / (R · (2πF0)^P)`

use std::f64::consts::{FRAC_PI_2, PI};

use num_complex::Complex64;

use crate::error::{ModelError, ModelResult};

pub type C64 = Complex64;

/// Impedance of an inductor.
pub fn inductor(freq: f64, l: f64) -> ModelResult<C64> {
    if l == 0.0 {
        return Err(ModelError::ZeroInductance);
    }
    if freq < 0.0 {
        return Err(ModelError::NegativeFrequency { freq });
    }
    Ok(C64::new(0.0, 2.0 * PI * freq * l))
}

/// Impedance of a constant-phase element.
///
/// `pf` is the exponent applied to the angular frequency and `pi` the exponent
/// applied to `j`; an ideal CPE uses `pf == pi`.
pub fn cpe(freq: f64, q: f64, pf: f64, pi: f64) -> ModelResult<C64> {
    if q == 0.0 {
        return Err(ModelError::ZeroCpeCoefficient);
    }
    if freq < 0.0 {
        return Err(ModelError::NegativeFrequency { freq });
    }
    if freq == 0.0 && pf != 0.0 {
        return Err(ModelError::CpeSingularAtZero { pf });
    }

    // Principal branch: j^pi = exp(i·π/2·pi).
    let phase_factor = C64::from_polar(1.0, FRAC_PI_2 * pi);
    let omega_exp = (2.0 * PI * freq).powf(pf);
    Ok(1.0 / (q * phase_factor * omega_exp))
}

/// Two impedances in parallel.
pub fn parallel(z1: C64, z2: C64) -> ModelResult<C64> {
    if z1 == C64::new(0.0, 0.0) || z2 == C64::new(0.0, 0.0) {
        return Err(ModelError::ParallelZeroImpedance);
    }
    Ok(1.0 / (1.0 / z1 + 1.0 / z2))
}

/// CPE coefficient that places the arc peak of `R ∥ CPE` at `f0`.
pub fn q_from_f0(r: f64, f0: f64, p: f64) -> ModelResult<f64> {
    if r == 0.0 {
        return Err(ModelError::ZeroResistance);
    }
    if f0 <= 0.0 {
        return Err(ModelError::NonPositiveResonance { f0 });
    }
    Ok(1.0 / (r * (2.0 * PI * f0).powf(p)))
}

/// Resistor in parallel with an ideal CPE (exponent `p` on both factors).
pub fn rq_arc(freq: f64, r: f64, q: f64, p: f64) -> ModelResult<C64> {
    parallel(cpe(freq, q, p, p)?, C64::new(r, 0.0))
}
