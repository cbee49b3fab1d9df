//! Synthetic impedance spectra.
//!
//! A spectrum is produced by evaluating the circuit model on a frequency grid.
//! Optional noise is relative and Gaussian: each real and imaginary part is
//! multiplied by `1 + σ·n`, `n ~ N(0, 1)`, drawn from a seeded `StdRng` so
//! runs are reproducible.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{ParameterSet, Spectrum};
use crate::error::{ModelError, ModelResult};
use crate::models::CircuitModel;

pub use crate::math::log_space;

/// Seeded relative noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseSpec {
    /// Relative standard deviation (0.01 = 1%).
    pub relative_sigma: f64,
    pub seed: u64,
}

/// Evaluate `model` at `freqs` and optionally perturb the result.
pub fn generate_spectrum(
    model: &CircuitModel,
    params: &ParameterSet,
    freqs: &[f64],
    noise: Option<NoiseSpec>,
) -> ModelResult<Spectrum> {
    let z = model.run_model(params, freqs, None)?.total;
    let mut z_real: Vec<f64> = z.iter().map(|c| c.re).collect();
    let mut z_imag: Vec<f64> = z.iter().map(|c| c.im).collect();

    if let Some(noise) = noise {
        if !(noise.relative_sigma.is_finite() && noise.relative_sigma >= 0.0) {
            return Err(ModelError::InvalidConfig(format!(
                "Noise level must be finite and >= 0; got {}.",
                noise.relative_sigma
            )));
        }
        let normal = Normal::new(0.0, noise.relative_sigma)
            .map_err(|e| ModelError::InvalidConfig(format!("Noise distribution error: {e}")))?;
        let mut rng = StdRng::seed_from_u64(noise.seed);
        for (re, im) in z_real.iter_mut().zip(z_imag.iter_mut()) {
            *re *= 1.0 + normal.sample(&mut rng);
            *im *= 1.0 + normal.sample(&mut rng);
        }
    }

    Spectrum::new(freqs.to_vec(), z_real, z_imag)
}
