//! Inverse real FFT.
//!
//! The time-domain transform only needs the inverse of a one-sided
//! (Hermitian) spectrum. We rebuild the full spectrum and run a complex
//! inverse FFT through `rustfft`, normalizing by `1/n`.

use num_complex::Complex64;
use rustfft::FftPlanner;

use crate::error::{ModelError, ModelResult};

/// Real signal of length `2·(m − 1)` whose one-sided spectrum is `half`.
///
/// The imaginary parts of the DC and Nyquist bins are ignored.
pub fn irfft(half: &[Complex64]) -> ModelResult<Vec<f64>> {
    if half.len() < 2 {
        return Err(ModelError::InvalidConfig(format!(
            "Inverse real FFT needs at least 2 spectral bins; got {}.",
            half.len()
        )));
    }

    let n = 2 * (half.len() - 1);
    let nyquist = half.len() - 1;

    let mut buffer = vec![Complex64::new(0.0, 0.0); n];
    buffer[0] = Complex64::new(half[0].re, 0.0);
    buffer[nyquist] = Complex64::new(half[nyquist].re, 0.0);
    for k in 1..nyquist {
        buffer[k] = half[k];
        buffer[n - k] = half[k].conj();
    }

    let mut planner = FftPlanner::new();
    let plan = planner.plan_fft_inverse(n);
    plan.process(&mut buffer);

    let scale = 1.0 / n as f64;
    Ok(buffer.into_iter().map(|c| c.re * scale).collect())
}
