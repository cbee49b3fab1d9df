//! Second-order Butterworth low-pass filter with zero-phase application.
//!
//! `filtfilt` runs the filter forward and backward over an odd-reflected
//! extension of the signal, starting each pass from the steady-state initial
//! conditions scaled by the first sample. A constant input therefore comes
//! out unchanged, with no edge transient.

use crate::error::{ModelError, ModelResult};

/// Normalized biquad coefficients (`a0 == 1`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Biquad {
    /// Butterworth low-pass via the bilinear transform.
    ///
    /// `cutoff` is normalized to the Nyquist frequency and must lie in `(0, 1)`.
    pub fn butterworth_lowpass(cutoff: f64) -> ModelResult<Self> {
        if !(cutoff > 0.0 && cutoff < 1.0) {
            return Err(ModelError::InvalidConfig(format!(
                "Filter cutoff must be in (0, 1) relative to Nyquist; got {cutoff}."
            )));
        }

        let wc = (std::f64::consts::PI * cutoff / 2.0).tan();
        let wc2 = wc * wc;
        let sqrt2 = std::f64::consts::SQRT_2;
        let k = 1.0 + sqrt2 * wc + wc2;

        let b0 = wc2 / k;
        Ok(Self {
            b: [b0, 2.0 * b0, b0],
            a: [1.0, 2.0 * (wc2 - 1.0) / k, (1.0 - sqrt2 * wc + wc2) / k],
        })
    }

    /// Steady-state delay-line values for a unit step input.
    pub fn step_initial_state(&self) -> [f64; 2] {
        let [b0, b1, b2] = self.b;
        let [_, a1, a2] = self.a;
        let r0 = b1 - a1 * b0;
        let r1 = b2 - a2 * b0;
        let z0 = (r0 + r1) / (1.0 + a1 + a2);
        [z0, r1 - a2 * z0]
    }

    /// Direct form II transposed, starting from delay state `zi`.
    pub fn apply(&self, signal: &[f64], zi: [f64; 2]) -> Vec<f64> {
        let [b0, b1, b2] = self.b;
        let [_, a1, a2] = self.a;
        let [mut z0, mut z1] = zi;

        signal
            .iter()
            .map(|&x| {
                let y = b0 * x + z0;
                z0 = b1 * x - a1 * y + z1;
                z1 = b2 * x - a2 * y;
                y
            })
            .collect()
    }

    /// Edge padding used by [`Biquad::filtfilt`].
    pub fn pad_len(&self) -> usize {
        3 * self.a.len()
    }

    /// Zero-phase forward-backward filtering.
    pub fn filtfilt(&self, signal: &[f64]) -> ModelResult<Vec<f64>> {
        let pad = self.pad_len();
        if signal.len() <= pad {
            return Err(ModelError::InvalidConfig(format!(
                "Signal of length {} is too short for zero-phase filtering (needs > {pad}).",
                signal.len()
            )));
        }

        let ext = odd_extend(signal, pad);
        let zi = self.step_initial_state();

        let x0 = ext[0];
        let forward = self.apply(&ext, [zi[0] * x0, zi[1] * x0]);

        let reversed: Vec<f64> = forward.into_iter().rev().collect();
        let y0 = reversed[0];
        let mut backward = self.apply(&reversed, [zi[0] * y0, zi[1] * y0]);
        backward.reverse();

        Ok(backward[pad..backward.len() - pad].to_vec())
    }
}

/// Point-reflect `pad` samples about each end of `x`.
fn odd_extend(x: &[f64], pad: usize) -> Vec<f64> {
    let n = x.len();
    let first = x[0];
    let last = x[n - 1];

    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend((1..=pad).rev().map(|i| 2.0 * first - x[i]));
    out.extend_from_slice(x);
    out.extend((1..=pad).map(|i| 2.0 * last - x[n - 1 - i]));
    out
}
