//! Frequency response → time-domain pulse response.
//!
//! Pipeline (model path):
//!
//! 1. one-sided grid `f_i = i / duration`, `i = 0..=N/2`, with `f_0` replaced
//!    by a small positive floor (CPEs are singular at DC)
//! 2. rock impedance on that grid, DC bin forced real
//! 3. inverse real FFT, then zero-phase Butterworth smoothing
//! 4. rising response `up[i] = Σ_{k<i} h[k]`, falling response
//!    `down[i] = up[ref] − up[i]` with `ref` the first sample after the
//!    reference time
//! 5. checkpoints read from the full curve; the returned curve is cut at
//!    half the duration
//!
//! The interpolation path replaces steps 1-2 with linear interpolation of a
//! measured spectrum onto every `prune`-th grid frequency.

use tracing::debug;

use crate::domain::{ParameterSet, Spectrum, TimeDomainCurve};
use crate::error::{ModelError, ModelResult};
use crate::math::{Biquad, interp_extrapolate, irfft, search_left, search_right};
use crate::models::{C64, CircuitModel};
use crate::transform::metrics::{Checkpoint, IntegralMetrics, default_checkpoints, integral_metrics};

#[derive(Debug, Clone, PartialEq)]
pub struct TimeDomainSettings {
    /// Number of time samples (power of two).
    pub grid_size: usize,
    /// Transform duration in seconds.
    pub duration: f64,
    /// Replacement for the 0 Hz grid frequency.
    pub dc_floor: f64,
    /// Low-pass cutoff relative to Nyquist.
    pub filter_cutoff: f64,
    /// Time at which the falling response is anchored.
    pub reference_time: f64,
    pub checkpoints: Vec<Checkpoint>,
    /// Grid decimation of the interpolation path.
    pub prune: usize,
}

impl Default for TimeDomainSettings {
    fn default() -> Self {
        Self {
            grid_size: 1 << 14,
            duration: 4.0,
            dc_floor: 0.001,
            filter_cutoff: 0.45,
            reference_time: 2.0,
            checkpoints: default_checkpoints(),
            prune: 10,
        }
    }
}

impl TimeDomainSettings {
    pub fn validate(&self) -> ModelResult<()> {
        if self.grid_size < 32 || !self.grid_size.is_power_of_two() {
            return Err(ModelError::InvalidConfig(format!(
                "Time-domain grid size must be a power of two >= 32; got {}.",
                self.grid_size
            )));
        }
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(ModelError::InvalidConfig(format!(
                "Transform duration must be positive; got {}.",
                self.duration
            )));
        }
        if !(self.dc_floor > 0.0 && self.dc_floor < self.df()) {
            return Err(ModelError::InvalidConfig(format!(
                "DC floor must lie in (0, {}); got {}.",
                self.df(),
                self.dc_floor
            )));
        }
        if !(self.reference_time > 0.0 && self.reference_time < self.duration) {
            return Err(ModelError::InvalidConfig(format!(
                "Reference time must lie in (0, {}); got {}.",
                self.duration, self.reference_time
            )));
        }
        if self.prune == 0 {
            return Err(ModelError::InvalidConfig("Prune factor must be >= 1.".into()));
        }
        Ok(())
    }

    pub fn dt(&self) -> f64 {
        self.duration / self.grid_size as f64
    }

    pub fn df(&self) -> f64 {
        1.0 / self.duration
    }

    /// Number of one-sided frequency bins.
    pub fn bins(&self) -> usize {
        self.grid_size / 2 + 1
    }
}

/// Model-path result: the truncated curve plus checkpoints from the full curve.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeDomainOutput {
    pub curve: TimeDomainCurve,
    pub metrics: IntegralMetrics,
}

#[derive(Debug, Clone)]
pub struct TimeDomainTransform {
    settings: TimeDomainSettings,
    filter: Biquad,
}

struct Pulse {
    time: Vec<f64>,
    volt_down: Vec<f64>,
    volt_up: Vec<f64>,
}

impl TimeDomainTransform {
    pub fn new(settings: TimeDomainSettings) -> ModelResult<Self> {
        settings.validate()?;
        let filter = Biquad::butterworth_lowpass(settings.filter_cutoff)?;
        Ok(Self { settings, filter })
    }

    pub fn settings(&self) -> &TimeDomainSettings {
        &self.settings
    }

    /// One-sided evaluation grid with the DC floor applied.
    pub fn frequency_grid(&self) -> Vec<f64> {
        let df = self.settings.df();
        let mut freq: Vec<f64> = (0..self.settings.bins()).map(|i| i as f64 * df).collect();
        freq[0] = self.settings.dc_floor;
        freq
    }

    /// Rock impedance on [`frequency_grid`](Self::frequency_grid), DC bin real.
    pub fn rock_spectrum(&self, model: &CircuitModel, params: &ParameterSet) -> ModelResult<(Vec<f64>, Vec<C64>)> {
        let freq = self.frequency_grid();
        let (mut z, _) = model.run_rock(params, &freq, None)?;
        z[0] = C64::new(z[0].re, 0.0);
        Ok((freq, z))
    }

    /// Pulse response of the model's rock impedance.
    pub fn run_time_domain(&self, model: &CircuitModel, params: &ParameterSet) -> ModelResult<TimeDomainOutput> {
        let (freq, z) = self.rock_spectrum(model, params)?;
        let pulse = self.pulse(&z, self.settings.dt())?;
        let metrics = integral_metrics(&pulse.time, &pulse.volt_down, &self.settings.checkpoints)?;

        debug!(
            bins = freq.len(),
            samples = pulse.time.len(),
            "time-domain transform done"
        );
        Ok(TimeDomainOutput {
            curve: self.truncate(freq, pulse),
            metrics,
        })
    }

    /// Pulse response of a measured spectrum via linear interpolation onto a
    /// decimated uniform grid.
    ///
    /// Less accurate than [`run_time_domain`](Self::run_time_domain): values
    /// outside the measured band are extrapolated from the end segments.
    pub fn transform_spectrum(&self, spectrum: &Spectrum) -> ModelResult<TimeDomainCurve> {
        if spectrum.len() < 2 {
            return Err(ModelError::InvalidConfig(format!(
                "Interpolated transform needs at least 2 spectrum points; got {}.",
                spectrum.len()
            )));
        }

        let mut order: Vec<usize> = (0..spectrum.len()).collect();
        order.sort_by(|&a, &b| spectrum.freq()[a].total_cmp(&spectrum.freq()[b]));
        let fs: Vec<f64> = order.iter().map(|&i| spectrum.freq()[i]).collect();
        let re: Vec<f64> = order.iter().map(|&i| spectrum.z_real()[i]).collect();
        let im: Vec<f64> = order.iter().map(|&i| spectrum.z_imag()[i]).collect();

        let prune = self.settings.prune;
        let df = self.settings.df();
        let freq: Vec<f64> = (0..self.settings.bins())
            .step_by(prune)
            .map(|i| i as f64 * df)
            .collect();

        let z = freq
            .iter()
            .map(|&f| Ok(C64::new(interp_extrapolate(f, &fs, &re)?, interp_extrapolate(f, &fs, &im)?)))
            .collect::<ModelResult<Vec<C64>>>()?;

        let dt = self.settings.duration / (self.settings.grid_size as f64 / prune as f64);
        let pulse = self.pulse(&z, dt)?;
        Ok(self.truncate(freq, pulse))
    }

    fn pulse(&self, z: &[C64], dt: f64) -> ModelResult<Pulse> {
        let impulse = irfft(z)?;
        let smoothed = self.filter.filtfilt(&impulse)?;
        let n = smoothed.len();

        let time: Vec<f64> = (0..n).map(|i| i as f64 * dt).collect();
        let volt_up: Vec<f64> = smoothed
            .iter()
            .scan(0.0, |acc, &h| {
                let before = *acc;
                *acc += h;
                Some(before)
            })
            .collect();

        let ref_idx = search_right(&time, self.settings.reference_time);
        let Some(&anchor) = volt_up.get(ref_idx) else {
            return Err(ModelError::InvalidConfig(format!(
                "Reference time {} lies beyond the transformed curve ({} samples).",
                self.settings.reference_time, n
            )));
        };
        let volt_down = volt_up.iter().map(|v| anchor - v).collect();

        Ok(Pulse {
            time,
            volt_down,
            volt_up,
        })
    }

    fn truncate(&self, mut freq: Vec<f64>, pulse: Pulse) -> TimeDomainCurve {
        let Pulse {
            mut time,
            mut volt_down,
            mut volt_up,
        } = pulse;
        let keep = (search_left(&time, self.settings.duration / 2.0) + 1).min(time.len());
        time.truncate(keep);
        volt_down.truncate(keep);
        volt_up.truncate(keep);
        freq.truncate(keep);
        TimeDomainCurve {
            freq,
            time,
            volt_down,
            volt_up,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Topology;
    use crate::models::circuit::tests::sample_params;

    #[test]
    fn default_settings_are_valid() {
        let s = TimeDomainSettings::default();
        s.validate().unwrap();
        assert_eq!(s.bins(), 8193);
        assert_eq!(s.dt(), 4.0 / 16384.0);
    }

    #[test]
    fn settings_reject_bad_grid_and_reference() {
        let mut s = TimeDomainSettings::default();
        s.grid_size = 1000;
        assert!(s.validate().is_err());

        let mut s = TimeDomainSettings::default();
        s.reference_time = 4.0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn dc_bin_is_real_for_both_topologies() {
        let t = TimeDomainTransform::new(TimeDomainSettings::default()).unwrap();
        for topology in [Topology::Series, Topology::Parallel] {
            let model = CircuitModel::new(topology);
            let (freq, z) = t.rock_spectrum(&model, &sample_params()).unwrap();
            assert_eq!(freq[0], 0.001);
            assert_eq!(freq[1], 0.25);
            assert_eq!(z[0].im, 0.0);
        }
    }

    #[test]
    fn model_path_is_cut_at_half_duration() {
        let t = TimeDomainTransform::new(TimeDomainSettings::default()).unwrap();
        let model = CircuitModel::new(Topology::Parallel);
        let out = t.run_time_domain(&model, &sample_params()).unwrap();

        let c = &out.curve;
        assert_eq!(c.time.len(), 8193);
        assert_eq!(c.freq.len(), 8193);
        assert_eq!(c.volt_down.len(), 8193);
        assert_eq!(c.volt_up.len(), 8193);
        assert_eq!(*c.time.last().unwrap(), 2.0);
        assert_eq!(c.volt_up[0], 0.0);
        assert!(c.volt_down.iter().all(|v| v.is_finite()));

        assert_eq!(out.metrics.len(), 9);
        // 0.1 ms falls between samples 0 and 1 (dt ≈ 0.244 ms).
        assert_eq!(out.metrics.get("V(.1ms)"), Some(c.volt_down[1]));
    }

    #[test]
    fn interpolation_path_of_a_resistor_is_flat() {
        let t = TimeDomainTransform::new(TimeDomainSettings::default()).unwrap();
        let freq = vec![1000.0, 0.1, 10.0];
        let spectrum = Spectrum::new(freq, vec![50.0; 3], vec![0.0; 3]).unwrap();
        let c = t.transform_spectrum(&spectrum).unwrap();

        assert_eq!(c.freq.len(), 820);
        assert_eq!(c.time.len(), 821);
        assert_eq!(c.freq[1], 2.5);
        assert!((c.volt_up[100] - c.volt_up[800]).abs() < 1e-9);
        assert!(c.volt_down[800].abs() < 1e-9);
    }

    #[test]
    fn interpolation_path_needs_two_points() {
        let t = TimeDomainTransform::new(TimeDomainSettings::default()).unwrap();
        let spectrum = Spectrum::new(vec![1.0], vec![1.0], vec![0.0]).unwrap();
        assert!(t.transform_spectrum(&spectrum).is_err());
    }
}
