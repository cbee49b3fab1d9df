//! Summary metrics of a falling-voltage curve.
//!
//! - integral checkpoints: the falling voltage sampled at fixed times
//! - chargeability: windowed integrals normalized by the voltage at `t = 0`

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::math::{interp_clamped, search_left, trapz_window};

/// Labelled sampling time for the falling-voltage curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub label: String,
    pub time: f64,
}

impl Checkpoint {
    pub fn new(label: impl Into<String>, time: f64) -> Self {
        Self {
            label: label.into(),
            time,
        }
    }
}

/// The standard table from 0.1 ms to 1.6 s.
pub fn default_checkpoints() -> Vec<Checkpoint> {
    [
        ("V(.1ms)", 0.0001),
        ("V(1ms)", 0.001),
        ("V(10)", 0.01),
        ("V(100)", 0.1),
        ("V(200)", 0.2),
        ("V(400)", 0.4),
        ("V(800)", 0.8),
        ("V(1.2s)", 1.2),
        ("V(1.6s)", 1.6),
    ]
    .into_iter()
    .map(|(label, time)| Checkpoint::new(label, time))
    .collect()
}

/// Falling-voltage values in checkpoint order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct IntegralMetrics {
    entries: Vec<(String, f64)>,
}

impl IntegralMetrics {
    pub fn get(&self, label: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.entries.iter().map(|(l, v)| (l.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sample `volt_down` at the first time index `>=` each checkpoint.
///
/// Checkpoints past the end of the curve read the last sample.
pub fn integral_metrics(
    time: &[f64],
    volt_down: &[f64],
    checkpoints: &[Checkpoint],
) -> ModelResult<IntegralMetrics> {
    if time.len() != volt_down.len() {
        return Err(ModelError::ShapeMismatch {
            what: "falling voltage vs time",
            expected: time.len(),
            actual: volt_down.len(),
        });
    }
    if time.is_empty() {
        return Err(ModelError::InvalidConfig("Time-domain curve is empty.".into()));
    }

    let last = time.len() - 1;
    let entries = checkpoints
        .iter()
        .map(|cp| {
            let idx = search_left(time, cp.time).min(last);
            (cp.label.clone(), volt_down[idx])
        })
        .collect();
    Ok(IntegralMetrics { entries })
}

/// Integration windows for the chargeability numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChargeabilityWindows {
    /// Window of `mx`.
    pub short: (f64, f64),
    /// Window of `mt`.
    pub full: (f64, f64),
    /// Sampling time of `m0`.
    pub point: f64,
}

impl Default for ChargeabilityWindows {
    fn default() -> Self {
        Self {
            short: (0.45, 1.1),
            full: (0.0, 2.0),
            point: 0.001,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Chargeability {
    /// `1000 · ∫short v dt / Vp` (ms).
    pub mx: f64,
    /// `1000 · ∫full v dt / Vp` (ms).
    pub mt: f64,
    /// `v(point) / Vp`.
    pub m0: f64,
    /// Falling voltage at `t = 0`.
    pub vp: f64,
}

impl Chargeability {
    pub fn entries(&self) -> [(&'static str, f64); 4] {
        [("mx", self.mx), ("mt", self.mt), ("m0", self.m0), ("Vp", self.vp)]
    }
}

const VP_EPSILON: f64 = 1e-12;

/// Chargeability of a falling-voltage curve; all zeros when `Vp ≈ 0`.
pub fn chargeability(time: &[f64], volt_down: &[f64], windows: &ChargeabilityWindows) -> Chargeability {
    if time.is_empty() || time.len() != volt_down.len() {
        return Chargeability::default();
    }

    let vp = interp_clamped(0.0, time, volt_down);
    if vp.abs() < VP_EPSILON {
        return Chargeability {
            vp,
            ..Chargeability::default()
        };
    }

    let (s_lo, s_hi) = windows.short;
    let (f_lo, f_hi) = windows.full;
    let integral_mx = trapz_window(time, volt_down, s_lo, s_hi);
    let integral_mt = trapz_window(time, volt_down, f_lo, f_hi);
    let v_point = if time.iter().any(|&t| t >= windows.point) {
        interp_clamped(windows.point, time, volt_down)
    } else {
        0.0
    };

    Chargeability {
        mx: 1000.0 * integral_mx / vp,
        mt: 1000.0 * integral_mt / vp,
        m0: v_point / vp,
        vp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decaying_curve() -> (Vec<f64>, Vec<f64>) {
        let time: Vec<f64> = (0..=2000).map(|i| i as f64 / 1000.0).collect();
        let volt: Vec<f64> = time.iter().map(|t| 5.0 * (-t / 0.3).exp()).collect();
        (time, volt)
    }

    #[test]
    fn checkpoints_stay_within_monotone_range() {
        let (time, volt) = decaying_curve();
        let m = integral_metrics(&time, &volt, &default_checkpoints()).unwrap();
        assert_eq!(m.len(), 9);

        let max = volt.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = volt.iter().copied().fold(f64::INFINITY, f64::min);
        for (label, v) in m.iter() {
            assert!(v >= min && v <= max, "{label} = {v}");
        }
        let labels: Vec<&str> = m.iter().map(|(l, _)| l).collect();
        assert_eq!(labels[0], "V(.1ms)");
        assert_eq!(labels[8], "V(1.6s)");
    }

    #[test]
    fn checkpoint_uses_first_index_at_or_after_time() {
        let time = [0.0, 0.5, 1.0, 1.5];
        let volt = [4.0, 3.0, 2.0, 1.0];
        let cps = vec![Checkpoint::new("a", 0.5), Checkpoint::new("b", 0.6), Checkpoint::new("c", 9.0)];
        let m = integral_metrics(&time, &volt, &cps).unwrap();
        assert_eq!(m.get("a"), Some(3.0));
        assert_eq!(m.get("b"), Some(2.0));
        assert_eq!(m.get("c"), Some(1.0));
        assert_eq!(m.get("missing"), None);
    }

    #[test]
    fn checkpoints_reject_mismatched_curve() {
        assert!(integral_metrics(&[0.0, 1.0], &[1.0], &default_checkpoints()).is_err());
        assert!(integral_metrics(&[], &[], &default_checkpoints()).is_err());
    }

    #[test]
    fn chargeability_of_exponential_decay() {
        let (time, volt) = decaying_curve();
        let c = chargeability(&time, &volt, &ChargeabilityWindows::default());
        assert!((c.vp - 5.0).abs() < 1e-12);
        // ∫0..2 e^{-t/0.3} dt = 0.3 (1 - e^{-2/0.3})
        let mt = 1000.0 * 0.3 * (1.0 - (-2.0f64 / 0.3).exp());
        assert!((c.mt - mt).abs() / mt < 1e-4);
        let mx = 1000.0 * 0.3 * ((-0.45f64 / 0.3).exp() - (-1.1f64 / 0.3).exp());
        assert!((c.mx - mx).abs() / mx < 1e-3);
        assert!((c.m0 - (-0.001f64 / 0.3).exp()).abs() < 1e-9);
    }

    #[test]
    fn chargeability_is_zero_without_initial_voltage() {
        let time = [0.0, 1.0, 2.0];
        let c = chargeability(&time, &[0.0, 1.0, 2.0], &ChargeabilityWindows::default());
        assert_eq!((c.mx, c.mt, c.m0), (0.0, 0.0, 0.0));
    }
}
