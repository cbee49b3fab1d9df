//! Shared domain types.
//!
//! These types are kept small and serializable so they can be:
//!
//! - threaded through the circuit model, fit engine and time-domain transform
//! - saved to / restored from session JSON files
//! - merged into flat key/value rows for CSV exports

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Fixed vocabulary of primary circuit parameters.
///
/// Naming: `R` resistance, `F` characteristic frequency, `P` CPE exponent,
/// `Q` CPE admittance coefficient, `L` inductance; suffixes `inf/h/m/l/e`
/// select the infinite-frequency, high, mid, low and electrode elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ParamKey {
    Rinf,
    Rh,
    Rm,
    Rl,
    Linf,
    Re,
    Ph,
    Pm,
    Pl,
    Fh,
    Fm,
    Fl,
    Pef,
    Pei,
    Qe,
}

impl ParamKey {
    pub const ALL: [ParamKey; 15] = [
        ParamKey::Rinf,
        ParamKey::Rh,
        ParamKey::Rm,
        ParamKey::Rl,
        ParamKey::Linf,
        ParamKey::Re,
        ParamKey::Ph,
        ParamKey::Pm,
        ParamKey::Pl,
        ParamKey::Fh,
        ParamKey::Fm,
        ParamKey::Fl,
        ParamKey::Pef,
        ParamKey::Pei,
        ParamKey::Qe,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ParamKey::Rinf => "Rinf",
            ParamKey::Rh => "Rh",
            ParamKey::Rm => "Rm",
            ParamKey::Rl => "Rl",
            ParamKey::Linf => "Linf",
            ParamKey::Re => "Re",
            ParamKey::Ph => "Ph",
            ParamKey::Pm => "Pm",
            ParamKey::Pl => "Pl",
            ParamKey::Fh => "Fh",
            ParamKey::Fm => "Fm",
            ParamKey::Fl => "Fl",
            ParamKey::Pef => "Pef",
            ParamKey::Pei => "Pei",
            ParamKey::Qe => "Qe",
        }
    }

    /// Phase-type keys (name starts with `P`) are optimized linearly (×10);
    /// every other key is optimized in log10 space.
    pub fn is_phase(self) -> bool {
        self.name().starts_with('P')
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParamKey {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParamKey::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s.trim())
            .ok_or_else(|| ModelError::UnknownParameter(s.to_string()))
    }
}

/// Mapping from parameter key to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub struct ParameterSet {
    values: BTreeMap<ParamKey, f64>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: ParamKey) -> ModelResult<f64> {
        self.values
            .get(&key)
            .copied()
            .ok_or(ModelError::MissingParameter(key))
    }

    pub fn try_get(&self, key: ParamKey) -> Option<f64> {
        self.values.get(&key).copied()
    }

    pub fn set(&mut self, key: ParamKey, value: f64) {
        self.values.insert(key, value);
    }

    /// Copy with one value replaced.
    pub fn with(&self, key: ParamKey, value: f64) -> Self {
        let mut out = self.clone();
        out.set(key, value);
        out
    }

    pub fn contains(&self, key: ParamKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = ParamKey> + '_ {
        self.values.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamKey, f64)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlay `other` on top of `self` (values in `other` win).
    pub fn merged(&self, other: &ParameterSet) -> Self {
        let mut out = self.clone();
        for (k, v) in other.iter() {
            out.set(k, v);
        }
        out
    }

    /// Error if any of `keys` is absent.
    pub fn require(&self, keys: &[ParamKey]) -> ModelResult<()> {
        for &key in keys {
            if !self.contains(key) {
                return Err(ModelError::MissingParameter(key));
            }
        }
        Ok(())
    }
}

impl FromIterator<(ParamKey, f64)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (ParamKey, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl TryFrom<BTreeMap<String, f64>> for ParameterSet {
    type Error = ModelError;

    fn try_from(raw: BTreeMap<String, f64>) -> Result<Self, Self::Error> {
        raw.into_iter()
            .map(|(k, v)| Ok((k.parse::<ParamKey>()?, v)))
            .collect()
    }
}

impl From<ParameterSet> for BTreeMap<String, f64> {
    fn from(set: ParameterSet) -> Self {
        set.values
            .into_iter()
            .map(|(k, v)| (k.name().to_string(), v))
            .collect()
    }
}

/// Arrangement of the mid/low arcs relative to each other and the high arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    Series,
    #[default]
    Parallel,
}

impl Topology {
    pub fn display_name(self) -> &'static str {
        match self {
            Topology::Series => "Series Circuit",
            Topology::Parallel => "Parallel Circuit",
        }
    }
}

/// Residual formulation used by the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Complex-plane (real/imag) residual.
    Cole,
    /// Log-magnitude / log-phase residual.
    Bode,
}

/// How a configured bound pair is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundKind {
    /// `min`/`max` are the bounds themselves.
    Linear,
    /// `min`/`max` are decimal exponents: bounds are `10^min`, `10^max`.
    Power,
}

/// One configured bound entry (as found in a session file).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundConfig {
    pub kind: BoundKind,
    pub min: f64,
    pub max: f64,
}

impl BoundConfig {
    pub fn linear(min: f64, max: f64) -> Self {
        Self {
            kind: BoundKind::Linear,
            min,
            max,
        }
    }

    pub fn power(min: f64, max: f64) -> Self {
        Self {
            kind: BoundKind::Power,
            min,
            max,
        }
    }
}

/// Per-key (lower, upper) bounds in natural (unscaled) units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitBounds {
    bounds: BTreeMap<ParamKey, (f64, f64)>,
}

impl FitBounds {
    /// Build bounds from configured entries.
    ///
    /// Power-kind entries are converted via `10^x`. `Pei` is always unbounded.
    pub fn from_config(config: &BTreeMap<ParamKey, BoundConfig>) -> Self {
        let mut bounds = BTreeMap::new();
        for (&key, cfg) in config {
            let pair = match cfg.kind {
                BoundKind::Power => (10f64.powf(cfg.min), 10f64.powf(cfg.max)),
                BoundKind::Linear => (cfg.min, cfg.max),
            };
            bounds.insert(key, pair);
        }
        bounds.insert(ParamKey::Pei, (f64::NEG_INFINITY, f64::INFINITY));
        Self { bounds }
    }

    pub fn get(&self, key: ParamKey) -> ModelResult<(f64, f64)> {
        self.bounds
            .get(&key)
            .copied()
            .ok_or(ModelError::MissingBounds(key))
    }

    pub fn insert(&mut self, key: ParamKey, lower: f64, upper: f64) {
        self.bounds.insert(key, (lower, upper));
    }
}

/// Keys held fixed at their initial value during a fit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisabledSet {
    keys: BTreeSet<ParamKey>,
}

impl DisabledSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: ParamKey, disabled: bool) {
        if disabled {
            self.keys.insert(key);
        } else {
            self.keys.remove(&key);
        }
    }

    pub fn contains(&self, key: ParamKey) -> bool {
        self.keys.contains(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = ParamKey> + '_ {
        self.keys.iter().copied()
    }
}

impl FromIterator<ParamKey> for DisabledSet {
    fn from_iter<I: IntoIterator<Item = ParamKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// Measured impedance spectrum: parallel arrays of equal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    freq: Vec<f64>,
    z_real: Vec<f64>,
    z_imag: Vec<f64>,
}

impl Spectrum {
    pub fn new(freq: Vec<f64>, z_real: Vec<f64>, z_imag: Vec<f64>) -> ModelResult<Self> {
        if z_real.len() != freq.len() {
            return Err(ModelError::ShapeMismatch {
                what: "Z_real",
                expected: freq.len(),
                actual: z_real.len(),
            });
        }
        if z_imag.len() != freq.len() {
            return Err(ModelError::ShapeMismatch {
                what: "Z_imag",
                expected: freq.len(),
                actual: z_imag.len(),
            });
        }
        Ok(Self {
            freq,
            z_real,
            z_imag,
        })
    }

    pub fn from_complex(freq: Vec<f64>, z: &[Complex64]) -> ModelResult<Self> {
        let z_real = z.iter().map(|c| c.re).collect();
        let z_imag = z.iter().map(|c| c.im).collect();
        Self::new(freq, z_real, z_imag)
    }

    pub fn freq(&self) -> &[f64] {
        &self.freq
    }

    pub fn z_real(&self) -> &[f64] {
        &self.z_real
    }

    pub fn z_imag(&self) -> &[f64] {
        &self.z_imag
    }

    pub fn impedance(&self) -> Vec<Complex64> {
        self.z_real
            .iter()
            .zip(&self.z_imag)
            .map(|(&re, &im)| Complex64::new(re, im))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.freq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freq.is_empty()
    }

    pub fn min_freq(&self) -> Option<f64> {
        self.freq.iter().copied().reduce(f64::min)
    }

    pub fn max_freq(&self) -> Option<f64> {
        self.freq.iter().copied().reduce(f64::max)
    }

    /// Restrict to the inclusive index window `[lo, hi]`.
    pub fn slice(&self, lo: usize, hi: usize) -> ModelResult<Self> {
        if lo > hi || hi >= self.len() {
            return Err(ModelError::InvalidConfig(format!(
                "Invalid spectrum window [{lo}, {hi}] for {} points.",
                self.len()
            )));
        }
        Self::new(
            self.freq[lo..=hi].to_vec(),
            self.z_real[lo..=hi].to_vec(),
            self.z_imag[lo..=hi].to_vec(),
        )
    }
}

/// Time-domain pulse response derived from a frequency response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeDomainCurve {
    pub freq: Vec<f64>,
    pub time: Vec<f64>,
    pub volt_down: Vec<f64>,
    pub volt_up: Vec<f64>,
}

/// Snapshot produced by one manual evaluation or fit completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationResult {
    pub main_freq: Vec<f64>,
    pub main_z: Vec<Complex64>,
    /// Measured spectrum with the high and electrode arcs subtracted.
    pub rock_z: Vec<Complex64>,
    /// `[Fh, Fm, Fl, 0.1]`.
    pub special_freq: Vec<f64>,
    pub special_z: Vec<Complex64>,
    pub time_domain: TimeDomainCurve,
}

/// Scalar summary values reported alongside a calculation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FitVariables {
    /// Σ |Z_exp − Z_model|².
    pub mismatch: f64,
    /// |Re Z(0.1 Hz)| of the full model.
    pub res_01hz: f64,
    /// Re Z(0.1 Hz) with the electrode neutralized.
    pub r01: f64,
    pub f_high: f64,
    pub f_low: f64,
}

/// One cell of a results row: numeric values keep full precision until printed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for ReportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportValue::Number(v) => write!(f, "{v}"),
            ReportValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ReportValue {
    fn from(v: f64) -> Self {
        ReportValue::Number(v)
    }
}

impl From<&str> for ReportValue {
    fn from(s: &str) -> Self {
        ReportValue::Text(s.to_string())
    }
}

/// Label → value map merged from every source that feeds a results row.
pub type ReportMap = BTreeMap<String, ReportValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_keys_round_trip_through_names() {
        for key in ParamKey::ALL {
            assert_eq!(key.name().parse::<ParamKey>().unwrap(), key);
        }
        assert!(matches!(
            "Rx".parse::<ParamKey>(),
            Err(ModelError::UnknownParameter(_))
        ));
    }

    #[test]
    fn phase_keys_are_p_prefixed() {
        let phase: Vec<_> = ParamKey::ALL.iter().filter(|k| k.is_phase()).collect();
        assert_eq!(
            phase,
            vec![&ParamKey::Ph, &ParamKey::Pm, &ParamKey::Pl, &ParamKey::Pef, &ParamKey::Pei]
        );
    }

    #[test]
    fn parameter_set_json_rejects_unknown_keys() {
        let ok: ParameterSet = serde_json::from_str(r#"{"Rinf": 1.5, "Pei": 0.5}"#).unwrap();
        assert_eq!(ok.get(ParamKey::Rinf).unwrap(), 1.5);
        assert!(serde_json::from_str::<ParameterSet>(r#"{"Bogus": 1.0}"#).is_err());
    }

    #[test]
    fn power_bounds_are_exponents_and_pei_is_unbounded() {
        let mut cfg = BTreeMap::new();
        cfg.insert(ParamKey::Rh, BoundConfig::power(0.0, 3.0));
        cfg.insert(ParamKey::Ph, BoundConfig::linear(0.1, 1.0));
        cfg.insert(ParamKey::Pei, BoundConfig::linear(0.0, 2.0));
        let b = FitBounds::from_config(&cfg);
        assert_eq!(b.get(ParamKey::Rh).unwrap(), (1.0, 1000.0));
        assert_eq!(b.get(ParamKey::Ph).unwrap(), (0.1, 1.0));
        let (lo, hi) = b.get(ParamKey::Pei).unwrap();
        assert!(lo.is_infinite() && lo < 0.0 && hi.is_infinite() && hi > 0.0);
        assert_eq!(b.get(ParamKey::Fh), Err(ModelError::MissingBounds(ParamKey::Fh)));
    }

    #[test]
    fn spectrum_rejects_mismatched_lengths() {
        let err = Spectrum::new(vec![1.0, 2.0], vec![1.0], vec![0.0, 0.0]).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { what: "Z_real", .. }));
    }

    #[test]
    fn spectrum_slice_is_inclusive() {
        let s = Spectrum::new(vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0], vec![0.0; 3]).unwrap();
        let w = s.slice(1, 2).unwrap();
        assert_eq!(w.freq(), &[2.0, 3.0]);
        assert!(s.slice(2, 3).is_err());
    }
}
