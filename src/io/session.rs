//! JSON session files.
//!
//! A session carries everything needed to reproduce an evaluation besides
//! the spectrum itself: parameter values, fit bounds, locked keys, the
//! circuit configuration and the columns of the results file.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{BoundConfig, DisabledSet, FitBounds, ParamKey, ParameterSet, Topology};
use crate::error::AppError;
use crate::transform::default_checkpoints;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub params: ParameterSet,
    pub bounds: BTreeMap<ParamKey, BoundConfig>,
    pub disabled: Vec<ParamKey>,
    pub topology: Topology,
    pub negative_rinf: bool,
    pub gaussian_prior: bool,
    pub variables_to_print: Vec<String>,
}

impl Default for Session {
    fn default() -> Self {
        use ParamKey::*;

        let params = [
            (Rinf, 10.0),
            (Rh, 50.0),
            (Rm, 100.0),
            (Rl, 200.0),
            (Linf, 1e-6),
            (Re, 1e4),
            (Ph, 0.8),
            (Pm, 0.6),
            (Pl, 0.5),
            (Fh, 1e4),
            (Fm, 100.0),
            (Fl, 1.0),
            (Pef, 0.8),
            (Pei, 0.8),
            (Qe, 1e-3),
        ]
        .into_iter()
        .collect();

        let bounds = [
            (Rinf, BoundConfig::power(-2.0, 5.0)),
            (Rh, BoundConfig::power(-2.0, 6.0)),
            (Rm, BoundConfig::power(-2.0, 6.0)),
            (Rl, BoundConfig::power(-2.0, 6.0)),
            (Linf, BoundConfig::power(-10.0, -2.0)),
            (Re, BoundConfig::power(0.0, 8.0)),
            (Ph, BoundConfig::linear(0.0, 1.0)),
            (Pm, BoundConfig::linear(0.0, 1.0)),
            (Pl, BoundConfig::linear(0.0, 1.0)),
            (Fh, BoundConfig::power(0.0, 7.0)),
            (Fm, BoundConfig::power(-2.0, 5.0)),
            (Fl, BoundConfig::power(-3.0, 3.0)),
            (Pef, BoundConfig::linear(0.0, 1.0)),
            (Pei, BoundConfig::linear(-1.0, 3.0)),
            (Qe, BoundConfig::power(-9.0, 2.0)),
        ]
        .into_iter()
        .collect();

        let mut variables_to_print: Vec<String> = ["file", "date/time", "model"]
            .into_iter()
            .map(String::from)
            .collect();
        variables_to_print.extend(ParamKey::ALL.iter().map(|k| k.name().to_string()));
        variables_to_print.extend(
            ["mismatch", "Res.1Hz", "R01", "Fhigh", "Flow", "mx", "mt", "m0", "Vp"]
                .into_iter()
                .map(String::from),
        );
        variables_to_print.extend(default_checkpoints().into_iter().map(|c| c.label));

        Self {
            params,
            bounds,
            disabled: vec![Linf],
            topology: Topology::default(),
            negative_rinf: false,
            gaussian_prior: false,
            variables_to_print,
        }
    }
}

impl Session {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let file = File::open(path)
            .map_err(|e| AppError::new(2, format!("Failed to open session '{}': {e}", path.display())))?;
        let session: Session = serde_json::from_reader(file)
            .map_err(|e| AppError::new(2, format!("Invalid session JSON '{}': {e}", path.display())))?;
        session.validate()?;
        Ok(session)
    }

    /// Load `path` when given, the built-in session otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, AppError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let file = File::create(path)
            .map_err(|e| AppError::new(2, format!("Failed to create session '{}': {e}", path.display())))?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| AppError::new(2, format!("Failed to write session JSON: {e}")))
    }

    /// Every parameter key must have a value.
    pub fn validate(&self) -> Result<(), AppError> {
        self.params.require(&ParamKey::ALL)?;
        Ok(())
    }

    pub fn fit_bounds(&self) -> FitBounds {
        FitBounds::from_config(&self.bounds)
    }

    pub fn disabled_set(&self) -> DisabledSet {
        self.disabled.iter().copied().collect()
    }

    /// Overlay recovered values; the negative flag is replaced when known.
    pub fn apply_recovered(&mut self, params: &ParameterSet, negative_rinf: Option<bool>) {
        self.params = self.params.merged(params);
        if let Some(flag) = negative_rinf {
            self.negative_rinf = flag;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_session_is_complete() {
        let s = Session::default();
        s.validate().unwrap();
        let bounds = s.fit_bounds();
        for key in ParamKey::ALL {
            let (lo, hi) = bounds.get(key).unwrap();
            assert!(lo < hi, "{key}");
            let v = s.params.get(key).unwrap();
            assert!(v >= lo && v <= hi, "{key} = {v} outside [{lo}, {hi}]");
        }
        assert_eq!(bounds.get(ParamKey::Pei).unwrap(), (f64::NEG_INFINITY, f64::INFINITY));
        assert_eq!(s.variables_to_print[0], "file");
        assert!(s.disabled_set().contains(ParamKey::Linf));
    }

    #[test]
    fn session_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut s = Session::default();
        s.topology = Topology::Series;
        s.gaussian_prior = true;
        s.save(&path).unwrap();

        assert_eq!(Session::load(&path).unwrap(), s);
    }

    #[test]
    fn partial_json_fills_defaults_but_needs_every_parameter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"topology": "series", "negative_rinf": true}"#).unwrap();
        let s = Session::load(&path).unwrap();
        assert_eq!(s.topology, Topology::Series);
        assert!(s.negative_rinf);
        assert_eq!(s.params, Session::default().params);

        std::fs::write(&path, r#"{"params": {"Rinf": 1.0}}"#).unwrap();
        assert_eq!(Session::load(&path).unwrap_err().exit_code(), 2);

        std::fs::write(&path, r#"{"params": {"Rx": 1.0}}"#).unwrap();
        assert_eq!(Session::load(&path).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn recovered_values_overlay_session() {
        let mut s = Session::default();
        let recovered: ParameterSet = [(ParamKey::Rh, 7.0)].into_iter().collect();
        s.apply_recovered(&recovered, Some(true));
        assert_eq!(s.params.get(ParamKey::Rh).unwrap(), 7.0);
        assert_eq!(s.params.get(ParamKey::Rm).unwrap(), 100.0);
        assert!(s.negative_rinf);

        s.apply_recovered(&ParameterSet::new(), None);
        assert!(s.negative_rinf);
    }
}
