//! Calculator: the stateful orchestrator shared by every CLI command.
//!
//! It owns the measured spectrum, the active circuit model, the fit engine
//! and the time-domain transform, and remembers what the last evaluation
//! produced so a results row can be assembled afterwards:
//!
//! spectrum -> manual evaluation / fit -> time domain -> chargeability -> report
//!
//! Front-ends only decide what to print or write.

use tracing::{debug, info};

use crate::domain::{
    CalculationResult, DisabledSet, FitBounds, FitMode, FitVariables, ParamKey, ParameterSet,
    ReportMap, ReportValue, Spectrum, TimeDomainCurve, Topology,
};
use crate::error::{ModelError, ModelResult};
use crate::fit::{FitEngine, FitOutcome, FitSettings};
use crate::models::{C64, CircuitModel, SecondaryParameters, without_electrode};
use crate::transform::{
    Chargeability, ChargeabilityWindows, IntegralMetrics, TimeDomainOutput, TimeDomainSettings,
    TimeDomainTransform, chargeability,
};

/// Frequency at which `Res.1Hz` and `R01` are read.
pub const REFERENCE_FREQ: f64 = 0.1;

/// Everything one manual evaluation leaves behind for reporting.
#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    secondary: SecondaryParameters,
    metrics: IntegralMetrics,
    variables: FitVariables,
    chargeability: Chargeability,
}

#[derive(Debug, Clone)]
pub struct Calculator {
    spectrum: Spectrum,
    model: CircuitModel,
    engine: FitEngine,
    transform: TimeDomainTransform,
    windows: ChargeabilityWindows,
    last: Option<Snapshot>,
}

impl Calculator {
    pub fn new(
        fit_settings: FitSettings,
        time_domain: TimeDomainSettings,
        windows: ChargeabilityWindows,
    ) -> ModelResult<Self> {
        // Placeholder until a measured spectrum is loaded.
        let freq = vec![1.0, 10.0, 100.0, 1000.0, 10000.0];
        let spectrum = Spectrum::new(freq, vec![0.0; 5], vec![0.0; 5])?;
        Ok(Self {
            spectrum,
            model: CircuitModel::default(),
            engine: FitEngine::new(fit_settings),
            transform: TimeDomainTransform::new(time_domain)?,
            windows,
            last: None,
        })
    }

    /// Calculator with every setting at its default.
    pub fn with_defaults() -> ModelResult<Self> {
        Self::new(
            FitSettings::default(),
            TimeDomainSettings::default(),
            ChargeabilityWindows::default(),
        )
    }

    pub fn set_spectrum(&mut self, spectrum: Spectrum) -> ModelResult<()> {
        if spectrum.is_empty() {
            return Err(ModelError::EmptySpectrum);
        }
        debug!(points = spectrum.len(), "spectrum loaded");
        self.spectrum = spectrum;
        self.last = None;
        Ok(())
    }

    pub fn spectrum(&self) -> &Spectrum {
        &self.spectrum
    }

    pub fn model(&self) -> &CircuitModel {
        &self.model
    }

    pub fn engine(&self) -> &FitEngine {
        &self.engine
    }

    pub fn set_negative_rinf(&mut self, state: bool) {
        self.model = self.model.with_negative_rinf(state);
    }

    pub fn set_gaussian_prior(&mut self, state: bool) {
        self.engine.set_gaussian_prior(state);
    }

    pub fn set_bounds(&mut self, bounds: FitBounds) {
        self.engine.set_bounds(bounds);
    }

    pub fn set_disabled(&mut self, key: ParamKey, disabled: bool) {
        self.engine.set_disabled(key, disabled);
    }

    pub fn set_disabled_set(&mut self, disabled: DisabledSet) {
        self.engine.set_disabled_set(disabled);
    }

    /// Rebind the model topology. The negative-Rinf flag carries over; the
    /// previous secondary parameters do not.
    pub fn switch_topology(&mut self, topology: Topology) {
        self.model = CircuitModel::new(topology).with_negative_rinf(self.model.negative_rinf());
        self.last = None;
        info!(model = self.model.name(), "topology switched");
    }

    /// Evaluate `params` against the loaded spectrum and refresh every
    /// reported quantity.
    pub fn run_manual(&mut self, params: &ParameterSet) -> ModelResult<CalculationResult> {
        let freq = self.spectrum.freq().to_vec();
        let measured = self.spectrum.impedance();

        let out = self.model.run_model(params, &freq, None)?;
        let rock_z = self.model.estimate_rock(params, &freq, &measured)?;

        let (special_freq, special_z, r01) = self.special_points(params, &out.secondary)?;
        let time_domain = self.transform.run_time_domain(&self.model, params)?;
        let charge = chargeability(
            &time_domain.curve.time,
            &time_domain.curve.volt_down,
            &self.windows,
        );

        let mismatch = measured
            .iter()
            .zip(&out.total)
            .map(|(e, z)| (e - z).norm_sqr())
            .sum::<f64>();
        let at_reference = self.model.run_model(params, &[REFERENCE_FREQ], Some(&out.secondary))?;
        let res_01hz = at_reference.total[0].re.abs();

        let variables = FitVariables {
            mismatch,
            res_01hz,
            r01,
            f_high: self.spectrum.max_freq().unwrap_or(f64::NAN),
            f_low: self.spectrum.min_freq().unwrap_or(f64::NAN),
        };

        info!(
            model = self.model.name(),
            mismatch,
            res_01hz,
            r01,
            "manual evaluation"
        );

        self.last = Some(Snapshot {
            secondary: out.secondary,
            metrics: time_domain.metrics,
            variables,
            chargeability: charge,
        });

        Ok(CalculationResult {
            main_freq: freq,
            main_z: out.total,
            rock_z,
            special_freq,
            special_z,
            time_domain: time_domain.curve,
        })
    }

    /// `[Fh, Fm, Fl]` on the full model plus the 0.1 Hz point with the
    /// electrode neutralized (imaginary part dropped).
    fn special_points(
        &self,
        params: &ParameterSet,
        secondary: &SecondaryParameters,
    ) -> ModelResult<(Vec<f64>, Vec<C64>, f64)> {
        let mut freq = vec![
            params.get(ParamKey::Fh)?,
            params.get(ParamKey::Fm)?,
            params.get(ParamKey::Fl)?,
        ];
        let mut z = self.model.run_model(params, &freq, Some(secondary))?.total;

        let neutral = without_electrode(params);
        let reference = self.model.run_model(&neutral, &[REFERENCE_FREQ], Some(secondary))?;
        let r01 = reference.total[0].re;

        freq.push(REFERENCE_FREQ);
        z.push(C64::new(r01, 0.0));
        Ok((freq, z, r01))
    }

    pub fn fit_cole(&mut self, initial: &ParameterSet) -> ModelResult<FitOutcome> {
        self.fit(FitMode::Cole, initial)
    }

    pub fn fit_bode(&mut self, initial: &ParameterSet) -> ModelResult<FitOutcome> {
        self.fit(FitMode::Bode, initial)
    }

    pub fn fit(&mut self, mode: FitMode, initial: &ParameterSet) -> ModelResult<FitOutcome> {
        self.engine.fit(&self.model, &self.spectrum, mode, initial)
    }

    /// Initial parameters of the most recent fit.
    pub fn recover_previous_fit(&self) -> Option<&ParameterSet> {
        self.engine.previous_initial()
    }

    /// Time-domain response straight from the loaded spectrum.
    pub fn transform_spectrum(&self) -> ModelResult<TimeDomainCurve> {
        self.transform.transform_spectrum(&self.spectrum)
    }

    /// Model-path time-domain response; needs no spectrum.
    pub fn run_time_domain(&self, params: &ParameterSet) -> ModelResult<TimeDomainOutput> {
        self.transform.run_time_domain(&self.model, params)
    }

    /// Secondary parameters and `R01` of the last evaluation.
    pub fn latest_secondaries(&self) -> Vec<(String, f64)> {
        let Some(last) = &self.last else {
            return Vec::new();
        };
        let mut out: Vec<(String, f64)> = last
            .secondary
            .entries()
            .into_iter()
            .map(|(label, v)| (label.to_string(), v))
            .collect();
        out.push(("R01".to_string(), last.variables.r01));
        out
    }

    pub fn latest_metrics(&self) -> Option<&IntegralMetrics> {
        self.last.as_ref().map(|s| &s.metrics)
    }

    pub fn latest_variables(&self) -> Option<FitVariables> {
        self.last.as_ref().map(|s| s.variables)
    }

    pub fn latest_chargeability(&self) -> Option<Chargeability> {
        self.last.as_ref().map(|s| s.chargeability)
    }

    /// Model name plus everything the last evaluation reported.
    ///
    /// Parameters, timestamp and file name are added by the exporter.
    pub fn model_report(&self) -> ReportMap {
        let mut map = ReportMap::new();
        map.insert("model".into(), ReportValue::from(self.model.name()));

        let Some(last) = &self.last else {
            return map;
        };
        let v = last.variables;
        for (label, value) in [
            ("mismatch", v.mismatch),
            ("Res.1Hz", v.res_01hz),
            ("Fhigh", v.f_high),
            ("Flow", v.f_low),
            ("R01", v.r01),
        ] {
            map.insert(label.into(), value.into());
        }
        for (label, value) in last.secondary.entries() {
            map.insert(label.into(), value.into());
        }
        for (label, value) in last.metrics.iter() {
            map.insert(label.into(), value.into());
        }
        for (label, value) in last.chargeability.entries() {
            map.insert(label.into(), value.into());
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::log_space;
    use crate::models::circuit::tests::sample_params;

    fn calculator_with_model_spectrum(topology: Topology) -> Calculator {
        let mut calc = Calculator::with_defaults().unwrap();
        calc.switch_topology(topology);
        let freq = log_space(0.01, 1e5, 40).unwrap();
        let z = calc.model().run_model(&sample_params(), &freq, None).unwrap().total;
        calc.set_spectrum(Spectrum::from_complex(freq, &z).unwrap()).unwrap();
        calc
    }

    #[test]
    fn manual_run_on_own_spectrum_has_zero_mismatch() {
        let mut calc = calculator_with_model_spectrum(Topology::Series);
        let result = calc.run_manual(&sample_params()).unwrap();

        assert_eq!(result.main_z.len(), 40);
        assert_eq!(result.rock_z.len(), 40);
        assert_eq!(result.special_freq, vec![100.0, 10.0, 1.0, 0.1]);
        assert_eq!(result.special_z[3].im, 0.0);

        let v = calc.latest_variables().unwrap();
        assert!(v.mismatch < 1e-18);
        assert!((v.f_high - 1e5).abs() < 1e-6);
        assert!((v.f_low - 0.01).abs() < 1e-12);
        assert_eq!(result.special_z[3].re, v.r01);
        assert!(v.res_01hz > 0.0);
    }

    #[test]
    fn reference_point_ignores_electrode() {
        let mut calc = calculator_with_model_spectrum(Topology::Parallel);
        calc.run_manual(&sample_params()).unwrap();
        let r01 = calc.latest_variables().unwrap().r01;

        let other_electrode = sample_params().with(ParamKey::Re, 5.0).with(ParamKey::Qe, 0.01);
        calc.run_manual(&other_electrode).unwrap();
        assert_eq!(calc.latest_variables().unwrap().r01, r01);
    }

    #[test]
    fn switching_topology_keeps_flag_and_drops_snapshot() {
        let mut calc = calculator_with_model_spectrum(Topology::Parallel);
        calc.set_negative_rinf(true);
        calc.run_manual(&sample_params()).unwrap();
        assert_eq!(calc.latest_secondaries().len(), 17);

        calc.switch_topology(Topology::Series);
        assert!(calc.model().negative_rinf());
        assert_eq!(calc.model().topology(), Topology::Series);
        assert!(calc.latest_secondaries().is_empty());
        assert_eq!(calc.model_report().len(), 1);
    }

    #[test]
    fn report_merges_every_source() {
        let mut calc = calculator_with_model_spectrum(Topology::Series);
        calc.run_manual(&sample_params()).unwrap();
        let report = calc.model_report();

        assert_eq!(report["model"], ReportValue::from("Series Circuit"));
        for label in ["mismatch", "Res.1Hz", "Fhigh", "Flow", "R01", "Qh", "pCl", "V(.1ms)", "mx", "Vp"] {
            assert!(report.contains_key(label), "missing {label}");
        }
        // 5 variables + model + 16 secondaries + 9 checkpoints + 4 chargeability.
        assert_eq!(report.len(), 35);
    }

    #[test]
    fn empty_spectrum_is_rejected() {
        let mut calc = Calculator::with_defaults().unwrap();
        let empty = Spectrum::new(vec![], vec![], vec![]).unwrap();
        assert_eq!(calc.set_spectrum(empty), Err(ModelError::EmptySpectrum));
    }

    #[test]
    fn fit_remembers_its_start() {
        let mut calc = calculator_with_model_spectrum(Topology::Series);
        calc.set_disabled_set(ParamKey::ALL.into_iter().collect());
        assert!(calc.recover_previous_fit().is_none());

        let outcome = calc.fit_cole(&sample_params()).unwrap();
        assert!(outcome.free_keys.is_empty());
        assert_eq!(calc.recover_previous_fit(), Some(&sample_params()));
    }
}
