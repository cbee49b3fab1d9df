//! Equivalent-circuit evaluation for the series and parallel topologies.
//!
//! Both topologies share the same outer structure:
//!
//! ```text
//! Z = Z_L(Linf) + Z_core + (Re ∥ CPE_e)
//! ```
//!
//! and differ in how the high/mid/low arcs form `Z_core`:
//!
//! - series:   `Z_core = Rinf + (Rh ∥ CPE_h) + (Rm ∥ CPE_m) + (Rl ∥ CPE_l)`
//! - parallel: `Z_core = line_h ∥ ((line_m ∥ line_l) ∥ R0)` where each line is
//!   a derived resistance in series with a derived CPE.
//!
//! The "rock" is the core without the high arc: mid + low arcs (series) or
//! `(line_m ∥ line_l) ∥ R0` (parallel).

use serde::Serialize;

use crate::domain::{ParamKey, ParameterSet, Topology};
use crate::error::{ModelError, ModelResult};
use crate::models::elements::{C64, cpe, inductor, parallel, q_from_f0, rq_arc};

/// Electrode resistance that makes the electrode arc negligible.
pub const NEUTRAL_RE: f64 = 1e8;
/// Electrode CPE coefficient that makes the electrode arc negligible.
pub const NEUTRAL_QE: f64 = 1e2;

/// Quantities derived deterministically from the primary parameters.
///
/// `q*` are the arc CPE coefficients, `p*` the parallel-equivalent line
/// values, `r0` the total series resistance and `c*` nominal capacitances
/// (reported only, not used by the impedance formulas).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SecondaryParameters {
    pub qh: f64,
    pub qm: f64,
    pub ql: f64,
    pub r0: f64,
    pub prh: f64,
    pub pqh: f64,
    pub prm: f64,
    pub pqm: f64,
    pub prl: f64,
    pub pql: f64,
    pub ch: f64,
    pub pch: f64,
    pub cm: f64,
    pub pcm: f64,
    pub cl: f64,
    pub pcl: f64,
}

impl SecondaryParameters {
    /// Derive from (already sign-adjusted) primary parameters.
    pub fn derive(par: &ParameterSet) -> ModelResult<Self> {
        let rinf = par.get(ParamKey::Rinf)?;
        let rh = par.get(ParamKey::Rh)?;
        let rm = par.get(ParamKey::Rm)?;
        let rl = par.get(ParamKey::Rl)?;
        let fh = par.get(ParamKey::Fh)?;
        let fm = par.get(ParamKey::Fm)?;
        let fl = par.get(ParamKey::Fl)?;

        let qh = q_from_f0(rh, fh, par.get(ParamKey::Ph)?)?;
        let qm = q_from_f0(rm, fm, par.get(ParamKey::Pm)?)?;
        let ql = q_from_f0(rl, fl, par.get(ParamKey::Pl)?)?;

        // Running totals of the series stack preceding each arc.
        let s_h = rinf + rh;
        let s_m = s_h + rm;
        let s_l = s_m + rl;

        let two_pi = 2.0 * std::f64::consts::PI;
        let ch = 1.0 / (two_pi * fh * rh);
        let cm = 1.0 / (two_pi * fm * rm);
        let cl = 1.0 / (two_pi * fl * rl);

        Ok(Self {
            qh,
            qm,
            ql,
            r0: s_l,
            prh: rinf * s_h / rh,
            pqh: qh * (rh / s_h).powi(2),
            prm: s_h * s_m / rm,
            pqm: qm * (rm / s_m).powi(2),
            prl: s_m * s_l / rl,
            pql: ql * (rl / s_l).powi(2),
            ch,
            pch: ch * (rh / s_h).powi(2),
            cm,
            pcm: cm * (rm / s_m).powi(2),
            cl,
            pcl: cl * (rl / s_l).powi(2),
        })
    }

    /// Labelled values for reports and exports.
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("Qh", self.qh),
            ("Qm", self.qm),
            ("Ql", self.ql),
            ("R0", self.r0),
            ("pRh", self.prh),
            ("pQh", self.pqh),
            ("pRm", self.prm),
            ("pQm", self.pqm),
            ("pRl", self.prl),
            ("pQl", self.pql),
            ("Ch", self.ch),
            ("pCh", self.pch),
            ("Cm", self.cm),
            ("pCm", self.pcm),
            ("Cl", self.cl),
            ("pCl", self.pcl),
        ]
    }
}

/// Full-circuit and rock impedance for one frequency array.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub total: Vec<C64>,
    pub rock: Vec<C64>,
    pub secondary: SecondaryParameters,
}

/// Circuit evaluator for one topology.
///
/// Stateless apart from its two configuration flags: derived parameters are
/// returned to the caller, who may pass them back in to skip re-derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CircuitModel {
    topology: Topology,
    negative_rinf: bool,
}

impl CircuitModel {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            negative_rinf: false,
        }
    }

    pub fn with_negative_rinf(mut self, negative_rinf: bool) -> Self {
        self.negative_rinf = negative_rinf;
        self
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn negative_rinf(&self) -> bool {
        self.negative_rinf
    }

    pub fn name(&self) -> &'static str {
        self.topology.display_name()
    }

    /// Primary parameters with the Rinf sign flip applied.
    pub fn effective_parameters(&self, params: &ParameterSet) -> ModelResult<ParameterSet> {
        if self.negative_rinf {
            let rinf = params.get(ParamKey::Rinf)?;
            Ok(params.with(ParamKey::Rinf, -rinf))
        } else {
            Ok(params.clone())
        }
    }

    pub fn secondary(&self, params: &ParameterSet) -> ModelResult<SecondaryParameters> {
        SecondaryParameters::derive(&self.effective_parameters(params)?)
    }

    /// Rock (electrode- and high-arc-free) impedance.
    ///
    /// `cached` must only be supplied when it was derived from the same
    /// parameters; `None` re-derives.
    pub fn run_rock(
        &self,
        params: &ParameterSet,
        freqs: &[f64],
        cached: Option<&SecondaryParameters>,
    ) -> ModelResult<(Vec<C64>, SecondaryParameters)> {
        let par = self.effective_parameters(params)?;
        let sec = match cached {
            Some(sec) => *sec,
            None => SecondaryParameters::derive(&par)?,
        };
        let rock = self.rock_impedance(&par, &sec, freqs)?;
        Ok((rock, sec))
    }

    /// Full-circuit impedance together with the rock impedance.
    pub fn run_model(
        &self,
        params: &ParameterSet,
        freqs: &[f64],
        cached: Option<&SecondaryParameters>,
    ) -> ModelResult<ModelOutput> {
        let par = self.effective_parameters(params)?;
        let sec = match cached {
            Some(sec) => *sec,
            None => SecondaryParameters::derive(&par)?,
        };
        let rock = self.rock_impedance(&par, &sec, freqs)?;

        let linf = par.get(ParamKey::Linf)?;
        let (qe, pef, pei, re) = electrode_values(&par)?;

        let mut total = Vec::with_capacity(freqs.len());
        match self.topology {
            Topology::Series => {
                let rinf = par.get(ParamKey::Rinf)?;
                let rh = par.get(ParamKey::Rh)?;
                let ph = par.get(ParamKey::Ph)?;
                for (&f, &z_rock) in freqs.iter().zip(&rock) {
                    let z_inf = inductor(f, linf)? + rinf;
                    let z_arc_h = rq_arc(f, rh, sec.qh, ph)?;
                    let z_arc_e = parallel(cpe(f, qe, pef, pei)?, C64::new(re, 0.0))?;
                    total.push(z_inf + z_arc_h + z_rock + z_arc_e);
                }
            }
            Topology::Parallel => {
                let ph = par.get(ParamKey::Ph)?;
                for (&f, &z_rock) in freqs.iter().zip(&rock) {
                    let z_line_h = sec.prh + cpe(f, sec.pqh, ph, ph)?;
                    let z_core = parallel(z_line_h, z_rock)?;
                    let z_arc_e = parallel(cpe(f, qe, pef, pei)?, C64::new(re, 0.0))?;
                    total.push(inductor(f, linf)? + z_core + z_arc_e);
                }
            }
        }

        Ok(ModelOutput {
            total,
            rock,
            secondary: sec,
        })
    }

    /// Empirical rock impedance: the measured spectrum minus the high-arc and
    /// electrode-arc contributions predicted by `params`.
    pub fn estimate_rock(
        &self,
        params: &ParameterSet,
        freqs: &[f64],
        impedance: &[C64],
    ) -> ModelResult<Vec<C64>> {
        if impedance.len() != freqs.len() {
            return Err(ModelError::ShapeMismatch {
                what: "impedance vs frequency",
                expected: freqs.len(),
                actual: impedance.len(),
            });
        }

        let rh = params.get(ParamKey::Rh)?;
        let ph = params.get(ParamKey::Ph)?;
        let qh = q_from_f0(rh, params.get(ParamKey::Fh)?, ph)?;
        let (qe, pef, pei, re) = electrode_values(params)?;

        freqs
            .iter()
            .zip(impedance)
            .map(|(&f, &z)| {
                let z_arc_e = parallel(cpe(f, qe, pef, pei)?, C64::new(re, 0.0))?;
                let z_arc_h = rq_arc(f, rh, qh, ph)?;
                Ok(z - (z_arc_h + z_arc_e - rh))
            })
            .collect()
    }

    fn rock_impedance(
        &self,
        par: &ParameterSet,
        sec: &SecondaryParameters,
        freqs: &[f64],
    ) -> ModelResult<Vec<C64>> {
        let pm = par.get(ParamKey::Pm)?;
        let pl = par.get(ParamKey::Pl)?;

        match self.topology {
            Topology::Series => {
                let rm = par.get(ParamKey::Rm)?;
                let rl = par.get(ParamKey::Rl)?;
                freqs
                    .iter()
                    .map(|&f| Ok(rq_arc(f, rm, sec.qm, pm)? + rq_arc(f, rl, sec.ql, pl)?))
                    .collect()
            }
            Topology::Parallel => freqs
                .iter()
                .map(|&f| {
                    let z_line_m = sec.prm + cpe(f, sec.pqm, pm, pm)?;
                    let z_line_l = sec.prl + cpe(f, sec.pql, pl, pl)?;
                    let z_lines = parallel(z_line_m, z_line_l)?;
                    parallel(z_lines, C64::new(sec.r0, 0.0))
                })
                .collect(),
        }
    }
}

/// Copy of `params` with the electrode arc pushed out of the picture.
pub fn without_electrode(params: &ParameterSet) -> ParameterSet {
    params
        .with(ParamKey::Re, NEUTRAL_RE)
        .with(ParamKey::Qe, NEUTRAL_QE)
}

fn electrode_values(par: &ParameterSet) -> ModelResult<(f64, f64, f64, f64)> {
    Ok((
        par.get(ParamKey::Qe)?,
        par.get(ParamKey::Pef)?,
        par.get(ParamKey::Pei)?,
        par.get(ParamKey::Re)?,
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::math::log_space;

    pub(crate) fn sample_params() -> ParameterSet {
        [
            (ParamKey::Rinf, 10.0),
            (ParamKey::Rh, 20.0),
            (ParamKey::Rm, 30.0),
            (ParamKey::Rl, 40.0),
            (ParamKey::Linf, 0.001),
            (ParamKey::Re, 50.0),
            (ParamKey::Ph, 0.8),
            (ParamKey::Pm, 0.6),
            (ParamKey::Pl, 0.4),
            (ParamKey::Fh, 100.0),
            (ParamKey::Fm, 10.0),
            (ParamKey::Fl, 1.0),
            (ParamKey::Pef, 0.7),
            (ParamKey::Pei, 0.5),
            (ParamKey::Qe, 0.9),
        ]
        .into_iter()
        .collect()
    }

    fn close(a: C64, b: C64) -> bool {
        (a - b).norm() <= 1e-9 * (1.0 + b.norm())
    }

    #[test]
    fn both_topologies_return_finite_arrays() {
        let freqs = log_space(1.0, 1000.0, 10).unwrap();
        let params = sample_params();
        for topology in [Topology::Series, Topology::Parallel] {
            let out = CircuitModel::new(topology).run_model(&params, &freqs, None).unwrap();
            assert_eq!(out.total.len(), freqs.len());
            assert_eq!(out.rock.len(), freqs.len());
            assert!(out.total.iter().all(|z| z.re.is_finite() && z.im.is_finite()));
            assert!(out.rock.iter().all(|z| z.re.is_finite() && z.im.is_finite()));
        }
    }

    #[test]
    fn secondary_parameters_follow_the_series_stack() {
        let sec = SecondaryParameters::derive(&sample_params()).unwrap();
        assert!((sec.r0 - 100.0).abs() < 1e-12);
        assert!((sec.prh - 10.0 * 30.0 / 20.0).abs() < 1e-12);
        assert!((sec.prm - 30.0 * 60.0 / 30.0).abs() < 1e-12);
        assert!((sec.prl - 60.0 * 100.0 / 40.0).abs() < 1e-12);
        assert!((sec.pqm - sec.qm * 0.25).abs() < 1e-15);
        assert_eq!(sec.entries().len(), 16);
    }

    #[test]
    fn cached_secondary_matches_recomputed() {
        let freqs = log_space(0.1, 1e4, 7).unwrap();
        let params = sample_params();
        let model = CircuitModel::new(Topology::Parallel);
        let fresh = model.run_model(&params, &freqs, None).unwrap();
        let reused = model
            .run_model(&params, &freqs, Some(&fresh.secondary))
            .unwrap();
        assert_eq!(fresh, reused);
    }

    #[test]
    fn series_rock_is_sum_of_mid_and_low_arcs() {
        let params = sample_params();
        let sec = SecondaryParameters::derive(&params).unwrap();
        let (rock, _) = CircuitModel::new(Topology::Series)
            .run_rock(&params, &[5.0], None)
            .unwrap();
        let expected = rq_arc(5.0, 30.0, sec.qm, 0.6).unwrap() + rq_arc(5.0, 40.0, sec.ql, 0.4).unwrap();
        assert!(close(rock[0], expected));
    }

    #[test]
    fn parallel_rock_tends_to_r0_at_low_frequency() {
        // With every line blocked by its CPE at very low frequency, only R0 remains.
        let params = sample_params();
        let (rock, sec) = CircuitModel::new(Topology::Parallel)
            .run_rock(&params, &[1e-9], None)
            .unwrap();
        assert!((rock[0].re - sec.r0).abs() / sec.r0 < 1e-2);
    }

    #[test]
    fn negative_rinf_flips_sign_before_derivation() {
        let params = sample_params();
        let model = CircuitModel::new(Topology::Series).with_negative_rinf(true);
        let sec = model.secondary(&params).unwrap();
        assert!((sec.r0 - 80.0).abs() < 1e-12);

        let pos = CircuitModel::new(Topology::Series)
            .run_model(&params, &[1.0], None)
            .unwrap();
        let neg = model.run_model(&params, &[1.0], None).unwrap();
        assert!(((pos.total[0] - neg.total[0]).re - 20.0).abs() < 1e-9);
    }

    #[test]
    fn missing_key_is_reported() {
        let mut params = ParameterSet::new();
        params.set(ParamKey::Rinf, 1.0);
        let err = CircuitModel::new(Topology::Series)
            .run_model(&params, &[1.0], None)
            .unwrap_err();
        assert!(matches!(err, ModelError::MissingParameter(_)));
    }

    #[test]
    fn zero_frequency_is_rejected_by_cpe() {
        let err = CircuitModel::new(Topology::Parallel)
            .run_rock(&sample_params(), &[0.0, 1.0], None)
            .unwrap_err();
        assert!(matches!(err, ModelError::CpeSingularAtZero { .. }));
    }

    #[test]
    fn estimate_rock_recovers_the_series_core() {
        let freqs = log_space(0.5, 500.0, 6).unwrap();
        let params = sample_params();
        let model = CircuitModel::new(Topology::Series);
        let out = model.run_model(&params, &freqs, None).unwrap();
        let est = model.estimate_rock(&params, &freqs, &out.total).unwrap();
        for ((&f, z_est), z_rock) in freqs.iter().zip(&est).zip(&out.rock) {
            let expected = *z_rock + inductor(f, 0.001).unwrap() + 10.0 + 20.0;
            assert!(close(*z_est, expected));
        }
    }

    #[test]
    fn estimate_rock_rejects_shape_mismatch() {
        let params = sample_params();
        let err = CircuitModel::new(Topology::Parallel)
            .estimate_rock(&params, &[1.0, 2.0, 3.0], &[C64::new(1.0, 0.0); 2])
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { expected: 3, actual: 2, .. }));
    }

    #[test]
    fn neutral_electrode_is_negligible() {
        let params = without_electrode(&sample_params());
        let z_e = parallel(
            cpe(0.1, NEUTRAL_QE, 0.7, 0.5).unwrap(),
            C64::new(NEUTRAL_RE, 0.0),
        )
        .unwrap();
        assert!(z_e.norm() < 0.1);
        assert_eq!(params.get(ParamKey::Re).unwrap(), NEUTRAL_RE);
    }
}
