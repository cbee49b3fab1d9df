//! Bounded least-squares fit of a circuit model to a measured spectrum.
//!
//! Given:
//! - a circuit model (topology + negative-Rinf flag)
//! - a measured spectrum
//! - an initial parameter set, the per-key bounds and the disabled keys
//!
//! we:
//! - split keys into free (optimized) and locked (echoed back unchanged)
//! - move the free keys into scaled space (log10 / ×10)
//! - minimize the weighted Cole or Bode residual, optionally with a Gaussian
//!   prior around the start point and a penalty on `Fh ≥ Fm ≥ Fl` violations
//! - wrap `Pei` into `[-1, 3)` before returning
//!
//! A trial point at which the model cannot be evaluated does not abort the
//! fit: its residual is replaced by a constant penalty vector.
//!
//! When free keys finish on a bound they did not start on, the fit is solved
//! again in two stages: first with those keys held at their start values,
//! then with every key free from the staged point. The lower-cost solution
//! wins.

use tracing::{debug, info};

use crate::domain::{DisabledSet, FitBounds, FitMode, ParamKey, ParameterSet, Spectrum};
use crate::error::{ModelError, ModelResult};
use crate::fit::residuals::{dynamic_weight, gaussian_prior, model_residual, order_penalty};
use crate::fit::scaling::{descale, scale, scaled_bounds, wrap_pei};
use crate::fit::solver::{SolverOptions, SolverStatus, least_squares};
use crate::models::CircuitModel;

/// Numeric settings of the fit engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSettings {
    /// `base` in the dynamic weight `Π (1 + base · exp(exponent · P))`.
    pub base_weight: f64,
    pub exponent_weight: f64,
    pub max_evaluations: usize,
    /// Value filling the residual of a trial point the model rejects.
    pub penalty_value: f64,
    /// Multiplier on the frequency-ordering violation (before prior weight).
    pub invalid_order_scale: f64,
    /// Prior sigma as a multiple of the scaled bound width.
    pub gaussian_fraction: f64,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    pub cole_prior_weight: f64,
    pub bode_prior_weight: f64,
    /// Re-solve when free keys end pinned on a bound.
    pub bound_restart: bool,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            base_weight: 3.0,
            exponent_weight: -15.0,
            max_evaluations: 2000,
            penalty_value: 1e6,
            invalid_order_scale: 1e4,
            gaussian_fraction: 5.0,
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            cole_prior_weight: 1e6,
            bode_prior_weight: 400.0,
            bound_restart: true,
        }
    }
}

impl FitSettings {
    pub fn prior_weight(&self, mode: FitMode) -> f64 {
        match mode {
            FitMode::Cole => self.cole_prior_weight,
            FitMode::Bode => self.bode_prior_weight,
        }
    }

    fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            max_evaluations: self.max_evaluations,
            ftol: self.ftol,
            xtol: self.xtol,
            gtol: self.gtol,
        }
    }
}

/// Result of one fit call.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    /// Locked and fitted values merged, `Pei` wrapped.
    pub params: ParameterSet,
    /// The locked keys as supplied.
    pub locked: ParameterSet,
    pub free_keys: Vec<ParamKey>,
    pub mode: FitMode,
    /// `½‖r‖²` of the full residual (prior included) at the solution.
    pub cost: f64,
    pub evaluations: usize,
    /// Trial points whose evaluation was replaced by the penalty vector.
    pub rejected_evaluations: usize,
    pub status: SolverStatus,
}

#[derive(Debug, Clone, Default)]
pub struct FitEngine {
    settings: FitSettings,
    bounds: FitBounds,
    disabled: DisabledSet,
    gaussian_prior: bool,
    previous_initial: Option<ParameterSet>,
}

impl FitEngine {
    pub fn new(settings: FitSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &FitSettings {
        &self.settings
    }

    pub fn set_bounds(&mut self, bounds: FitBounds) {
        self.bounds = bounds;
    }

    pub fn bounds(&self) -> &FitBounds {
        &self.bounds
    }

    pub fn set_disabled(&mut self, key: ParamKey, disabled: bool) {
        self.disabled.set(key, disabled);
    }

    pub fn set_disabled_set(&mut self, disabled: DisabledSet) {
        self.disabled = disabled;
    }

    pub fn disabled(&self) -> &DisabledSet {
        &self.disabled
    }

    pub fn set_gaussian_prior(&mut self, enabled: bool) {
        self.gaussian_prior = enabled;
    }

    pub fn gaussian_prior(&self) -> bool {
        self.gaussian_prior
    }

    /// Initial parameters of the most recent fit (one-step undo).
    pub fn previous_initial(&self) -> Option<&ParameterSet> {
        self.previous_initial.as_ref()
    }

    /// Fit with the mode's default prior weight.
    pub fn fit(
        &mut self,
        model: &CircuitModel,
        spectrum: &Spectrum,
        mode: FitMode,
        initial: &ParameterSet,
    ) -> ModelResult<FitOutcome> {
        let prior_weight = self.settings.prior_weight(mode);
        self.fit_with_prior_weight(model, spectrum, mode, initial, prior_weight)
    }

    pub fn fit_with_prior_weight(
        &mut self,
        model: &CircuitModel,
        spectrum: &Spectrum,
        mode: FitMode,
        initial: &ParameterSet,
        prior_weight: f64,
    ) -> ModelResult<FitOutcome> {
        if spectrum.is_empty() {
            return Err(ModelError::EmptySpectrum);
        }
        self.previous_initial = Some(initial.clone());

        let free_keys: Vec<ParamKey> = initial
            .keys()
            .filter(|k| !self.disabled.contains(*k))
            .collect();
        let locked: ParameterSet = initial
            .iter()
            .filter(|(k, _)| self.disabled.contains(*k))
            .collect();

        let x0 = scale(&free_keys, initial)?;
        let (lower, upper) = scaled_bounds(&free_keys, &self.bounds)?;
        for (i, &key) in free_keys.iter().enumerate() {
            if !(x0[i] >= lower[i] && x0[i] <= upper[i]) {
                let (lo, hi) = self.bounds.get(key)?;
                return Err(ModelError::InfeasibleStart {
                    key,
                    value: initial.get(key)?,
                    lower: lo,
                    upper: hi,
                });
            }
        }

        // Surface setup errors (missing keys, bad start) before the solve.
        let start = self.evaluate(model, spectrum, mode, &free_keys, &locked, &x0, &x0, &lower, &upper, prior_weight)?;
        let expected_len = start.len();

        info!(
            mode = ?mode,
            topology = model.name(),
            free = free_keys.len(),
            locked = locked.len(),
            prior = self.gaussian_prior,
            "fit started"
        );

        let opts = self.settings.solver_options();
        let mut rejected = 0usize;
        let mut objective = |x: &[f64]| {
            let res = self.evaluate(model, spectrum, mode, &free_keys, &locked, x, &x0, &lower, &upper, prior_weight);
            residual_or_penalty(res, expected_len, self.settings.penalty_value, &mut rejected)
        };
        let mut report = least_squares(&mut objective, &x0, &lower, &upper, &opts)?;
        let mut evaluations = report.evaluations;

        let pinned = if self.settings.bound_restart {
            pinned_at_bound(&report.x, &x0, &lower, &upper)
        } else {
            Vec::new()
        };
        if !pinned.is_empty() {
            let keys: Vec<ParamKey> = pinned.iter().map(|&j| free_keys[j]).collect();
            info!(pinned = ?keys, cost = report.cost, "free keys ended on a bound; re-solving");

            let moving: Vec<usize> = (0..x0.len()).filter(|j| !pinned.contains(j)).collect();
            let pick = |v: &[f64]| moving.iter().map(|&j| v[j]).collect::<Vec<f64>>();
            let embed = |y: &[f64]| {
                let mut x = x0.clone();
                for (c, &j) in moving.iter().enumerate() {
                    x[j] = y[c];
                }
                x
            };

            let staged = least_squares(
                |y: &[f64]| objective(&embed(y)),
                &pick(&x0),
                &pick(&lower),
                &pick(&upper),
                &opts,
            )?;
            let polished = least_squares(&mut objective, &embed(&staged.x), &lower, &upper, &opts)?;
            evaluations += staged.evaluations + polished.evaluations;

            debug!(first = report.cost, staged = staged.cost, polished = polished.cost, "re-solve costs");
            if polished.cost < report.cost {
                report = polished;
            }
        }

        let mut params = locked.merged(&descale(&free_keys, &report.x));
        if let Some(pei) = params.try_get(ParamKey::Pei) {
            params.set(ParamKey::Pei, wrap_pei(pei));
        }

        info!(
            evaluations,
            iterations = report.iterations,
            rejected,
            cost = report.cost,
            status = report.status.label(),
            "fit finished"
        );

        Ok(FitOutcome {
            params,
            locked,
            free_keys,
            mode,
            cost: report.cost,
            evaluations,
            rejected_evaluations: rejected,
            status: report.status,
        })
    }

    /// Weighted model residual (no prior, no penalty) for `params`.
    pub fn model_residual(
        &self,
        model: &CircuitModel,
        spectrum: &Spectrum,
        mode: FitMode,
        params: &ParameterSet,
    ) -> ModelResult<Vec<f64>> {
        let out = model.run_model(params, spectrum.freq(), None)?;
        let weight = dynamic_weight(params, self.settings.base_weight, self.settings.exponent_weight)?;
        model_residual(mode, &out.total, spectrum, weight)
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate(
        &self,
        model: &CircuitModel,
        spectrum: &Spectrum,
        mode: FitMode,
        free_keys: &[ParamKey],
        locked: &ParameterSet,
        x: &[f64],
        x0: &[f64],
        lower: &[f64],
        upper: &[f64],
        prior_weight: f64,
    ) -> ModelResult<Vec<f64>> {
        let full = locked.merged(&descale(free_keys, x));
        let mut res = self.model_residual(model, spectrum, mode, &full)?;

        if self.gaussian_prior {
            res.extend(gaussian_prior(
                x,
                x0,
                lower,
                upper,
                prior_weight,
                self.settings.gaussian_fraction,
            ));
            res.extend(order_penalty(&full, self.settings.invalid_order_scale, prior_weight)?);
        }
        Ok(res)
    }
}

/// Indices whose value ended on a finite bound it did not start on.
pub(crate) fn pinned_at_bound(x: &[f64], x0: &[f64], lower: &[f64], upper: &[f64]) -> Vec<usize> {
    (0..x.len())
        .filter(|&j| {
            let ends_on = |bound: f64| bound.is_finite() && x[j] == bound && x0[j] != bound;
            ends_on(lower[j]) || ends_on(upper[j])
        })
        .collect()
}

/// Collapse an evaluation failure into a constant penalty vector.
pub(crate) fn residual_or_penalty(
    res: ModelResult<Vec<f64>>,
    len: usize,
    penalty: f64,
    rejected: &mut usize,
) -> Vec<f64> {
    match res {
        Ok(v) if v.len() == len => v,
        Ok(v) => {
            *rejected += 1;
            debug!(expected = len, actual = v.len(), "residual length changed; using penalty");
            vec![penalty; len]
        }
        Err(err) => {
            *rejected += 1;
            debug!(error = %err, "trial point rejected; using penalty");
            vec![penalty; len]
        }
    }
}
