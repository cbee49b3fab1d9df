//! Terminal summaries of evaluations and fits.
//!
//! We keep formatting code in one place so:
//! - the model/fit code stays free of presentation
//! - output changes are localized

use crate::app::pipeline::Calculator;
use crate::domain::{ParamKey, ParameterSet, TimeDomainCurve};
use crate::fit::FitOutcome;
use crate::transform::IntegralMetrics;

/// Parameter table in canonical key order; Rinf is shown with its sign.
pub fn format_parameters(params: &ParameterSet, negative_rinf: bool) -> String {
    let mut out = String::new();
    out.push_str("Parameters:\n");
    for key in ParamKey::ALL {
        let Some(v) = params.try_get(key) else {
            continue;
        };
        let v = if key == ParamKey::Rinf && negative_rinf { -v } else { v };
        out.push_str(&format!("  {:<5} {}\n", key.name(), fmt_num(v)));
    }
    out
}

/// Solver diagnostics of one fit.
pub fn format_fit_outcome(outcome: &FitOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== ipfit - {:?} fit ===\n", outcome.mode));
    out.push_str(&format!(
        "Status: {} | evaluations={} | rejected={} | cost={:.6e}\n",
        outcome.status.label(),
        outcome.evaluations,
        outcome.rejected_evaluations,
        outcome.cost
    ));
    let free: Vec<&str> = outcome.free_keys.iter().map(|k| k.name()).collect();
    out.push_str(&format!("Free: [{}]\n", free.join(", ")));
    let locked: Vec<&str> = outcome.locked.keys().map(|k| k.name()).collect();
    out.push_str(&format!("Locked: [{}]\n", locked.join(", ")));
    out
}

/// Summary of the calculator's last evaluation.
pub fn format_evaluation(source: &str, calc: &Calculator) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== ipfit - {} ===\n", calc.model().name()));
    if !source.is_empty() {
        out.push_str(&format!("File: {source}\n"));
    }
    out.push_str(&format!(
        "Points: n={} | f=[{}, {}] Hz\n",
        calc.spectrum().len(),
        calc.spectrum().min_freq().map(fmt_num).unwrap_or_default(),
        calc.spectrum().max_freq().map(fmt_num).unwrap_or_default(),
    ));
    if calc.model().negative_rinf() {
        out.push_str("Rinf: negative\n");
    }

    let Some(v) = calc.latest_variables() else {
        out.push_str("(no evaluation yet)\n");
        return out;
    };
    out.push_str(&format!(
        "Mismatch={} | Res.1Hz={} | R01={}\n",
        fmt_num(v.mismatch),
        fmt_num(v.res_01hz),
        fmt_num(v.r01)
    ));

    out.push_str("\nSecondary:\n");
    out.push_str(&format_pairs(
        calc.latest_secondaries().iter().map(|(k, v)| (k.as_str(), *v)),
    ));

    if let Some(metrics) = calc.latest_metrics() {
        out.push_str("\nTime domain:\n");
        out.push_str(&format_metrics(metrics));
    }
    if let Some(c) = calc.latest_chargeability() {
        out.push_str("\nChargeability:\n");
        out.push_str(&format_pairs(c.entries().into_iter()));
    }
    out
}

pub fn format_metrics(metrics: &IntegralMetrics) -> String {
    format_pairs(metrics.iter())
}

/// Short description of a time-domain curve.
pub fn format_curve(curve: &TimeDomainCurve) -> String {
    let Some(&end) = curve.time.last() else {
        return "Time domain: empty curve\n".to_string();
    };
    format!(
        "Time domain: samples={} | t=[0, {}] s | V_down(0)={}\n",
        curve.time.len(),
        fmt_num(end),
        curve.volt_down.first().copied().map(fmt_num).unwrap_or_default()
    )
}

fn format_pairs<'a>(pairs: impl Iterator<Item = (&'a str, f64)>) -> String {
    let mut out = String::new();
    for (label, v) in pairs {
        out.push_str(&format!("  {label:<8} {}\n", fmt_num(v)));
    }
    out
}

fn fmt_num(v: f64) -> String {
    let a = v.abs();
    if v == 0.0 || (1e-3..1e5).contains(&a) {
        format!("{v:.4}")
    } else {
        format!("{v:.4e}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Spectrum, Topology};
    use crate::math::log_space;
    use crate::models::circuit::tests::sample_params;

    #[test]
    fn numbers_switch_to_scientific_outside_range() {
        assert_eq!(fmt_num(12.5), "12.5000");
        assert_eq!(fmt_num(0.0), "0.0000");
        assert_eq!(fmt_num(1e-6), "1.0000e-6");
        assert_eq!(fmt_num(-2e6), "-2.0000e6");
    }

    #[test]
    fn parameters_show_signed_rinf() {
        let params: ParameterSet = [(ParamKey::Rinf, 10.0), (ParamKey::Fh, 100.0)].into_iter().collect();
        let text = format_parameters(&params, true);
        assert!(text.contains("Rinf  -10.0000"));
        assert!(text.contains("Fh    100.0000"));
        assert!(!text.contains("Rh "));
    }

    #[test]
    fn evaluation_summary_lists_every_section() {
        let mut calc = Calculator::with_defaults().unwrap();
        calc.switch_topology(Topology::Series);
        let freq = log_space(0.1, 1e4, 10).unwrap();
        let z = calc.model().run_model(&sample_params(), &freq, None).unwrap().total;
        calc.set_spectrum(Spectrum::from_complex(freq, &z).unwrap()).unwrap();

        let before = format_evaluation("a.z", &calc);
        assert!(before.contains("(no evaluation yet)"));

        calc.run_manual(&sample_params()).unwrap();
        let text = format_evaluation("a.z", &calc);
        assert!(text.starts_with("=== ipfit - Series Circuit ==="));
        for needle in ["File: a.z", "Mismatch=", "Secondary:", "pCl", "R01", "V(1.6s)", "Chargeability:", "Vp"] {
            assert!(text.contains(needle), "missing {needle}");
        }
    }
}
