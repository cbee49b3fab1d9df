//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and installs the log subscriber
//! - parses CLI arguments
//! - builds a `Calculator` from the session
//! - runs evaluations, fits and transforms
//! - prints summaries and writes optional exports

use std::path::Path;

use clap::Parser;
use rayon::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{
    BatchArgs, Cli, Command, EvalArgs, FitArgs, HeaderArgs, InputArgs, LockArgs, RecoverArgs,
    SessionArgs, SynthArgs, TimeDomainArgs,
};
use crate::data::{NoiseSpec, generate_spectrum, log_space};
use crate::domain::{FitMode, ParameterSet, ReportMap};
use crate::error::AppError;
use crate::fit::FitOutcome;
use crate::io::{
    FileType, IngestedSpectrum, Session, append_result_row, find_result_row, list_spectrum_files,
    load_spectrum, recover_parameters, results_row, timestamp_now, write_header, write_spectrum_csv,
    write_time_domain_csv,
};
use crate::models::CircuitModel;
use crate::report;

pub mod pipeline;

use pipeline::Calculator;

/// Entry point for the `ipfit` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match cli.command {
        Command::Eval(args) => handle_eval(args),
        Command::Fit(args) => handle_fit(args),
        Command::TimeDomain(args) => handle_time_domain(args),
        Command::Synth(args) => handle_synth(args),
        Command::Batch(args) => handle_batch(args),
        Command::Recover(args) => handle_recover(args),
        Command::Header(args) => handle_header(args),
    }
}

/// `--log-level` wins over `RUST_LOG`; both fall back to `info`.
fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(l) => EnvFilter::try_new(l).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("info"));
    // A subscriber may already be installed when embedded.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_eval(args: EvalArgs) -> Result<(), AppError> {
    let session = load_session(&args.session)?;
    let mut calc = build_calculator(&session)?;
    let ingested = load_input(&args.input)?;
    calc.set_spectrum(ingested.spectrum.clone())?;

    let result = calc.run_manual(&session.params)?;

    println!("{}", report::format_evaluation(&ingested.source, &calc));
    println!("{}", report::format_parameters(&session.params, session.negative_rinf));

    if let Some(path) = &args.time_domain {
        write_time_domain_csv(path, &result.time_domain)?;
        info!(path = %path.display(), "time-domain curve written");
    }
    if let Some(path) = &args.output {
        append_row(path, &session, &session.params, &ingested.source, &calc)?;
    }
    Ok(())
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let mut session = load_session(&args.session)?;
    session.gaussian_prior |= args.gaussian_prior;
    let mut calc = build_calculator(&session)?;
    apply_locks(&mut calc, &args.locks);
    let ingested = load_input(&args.input)?;
    calc.set_spectrum(ingested.spectrum.clone())?;

    let outcome = run_fit(&mut calc, args.mode, &session.params)?;
    calc.run_manual(&outcome.params)?;

    println!("{}", report::format_fit_outcome(&outcome));
    println!("{}", report::format_evaluation(&ingested.source, &calc));
    println!("{}", report::format_parameters(&outcome.params, session.negative_rinf));

    if let Some(path) = &args.output {
        append_row(path, &session, &outcome.params, &ingested.source, &calc)?;
    }
    if let Some(path) = &args.save_session {
        session.params = outcome.params.clone();
        session.save(path)?;
        info!(path = %path.display(), "fitted session written");
    }
    Ok(())
}

fn handle_time_domain(args: TimeDomainArgs) -> Result<(), AppError> {
    let session = load_session(&args.session)?;
    let mut calc = build_calculator(&session)?;

    let curve = match (&args.input, args.from_data) {
        (Some(path), true) => {
            let ingested = load_spectrum(path, args.file_type)?;
            calc.set_spectrum(ingested.spectrum)?;
            calc.transform_spectrum()?
        }
        (None, true) => {
            return Err(AppError::new(2, "`--from-data` requires `--input`."));
        }
        _ => {
            let out = calc.run_time_domain(&session.params)?;
            println!("{}", report::format_metrics(&out.metrics));
            out.curve
        }
    };

    println!("{}", report::format_curve(&curve));
    if let Some(path) = &args.out {
        write_time_domain_csv(path, &curve)?;
        info!(path = %path.display(), "time-domain curve written");
    }
    Ok(())
}

fn handle_synth(args: SynthArgs) -> Result<(), AppError> {
    let session = load_session(&args.session)?;
    let model = CircuitModel::new(session.topology).with_negative_rinf(session.negative_rinf);
    let freqs = log_space(args.fmin, args.fmax, args.points)?;
    let noise = (args.noise > 0.0).then_some(NoiseSpec {
        relative_sigma: args.noise,
        seed: args.seed,
    });

    let spectrum = generate_spectrum(&model, &session.params, &freqs, noise)?;
    write_spectrum_csv(&args.out, &spectrum)?;
    info!(
        path = %args.out.display(),
        points = spectrum.len(),
        model = model.name(),
        "synthetic spectrum written"
    );
    Ok(())
}

/// One successfully fitted batch file.
struct BatchEntry {
    source: String,
    outcome: FitOutcome,
    row: ReportMap,
    summary: String,
}

fn handle_batch(args: BatchArgs) -> Result<(), AppError> {
    let mut session = load_session(&args.session)?;
    session.gaussian_prior |= args.gaussian_prior;

    let files = list_spectrum_files(&args.dir, args.file_type)?;
    if files.is_empty() {
        return Err(AppError::new(
            3,
            format!(
                "No {} files found in '{}'.",
                args.file_type.display_name(),
                args.dir.display()
            ),
        ));
    }
    info!(files = files.len(), mode = ?args.mode, "batch fit started");

    // Files are independent: each gets its own calculator.
    let results: Vec<Result<BatchEntry, AppError>> = files
        .par_iter()
        .map(|path| fit_file(path, args.file_type, args.mode, &session, &args.locks))
        .collect();

    let mut failed = 0usize;
    for (path, result) in files.iter().zip(results) {
        match result {
            Ok(entry) => {
                println!(
                    "{:<32} {:<18} evals={:<5} cost={:.6e}",
                    entry.source,
                    entry.outcome.status.label(),
                    entry.outcome.evaluations,
                    entry.outcome.cost
                );
                if let Some(out) = &args.output {
                    append_result_row(out, &session.variables_to_print, &entry.row)?;
                } else {
                    println!("{}", entry.summary);
                }
            }
            Err(err) => {
                failed += 1;
                warn!(file = %path.display(), "{err}");
            }
        }
    }

    if failed == files.len() {
        return Err(AppError::new(4, format!("All {failed} batch fits failed.")));
    }
    info!(fitted = files.len() - failed, failed, "batch fit finished");
    Ok(())
}

fn fit_file(
    path: &Path,
    file_type: FileType,
    mode: FitMode,
    session: &Session,
    locks: &LockArgs,
) -> Result<BatchEntry, AppError> {
    let mut calc = build_calculator(session)?;
    apply_locks(&mut calc, locks);
    let ingested = load_spectrum(path, file_type)?;
    calc.set_spectrum(ingested.spectrum)?;

    let outcome = run_fit(&mut calc, mode, &session.params)?;
    calc.run_manual(&outcome.params)?;

    let row = results_row(
        &outcome.params,
        session.negative_rinf,
        &ingested.source,
        &timestamp_now(),
        &calc.model_report(),
    );
    Ok(BatchEntry {
        summary: report::format_parameters(&outcome.params, session.negative_rinf),
        source: ingested.source,
        outcome,
        row,
    })
}

fn handle_recover(args: RecoverArgs) -> Result<(), AppError> {
    let mut session = load_session(&args.session)?;
    let Some(row) = find_result_row(&args.output, &session.variables_to_print, &args.file)? else {
        return Err(AppError::new(
            3,
            format!("Results file '{}' has no row for '{}'.", args.output.display(), args.file),
        ));
    };

    let recovered = recover_parameters(&row);
    session.apply_recovered(&recovered.params, recovered.negative_rinf);
    session.save(&args.save_session)?;

    println!("{}", report::format_parameters(&session.params, session.negative_rinf));
    info!(
        file = %args.file,
        restored = recovered.params.len(),
        path = %args.save_session.display(),
        "session recovered"
    );
    Ok(())
}

fn handle_header(args: HeaderArgs) -> Result<(), AppError> {
    let session = load_session(&args.session)?;
    write_header(&args.output, &session.variables_to_print)
}

/// Session file (or the built-in one) with CLI overrides applied.
fn load_session(args: &SessionArgs) -> Result<Session, AppError> {
    let mut session = Session::load_or_default(args.session.as_deref())?;
    if let Some(topology) = args.topology {
        session.topology = topology;
    }
    session.negative_rinf |= args.negative_rinf;
    Ok(session)
}

pub fn build_calculator(session: &Session) -> Result<Calculator, AppError> {
    let mut calc = Calculator::with_defaults()?;
    calc.switch_topology(session.topology);
    calc.set_negative_rinf(session.negative_rinf);
    calc.set_gaussian_prior(session.gaussian_prior);
    calc.set_bounds(session.fit_bounds());
    calc.set_disabled_set(session.disabled_set());
    Ok(calc)
}

/// `--lock` / `--unlock` on top of the session's disabled keys.
fn apply_locks(calc: &mut Calculator, locks: &LockArgs) {
    for &key in &locks.lock {
        calc.set_disabled(key, true);
    }
    for &key in &locks.unlock {
        calc.set_disabled(key, false);
    }
}

fn load_input(args: &InputArgs) -> Result<IngestedSpectrum, AppError> {
    let mut ingested = load_spectrum(&args.input, args.file_type)?;
    if args.first_point.is_some() || args.last_point.is_some() {
        let lo = args.first_point.unwrap_or(0);
        let hi = args
            .last_point
            .unwrap_or_else(|| ingested.spectrum.len().saturating_sub(1));
        ingested.spectrum = ingested.spectrum.slice(lo, hi)?;
    }
    Ok(ingested)
}

fn run_fit(calc: &mut Calculator, mode: FitMode, initial: &ParameterSet) -> Result<FitOutcome, AppError> {
    let outcome = match mode {
        FitMode::Cole => calc.fit_cole(initial)?,
        FitMode::Bode => calc.fit_bode(initial)?,
    };
    if !outcome.status.converged() {
        warn!(status = outcome.status.label(), "fit stopped before convergence");
    }
    Ok(outcome)
}

fn append_row(
    path: &Path,
    session: &Session,
    params: &ParameterSet,
    source: &str,
    calc: &Calculator,
) -> Result<(), AppError> {
    let row = results_row(
        params,
        session.negative_rinf,
        source,
        &timestamp_now(),
        &calc.model_report(),
    );
    append_result_row(path, &session.variables_to_print, &row)?;
    info!(path = %path.display(), file = source, "results row appended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ParamKey, Topology};

    #[test]
    fn calculator_follows_session() {
        let mut session = Session::default();
        session.topology = Topology::Series;
        session.negative_rinf = true;
        let calc = build_calculator(&session).unwrap();
        assert_eq!(calc.model().topology(), Topology::Series);
        assert!(calc.model().negative_rinf());
        assert!(calc.engine().disabled().contains(ParamKey::Linf));
        let (lo, hi) = calc.engine().bounds().get(ParamKey::Rh).unwrap();
        assert!((lo - 1e-2).abs() < 1e-15 && (hi - 1e6).abs() < 1e-6);
    }

    #[test]
    fn lock_flags_adjust_the_session_locks() {
        let mut calc = build_calculator(&Session::default()).unwrap();
        let locks = LockArgs {
            lock: vec![ParamKey::Re, ParamKey::Qe],
            unlock: vec![ParamKey::Linf],
        };
        apply_locks(&mut calc, &locks);
        let disabled = calc.engine().disabled();
        assert!(disabled.contains(ParamKey::Re));
        assert!(disabled.contains(ParamKey::Qe));
        assert!(!disabled.contains(ParamKey::Linf));
        assert!(!disabled.contains(ParamKey::Rh));
    }

    #[test]
    fn session_overrides_apply() {
        let args = SessionArgs {
            session: None,
            topology: Some(Topology::Series),
            negative_rinf: true,
        };
        let session = load_session(&args).unwrap();
        assert_eq!(session.topology, Topology::Series);
        assert!(session.negative_rinf);
    }
}
