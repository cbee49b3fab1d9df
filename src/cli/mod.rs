//! Command-line parsing for the `ipfit` impedance circuit fitter.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! modeling/fitting code; dispatch lives in `app`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{FitMode, ParamKey, Topology};
use crate::io::FileType;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "ipfit", version, about = "Equivalent-circuit fitting of induced-polarization spectra")]
pub struct Cli {
    /// Log filter (e.g. `info`, `debug`, `ip_circuits=trace`); overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Evaluate the session parameters against a spectrum.
    Eval(EvalArgs),
    /// Fit the circuit model to a spectrum.
    Fit(FitArgs),
    /// Compute the time-domain pulse response.
    #[command(name = "timedomain")]
    TimeDomain(TimeDomainArgs),
    /// Write a synthetic spectrum generated from the session parameters.
    Synth(SynthArgs),
    /// Fit every spectrum file of one type in a directory.
    Batch(BatchArgs),
    /// Restore the parameters saved for a file into a session JSON.
    Recover(RecoverArgs),
    /// Append the variables-to-print list as a header row.
    Header(HeaderArgs),
}

/// Session and circuit options shared by every command.
#[derive(Debug, Args, Clone)]
pub struct SessionArgs {
    /// Session JSON (parameters, bounds, locked keys, output columns).
    #[arg(long, env = "IPFIT_SESSION")]
    pub session: Option<PathBuf>,

    /// Override the session topology.
    #[arg(long, value_enum)]
    pub topology: Option<Topology>,

    /// Treat Rinf as negative.
    #[arg(long)]
    pub negative_rinf: bool,
}

/// Spectrum file selection.
#[derive(Debug, Args, Clone)]
pub struct InputArgs {
    /// Spectrum file.
    #[arg(short = 'i', long, value_name = "FILE")]
    pub input: PathBuf,

    /// Spectrum file format.
    #[arg(long, value_enum, env = "IPFIT_FILE_TYPE", default_value_t = FileType::NewZ)]
    pub file_type: FileType,

    /// First spectrum point to use (0-based, inclusive).
    #[arg(long)]
    pub first_point: Option<usize>,

    /// Last spectrum point to use (0-based, inclusive).
    #[arg(long)]
    pub last_point: Option<usize>,
}

/// Per-run changes to the session's locked keys.
#[derive(Debug, Args, Clone, Default)]
pub struct LockArgs {
    /// Hold these keys at their start value (e.g. `--lock Re,Qe`).
    #[arg(long, value_name = "KEY", value_delimiter = ',')]
    pub lock: Vec<ParamKey>,

    /// Let these keys vary even if the session locks them.
    #[arg(long, value_name = "KEY", value_delimiter = ',')]
    pub unlock: Vec<ParamKey>,
}

#[derive(Debug, Args)]
pub struct EvalArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub session: SessionArgs,

    /// Results CSV to append one row to.
    #[arg(short = 'o', long, env = "IPFIT_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Write the time-domain curve to this CSV.
    #[arg(long, value_name = "CSV")]
    pub time_domain: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct FitArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub session: SessionArgs,

    /// Residual formulation.
    #[arg(long, value_enum, default_value_t = FitMode::Cole)]
    pub mode: FitMode,

    #[command(flatten)]
    pub locks: LockArgs,

    /// Enable the Gaussian prior and frequency-ordering penalty.
    #[arg(long)]
    pub gaussian_prior: bool,

    /// Save the fitted parameters as a session JSON.
    #[arg(long, value_name = "JSON")]
    pub save_session: Option<PathBuf>,

    /// Results CSV to append one row to.
    #[arg(short = 'o', long, env = "IPFIT_OUTPUT")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct TimeDomainArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Transform a measured spectrum instead of the model.
    #[arg(long, requires = "input")]
    pub from_data: bool,

    /// Spectrum file (required with `--from-data`).
    #[arg(short = 'i', long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    #[arg(long, value_enum, env = "IPFIT_FILE_TYPE", default_value_t = FileType::NewZ)]
    pub file_type: FileType,

    /// Output CSV (`time,v_down,v_up`).
    #[arg(long, value_name = "CSV")]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SynthArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    #[arg(long, default_value_t = 0.01)]
    pub fmin: f64,

    #[arg(long, default_value_t = 1e5)]
    pub fmax: f64,

    /// Number of log-spaced frequencies.
    #[arg(short = 'n', long, default_value_t = 50)]
    pub points: usize,

    /// Relative Gaussian noise (0.01 = 1%).
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    /// Random seed for the noise.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Output CSV (`freq,z_real,z_imag`).
    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,
}

#[derive(Debug, Args)]
pub struct BatchArgs {
    /// Directory holding the spectrum files.
    #[arg(long, value_name = "DIR")]
    pub dir: PathBuf,

    #[arg(long, value_enum, env = "IPFIT_FILE_TYPE", default_value_t = FileType::NewZ)]
    pub file_type: FileType,

    #[command(flatten)]
    pub session: SessionArgs,

    #[arg(long, value_enum, default_value_t = FitMode::Cole)]
    pub mode: FitMode,

    #[command(flatten)]
    pub locks: LockArgs,

    #[arg(long)]
    pub gaussian_prior: bool,

    /// Results CSV to append one row per file to.
    #[arg(short = 'o', long, env = "IPFIT_OUTPUT")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RecoverArgs {
    /// File name saved in the first results column.
    #[arg(long, value_name = "NAME")]
    pub file: String,

    #[command(flatten)]
    pub session: SessionArgs,

    /// Results CSV to search.
    #[arg(short = 'o', long, env = "IPFIT_OUTPUT")]
    pub output: PathBuf,

    /// Session JSON to write.
    #[arg(long, value_name = "JSON")]
    pub save_session: PathBuf,
}

#[derive(Debug, Args)]
pub struct HeaderArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    #[arg(short = 'o', long, env = "IPFIT_OUTPUT")]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fit_arguments_parse() {
        let cli = Cli::try_parse_from([
            "ipfit", "fit", "-i", "a.z", "--file-type", "oldz", "--mode", "bode", "--topology", "series",
            "--first-point", "2",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.input.file_type, FileType::OldZ);
        assert_eq!(args.mode, FitMode::Bode);
        assert_eq!(args.session.topology, Some(Topology::Series));
        assert_eq!(args.input.first_point, Some(2));
        assert_eq!(args.input.last_point, None);
    }

    #[test]
    fn lock_lists_parse_into_keys() {
        let cli = Cli::try_parse_from(["ipfit", "fit", "-i", "a.z", "--lock", "Re,Qe", "--unlock", "Linf"]).unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.locks.lock, vec![ParamKey::Re, ParamKey::Qe]);
        assert_eq!(args.locks.unlock, vec![ParamKey::Linf]);

        assert!(Cli::try_parse_from(["ipfit", "fit", "-i", "a.z", "--lock", "Rx"]).is_err());
    }

    #[test]
    fn from_data_requires_an_input() {
        assert!(Cli::try_parse_from(["ipfit", "timedomain", "--from-data"]).is_err());
        assert!(Cli::try_parse_from(["ipfit", "timedomain", "--from-data", "-i", "x.csv"]).is_ok());
    }
}
