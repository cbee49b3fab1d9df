//! Results and curve exports.
//!
//! The results file is an append-only CSV: one row per evaluation, columns
//! chosen by the session's variables-to-print list. A previously saved row can
//! be found again by its first column (the spectrum file name) to restore
//! the parameters it was produced with.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::Path;

use chrono::Local;

use crate::domain::{ParamKey, ParameterSet, ReportMap, ReportValue, Spectrum, TimeDomainCurve};
use crate::error::AppError;
use crate::fit::wrap_pei;

/// `date/time` column format.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Merge parameters, timestamp, file name and a calculator report into one row.
///
/// Rinf is written negative when the negative-Rinf flag is set.
pub fn results_row(
    params: &ParameterSet,
    negative_rinf: bool,
    file: &str,
    timestamp: &str,
    report: &ReportMap,
) -> ReportMap {
    let mut row = ReportMap::new();
    for (key, value) in params.iter() {
        let value = if key == ParamKey::Rinf && negative_rinf {
            -value
        } else {
            value
        };
        row.insert(key.name().to_string(), value.into());
    }
    row.insert("date/time".into(), ReportValue::from(timestamp));
    row.insert("file".into(), ReportValue::from(file));
    row.extend(report.iter().map(|(k, v)| (k.clone(), v.clone())));
    row
}

/// Append the variables-to-print list as a header row.
pub fn write_header(path: &Path, variables: &[String]) -> Result<(), AppError> {
    let mut writer = append_writer(path)?;
    writer
        .write_record(variables)
        .map_err(|e| AppError::new(2, format!("Failed to write results header: {e}")))?;
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush results file: {e}")))
}

/// Append one results row; keys missing from `row` print as empty cells.
pub fn append_result_row(path: &Path, variables: &[String], row: &ReportMap) -> Result<(), AppError> {
    let cells: Vec<String> = variables
        .iter()
        .map(|key| row.get(key).map(ReportValue::to_string).unwrap_or_default())
        .collect();

    let mut writer = append_writer(path)?;
    writer
        .write_record(&cells)
        .map_err(|e| AppError::new(2, format!("Failed to write results row: {e}")))?;
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush results file: {e}")))
}

/// Last row whose first column equals `head`, keyed by `variables`.
pub fn find_result_row(
    path: &Path,
    variables: &[String],
    head: &str,
) -> Result<Option<BTreeMap<String, String>>, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open results file '{}': {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut found = None;
    for record in reader.records() {
        let record = record.map_err(|e| AppError::new(2, format!("Failed to read results file: {e}")))?;
        if record.get(0).map(str::trim) == Some(head) {
            found = Some(record);
        }
    }

    Ok(found.map(|record| {
        variables
            .iter()
            .cloned()
            .zip(record.iter().map(str::to_string))
            .collect()
    }))
}

/// Parameters restored from a saved row.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredParameters {
    pub params: ParameterSet,
    /// `Some(true)` when the saved Rinf was negative; `None` without Rinf.
    pub negative_rinf: Option<bool>,
}

/// Pull parameter values out of a saved row.
///
/// Rinf is restored as a magnitude plus the negative flag; Pei is wrapped
/// into `[-1, 3)`. Empty or unparsable cells are skipped.
pub fn recover_parameters(row: &BTreeMap<String, String>) -> RecoveredParameters {
    let mut params = ParameterSet::new();
    let mut negative_rinf = None;

    for key in ParamKey::ALL {
        let Some(value) = row.get(key.name()).and_then(|s| s.trim().parse::<f64>().ok()) else {
            continue;
        };
        let value = match key {
            ParamKey::Rinf => {
                negative_rinf = Some(value < 0.0);
                value.abs()
            }
            ParamKey::Pei => wrap_pei(value),
            _ => value,
        };
        params.set(key, value);
    }

    RecoveredParameters {
        params,
        negative_rinf,
    }
}

/// Write a time-domain curve as `time,v_down,v_up`.
pub fn write_time_domain_csv(path: &Path, curve: &TimeDomainCurve) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create time-domain CSV '{}': {e}", path.display())))?;
    let err = |e: csv::Error| AppError::new(2, format!("Failed to write time-domain CSV: {e}"));

    writer.write_record(["time", "v_down", "v_up"]).map_err(err)?;
    for ((t, down), up) in curve.time.iter().zip(&curve.volt_down).zip(&curve.volt_up) {
        writer
            .write_record([t.to_string(), down.to_string(), up.to_string()])
            .map_err(err)?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush time-domain CSV: {e}")))
}

/// Write a spectrum as `freq,z_real,z_imag` (readable back as `FileType::Csv`).
pub fn write_spectrum_csv(path: &Path, spectrum: &Spectrum) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create spectrum CSV '{}': {e}", path.display())))?;
    let err = |e: csv::Error| AppError::new(2, format!("Failed to write spectrum CSV: {e}"));

    writer.write_record(["freq", "z_real", "z_imag"]).map_err(err)?;
    for i in 0..spectrum.len() {
        writer
            .write_record([
                spectrum.freq()[i].to_string(),
                spectrum.z_real()[i].to_string(),
                spectrum.z_imag()[i].to_string(),
            ])
            .map_err(err)?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush spectrum CSV: {e}")))
}

fn append_writer(path: &Path) -> Result<csv::Writer<File>, AppError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open results file '{}': {e}", path.display())))?;
    Ok(csv::WriterBuilder::new().flexible(true).from_writer(file))
}
