//! Spectrum ingest from instrument files.
//!
//! Each supported instrument format is a fixed layout: a number of preamble
//! lines to skip, a field separator and the column indices of frequency,
//! real and imaginary impedance.
//!
//! Design goals:
//! - **Code-page decoding**: instrument files are Windows-1252 (`°`, `µ` in
//!   headers); CSV files are UTF-8. Undecodable bytes never abort a load
//! - **Row-level validation**: bad rows are skipped and reported
//! - **Clear failures**: missing columns are a contract error (exit code 2),
//!   a file without usable rows is empty data (exit code 3)

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use csv::StringRecord;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::Spectrum;
use crate::error::AppError;

/// Supported spectrum file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Current `.z` export: tab separated with a 128-line preamble.
    #[default]
    #[value(name = "newz")]
    NewZ,
    /// Legacy `.z` export: comma separated with an 11-line preamble.
    #[value(name = "oldz")]
    OldZ,
    /// Gamry `.DTA`: whitespace separated with a 98-line preamble.
    Gamry,
    /// Plain CSV with a `freq,z_real,z_imag` header.
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Byte(u8),
    Whitespace,
}

/// Fixed layout of a headerless instrument file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLayout {
    pub extension: &'static str,
    pub encoding: &'static Encoding,
    pub separator: Separator,
    pub skip_rows: usize,
    pub freq_column: usize,
    pub z_real_column: usize,
    pub z_imag_column: usize,
}

impl FileLayout {
    fn required_width(&self) -> usize {
        self.freq_column.max(self.z_real_column).max(self.z_imag_column) + 1
    }
}

impl FileType {
    pub fn display_name(self) -> &'static str {
        match self {
            FileType::NewZ => "*.Z",
            FileType::OldZ => "Old .Z",
            FileType::Gamry => "Gamry",
            FileType::Csv => "CSV",
        }
    }

    pub fn layout(self) -> FileLayout {
        match self {
            FileType::NewZ => FileLayout {
                extension: "z",
                encoding: WINDOWS_1252,
                separator: Separator::Byte(b'\t'),
                skip_rows: 128,
                freq_column: 0,
                z_real_column: 4,
                z_imag_column: 5,
            },
            FileType::OldZ => FileLayout {
                extension: "z",
                encoding: WINDOWS_1252,
                separator: Separator::Byte(b','),
                skip_rows: 11,
                freq_column: 0,
                z_real_column: 4,
                z_imag_column: 5,
            },
            FileType::Gamry => FileLayout {
                extension: "dta",
                encoding: WINDOWS_1252,
                separator: Separator::Whitespace,
                skip_rows: 98,
                freq_column: 2,
                z_real_column: 3,
                z_imag_column: 4,
            },
            // Columns are resolved from the header.
            FileType::Csv => FileLayout {
                extension: "csv",
                encoding: UTF_8,
                separator: Separator::Byte(b','),
                skip_rows: 0,
                freq_column: 0,
                z_real_column: 1,
                z_imag_column: 2,
            },
        }
    }

    /// Case-insensitive extension check.
    pub fn matches_path(self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(self.layout().extension))
    }
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    /// 1-based line number in the file.
    pub line: usize,
    pub message: String,
}

/// Ingest output: the spectrum plus what was skipped on the way.
#[derive(Debug, Clone)]
pub struct IngestedSpectrum {
    pub spectrum: Spectrum,
    /// File name without directories; the key of saved result rows.
    pub source: String,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

/// Read and parse a spectrum file.
pub fn load_spectrum(path: &Path, file_type: FileType) -> Result<IngestedSpectrum, AppError> {
    let bytes = fs::read(path)
        .map_err(|e| AppError::new(2, format!("Failed to open spectrum file '{}': {e}", path.display())))?;
    let text = decode_text(&bytes, file_type);

    let mut ingested = parse_spectrum(&text, file_type)
        .map_err(|e| AppError::new(e.exit_code(), format!("{}: {e}", path.display())))?;
    ingested.source = file_name(path);

    for err in &ingested.row_errors {
        warn!(file = %ingested.source, line = err.line, "{}", err.message);
    }
    debug!(
        file = %ingested.source,
        rows_read = ingested.rows_read,
        rows_used = ingested.rows_used,
        "spectrum ingested"
    );
    Ok(ingested)
}

/// Decode raw file bytes with the format's code page.
///
/// A byte-order mark overrides the layout's encoding.
pub fn decode_text(bytes: &[u8], file_type: FileType) -> Cow<'_, str> {
    let (text, used, had_errors) = file_type.layout().encoding.decode(bytes);
    if had_errors {
        warn!(encoding = used.name(), "undecodable bytes replaced");
    }
    text
}

/// Parse already-decoded file content.
pub fn parse_spectrum(text: &str, file_type: FileType) -> Result<IngestedSpectrum, AppError> {
    let layout = file_type.layout();
    let rows = split_rows(text, &layout)?;

    let (columns, body) = match file_type {
        FileType::Csv => {
            let Some((header_line, header)) = rows.first() else {
                return Err(AppError::new(3, "Spectrum file is empty."));
            };
            (resolve_csv_columns(*header_line, header)?, &rows[1..])
        }
        _ => (
            [layout.freq_column, layout.z_real_column, layout.z_imag_column],
            &rows[..],
        ),
    };

    let width = columns.iter().max().map_or(0, |c| c + 1);
    if !body.is_empty() && body.iter().all(|(_, r)| r.len() < width) {
        return Err(AppError::new(
            2,
            format!(
                "File does not contain the required columns ({} needs at least {width}).",
                file_type.display_name()
            ),
        ));
    }

    let mut freq = Vec::new();
    let mut z_real = Vec::new();
    let mut z_imag = Vec::new();
    let mut row_errors = Vec::new();

    for (line, record) in body {
        match parse_row(record, columns) {
            Ok([f, re, im]) => {
                freq.push(f);
                z_real.push(re);
                z_imag.push(im);
            }
            Err(message) => row_errors.push(RowError { line: *line, message }),
        }
    }

    let rows_used = freq.len();
    if rows_used == 0 {
        return Err(AppError::new(3, "No valid spectrum rows found."));
    }

    Ok(IngestedSpectrum {
        spectrum: Spectrum::new(freq, z_real, z_imag)?,
        source: String::new(),
        row_errors,
        rows_read: body.len(),
        rows_used,
    })
}

/// Every file in `dir` whose extension matches `file_type`, sorted by name.
pub fn list_spectrum_files(dir: &Path, file_type: FileType) -> Result<Vec<PathBuf>, AppError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| AppError::new(2, format!("Failed to read directory '{}': {e}", dir.display())))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| AppError::new(2, format!("Failed to read directory entry: {e}")))?
            .path();
        if path.is_file() && file_type.matches_path(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Split the text after the preamble into `(line number, fields)` rows.
fn split_rows(text: &str, layout: &FileLayout) -> Result<Vec<(usize, Vec<String>)>, AppError> {
    let lines = text
        .lines()
        .enumerate()
        .skip(layout.skip_rows)
        .filter(|(_, l)| !l.trim().is_empty());

    match layout.separator {
        Separator::Whitespace => Ok(lines
            .map(|(idx, l)| (idx + 1, l.split_whitespace().map(str::to_string).collect()))
            .collect()),
        Separator::Byte(sep) => {
            let mut rows = Vec::new();
            for (idx, l) in lines {
                let mut reader = csv::ReaderBuilder::new()
                    .has_headers(false)
                    .flexible(true)
                    .delimiter(sep)
                    .trim(csv::Trim::All)
                    .from_reader(l.as_bytes());
                let mut record = StringRecord::new();
                let read = reader
                    .read_record(&mut record)
                    .map_err(|e| AppError::new(2, format!("Line {}: parse error: {e}", idx + 1)))?;
                if read {
                    rows.push((idx + 1, record.iter().map(str::to_string).collect()));
                }
            }
            Ok(rows)
        }
    }
}

fn resolve_csv_columns(line: usize, header: &[String]) -> Result<[usize; 3], AppError> {
    let map: HashMap<String, usize> = header
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect();

    let mut out = [0; 3];
    for (slot, name) in out.iter_mut().zip(["freq", "z_real", "z_imag"]) {
        *slot = *map
            .get(name)
            .ok_or_else(|| AppError::new(2, format!("Line {line}: missing required column `{name}`.")))?;
    }
    Ok(out)
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a BOM.
    name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase()
}

fn parse_row(record: &[String], columns: [usize; 3]) -> Result<[f64; 3], String> {
    let mut out = [0.0; 3];
    for (slot, (col, name)) in out.iter_mut().zip(columns.into_iter().zip(["freq", "Z'", "Z''"])) {
        let raw = record
            .get(col)
            .ok_or_else(|| format!("Row has {} fields; column {col} ({name}) missing.", record.len()))?;
        let value: f64 = raw
            .trim()
            .parse()
            .map_err(|_| format!("Invalid {name} value '{raw}'."))?;
        if !value.is_finite() {
            return Err(format!("Non-finite {name} value '{raw}'."));
        }
        *slot = value;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preamble(n: usize) -> String {
        (0..n).map(|i| format!("header line {i}\n")).collect()
    }

    #[test]
    fn old_z_reads_columns_after_preamble() {
        let mut text = preamble(11);
        text.push_str("1000,0,0,0,50.5,-3.25\n");
        text.push_str("100,0,0,0,60,-5\n");
        text.push_str("bad,0,0,0,1,1\n");
        text.push_str("10,0,0,0,70,-8\n");

        let out = parse_spectrum(&text, FileType::OldZ).unwrap();
        assert_eq!(out.spectrum.freq(), &[1000.0, 100.0, 10.0]);
        assert_eq!(out.spectrum.z_real(), &[50.5, 60.0, 70.0]);
        assert_eq!(out.spectrum.z_imag(), &[-3.25, -5.0, -8.0]);
        assert_eq!(out.rows_read, 4);
        assert_eq!(out.rows_used, 3);
        assert_eq!(out.row_errors.len(), 1);
        assert_eq!(out.row_errors[0].line, 14);
    }

    #[test]
    fn new_z_is_tab_separated() {
        let mut text = preamble(128);
        text.push_str("10\t0\t0\t0\t12.0\t-1.5\n");
        let out = parse_spectrum(&text, FileType::NewZ).unwrap();
        assert_eq!(out.spectrum.len(), 1);
        assert_eq!(out.spectrum.z_real(), &[12.0]);
    }

    #[test]
    fn gamry_splits_on_any_whitespace() {
        let mut text = preamble(98);
        text.push_str("\tPT1   0.5\t1000  20.0   -2.0 extra\n");
        let out = parse_spectrum(&text, FileType::Gamry).unwrap();
        assert_eq!(out.spectrum.freq(), &[1000.0]);
        assert_eq!(out.spectrum.z_imag(), &[-2.0]);
    }

    #[test]
    fn csv_resolves_columns_by_header() {
        let text = "\u{feff}Z_imag,freq,z_real\n-1,10,5\n-2,1,6\n";
        let out = parse_spectrum(text, FileType::Csv).unwrap();
        assert_eq!(out.spectrum.freq(), &[10.0, 1.0]);
        assert_eq!(out.spectrum.z_real(), &[5.0, 6.0]);
        assert_eq!(out.spectrum.z_imag(), &[-1.0, -2.0]);

        let err = parse_spectrum("freq,z_real\n1,2\n", FileType::Csv).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn narrow_file_is_a_contract_error() {
        let mut text = preamble(11);
        text.push_str("1,2,3\n4,5,6\n");
        let err = parse_spectrum(&text, FileType::OldZ).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn file_without_valid_rows_is_empty_data() {
        let mut text = preamble(11);
        text.push_str("a,b,c,d,e,f\n");
        let err = parse_spectrum(&text, FileType::OldZ).unwrap_err();
        assert_eq!(err.exit_code(), 3);

        let err = parse_spectrum(&preamble(3), FileType::OldZ).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn instrument_files_decode_as_windows_1252() {
        let text = decode_text(b"Temp \xb0C, I \xb5A", FileType::NewZ);
        assert_eq!(text, "Temp \u{b0}C, I \u{b5}A");
        let text = decode_text(b"\xb0", FileType::Gamry);
        assert_eq!(text, "\u{b0}");
        // CSV stays UTF-8.
        let text = decode_text("5 \u{b5}A".as_bytes(), FileType::Csv);
        assert_eq!(text, "5 \u{b5}A");
        assert!(decode_text(b"\xb0", FileType::Csv).contains('\u{fffd}'));
    }

    #[test]
    fn legacy_bytes_do_not_abort_a_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.z");
        let mut bytes = preamble(10).into_bytes();
        bytes.extend_from_slice(b"Temp \xb0C\n");
        bytes.extend_from_slice(b"5,0,0,0,1.5,-0.5\n");
        fs::write(&path, bytes).unwrap();

        let out = load_spectrum(&path, FileType::OldZ).unwrap();
        assert_eq!(out.source, "sample.z");
        assert_eq!(out.spectrum.freq(), &[5.0]);
    }

    #[test]
    fn directory_listing_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.Z", "a.z", "c.DTA", "d.csv"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let files = list_spectrum_files(dir.path(), FileType::NewZ).unwrap();
        let names: Vec<String> = files.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["a.z", "b.Z"]);
        assert_eq!(list_spectrum_files(dir.path(), FileType::Gamry).unwrap().len(), 1);
    }

    #[test]
    fn display_names_match_instrument_labels() {
        assert_eq!(FileType::NewZ.display_name(), "*.Z");
        assert_eq!(FileType::OldZ.display_name(), "Old .Z");
        assert!(FileType::Csv.matches_path(Path::new("x.CSV")));
    }
}
