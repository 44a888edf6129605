use std::{io::Write, path::Path};

use crate::{
    datatypes::{FitnessValue, ParameterVector, ReportRecord, DIM},
    error::WaterbombError,
};

/// Trailing field written when the solve produced no usable snap-through
pub const NON_CONVERGENCE_SENTINEL: &str = "-inf";

const DESIGN_MATCH_TOLERANCE: f64 = 1e-9;

/// Appends one record to the report, creating the file if needed
pub fn append_record(report_file: &Path, record: &ReportRecord) -> Result<(), WaterbombError> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(report_file)?;
    writeln!(file, "{record}")?;

    Ok(())
}

/// Number of non-empty lines in the report. A missing report counts as empty.
pub fn count_records(report_file: &Path) -> Result<usize, WaterbombError> {
    if !report_file.exists() {
        return Ok(0);
    }

    let contents = std::fs::read_to_string(report_file)?;
    Ok(contents.lines().filter(|l| !l.trim().is_empty()).count())
}

/// Reads the last non-empty line of the report
fn last_line(report_file: &Path) -> Result<String, WaterbombError> {
    let contents = match std::fs::read_to_string(report_file) {
        Ok(c) => c,
        Err(err) => {
            return Err(WaterbombError::Parse(format!(
                "Unable to read report {}: {err}",
                report_file.display()
            )))
        }
    };

    match contents.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(line) => Ok(line.to_owned()),
        None => Err(WaterbombError::Parse(format!(
            "Report {} has no records",
            report_file.display()
        ))),
    }
}

/// Reads the text after the last tab of the last record
pub fn last_field(report_file: &Path) -> Result<String, WaterbombError> {
    let line = last_line(report_file)?;

    let field = match line.rfind('\t') {
        Some(idx) => &line[idx + 1..],
        None => line.as_str(),
    };

    Ok(field.trim().to_owned())
}

/// Design named by the leading fields of the last record
pub fn last_design(report_file: &Path) -> Result<ParameterVector, WaterbombError> {
    let line = last_line(report_file)?;
    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    if fields.len() != DIM + 1 {
        return Err(WaterbombError::Parse(format!(
            "Expected {} fields in last record of {}, found {}",
            DIM + 1,
            report_file.display(),
            fields.len()
        )));
    }

    let mut coords = [0.0; DIM];
    for (slot, field) in coords.iter_mut().zip(&fields[..DIM]) {
        *slot = match field.parse() {
            Ok(v) => v,
            Err(_) => {
                return Err(WaterbombError::Parse(format!(
                    "Malformed design field '{field}' in {}",
                    report_file.display()
                )))
            }
        };
    }

    ParameterVector::from_slice(&coords)
}

/// Whether the last record was written for `params`. Fields written by a
/// foreign tool may lose the last digit, so a relative tolerance applies.
pub fn last_record_is_for(
    report_file: &Path,
    params: &ParameterVector,
) -> Result<bool, WaterbombError> {
    let design = last_design(report_file)?;

    Ok(design
        .to_array()
        .iter()
        .zip(params.to_array().iter())
        .all(|(a, b)| (a - b).abs() <= DESIGN_MATCH_TOLERANCE * a.abs().max(b.abs()).max(1.0)))
}

/// Whether the solver printed anything on stdout. A clean batch run is silent.
pub fn solver_signaled_error(captured_stdout: &str) -> bool {
    !captured_stdout.is_empty()
}

/// Converts the latest report record into the optimizer's objective
///
/// # Arguments
/// * `report_file` - The experiment report
/// * `captured_stdout` - Standard output of the solver run that wrote the record
///
/// # Returns
/// The negated energy drop, or `+inf` when the run is unusable
pub fn parse_last_record(
    report_file: &Path,
    captured_stdout: &str,
) -> Result<FitnessValue, WaterbombError> {
    let field = last_field(report_file)?;

    if solver_signaled_error(captured_stdout) || field == NON_CONVERGENCE_SENTINEL {
        return Ok(FitnessValue::PENALTY);
    }

    let delta: f64 = match field.parse() {
        Ok(v) => v,
        Err(_) => {
            return Err(WaterbombError::Parse(format!(
                "Malformed delta '{field}' in {}",
                report_file.display()
            )))
        }
    };

    Ok(FitnessValue::new(-delta).unwrap_or(FitnessValue::PENALTY))
}
