//! File boundary
//!
//! Readers and writers for the on-disk formats the pipeline exchanges with its
//! collaborators: headerless numeric CSV matrices, the region-to-network
//! reference table, whitespace-delimited subject lists, `.npy` label
//! sequences and CSV tables of serializable rows.
//!
//! Each function opens its file handle in its own scope, so handles are
//! released on every return path.

use crate::error::{Result, StateError};
use crate::types::{LabelSequence, RegionAssignment, SubjectId};
use ndarray::{Array1, Array2};
use ndarray_npy::{read_npy, write_npy, ReadNpyError};
use serde::Serialize;
use std::fs::{self, File};
use std::path::Path;

/// Read a headerless numeric CSV as a (rows x columns) matrix.
///
/// A missing file is reported as a recoverable missing input of `kind`.
pub fn read_numeric_csv(path: &Path, kind: &'static str) -> Result<Array2<f64>> {
    if !path.exists() {
        return Err(StateError::MissingInput {
            kind,
            path: path.to_path_buf(),
        });
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(File::open(path)?);

    let mut values = Vec::new();
    let mut columns = None;
    let mut rows = 0;
    for record in reader.records() {
        let record = record.map_err(|e| StateError::corrupt(kind, path, e))?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        for field in record.iter() {
            let value = field.parse::<f64>().map_err(|_| {
                StateError::corrupt(kind, path, format!("value {field:?} in row {}", rows + 1))
            })?;
            values.push(value);
        }
        match columns {
            None => columns = Some(record.len()),
            Some(n) if n != record.len() => {
                return Err(StateError::shape(
                    format!("{kind} row {} of {}", rows + 1, path.display()),
                    n,
                    record.len(),
                ))
            }
            Some(_) => {}
        }
        rows += 1;
    }

    Array2::from_shape_vec((rows, columns.unwrap_or(0)), values)
        .map_err(|e| StateError::corrupt(kind, path, e))
}

/// Read the region-to-network reference table (`ROI`, `network_id` columns).
///
/// The table is required before any subject is processed, so a missing file
/// is a configuration error.
pub fn read_network_map(path: &Path) -> Result<Vec<RegionAssignment>> {
    if !path.exists() {
        return Err(StateError::InvalidConfig(format!(
            "network map not found: {}",
            path.display()
        )));
    }
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(File::open(path)?);
    let entries = reader
        .deserialize()
        .collect::<std::result::Result<Vec<RegionAssignment>, csv::Error>>()?;
    if entries.is_empty() {
        return Err(StateError::InvalidMapping(format!(
            "{} has no rows",
            path.display()
        )));
    }
    Ok(entries)
}

/// Parse whitespace-delimited subject identifiers (`123` or `123.0`)
pub fn parse_subject_list(text: &str) -> Result<Vec<SubjectId>> {
    text.split_whitespace()
        .map(|token| {
            token.parse::<SubjectId>().or_else(|_| {
                token
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.fract() == 0.0 && *v >= 0.0)
                    .map(|v| v as SubjectId)
                    .ok_or_else(|| StateError::ParseError(format!("subject id {token:?}")))
            })
        })
        .collect()
}

/// Read a cohort subject list; a missing list is a configuration error
pub fn read_subject_list(path: &Path) -> Result<Vec<SubjectId>> {
    if !path.exists() {
        return Err(StateError::InvalidConfig(format!(
            "subject list not found: {}",
            path.display()
        )));
    }
    parse_subject_list(&fs::read_to_string(path)?)
}

/// Persist a label sequence as a 1-D i64 `.npy` array
pub fn write_labels(path: &Path, sequence: &LabelSequence) -> Result<()> {
    let array = Array1::from(sequence.as_slice().to_vec());
    write_npy(path, &array)?;
    Ok(())
}

/// Read a label sequence written as i64 or as float64 codes
pub fn read_labels(path: &Path) -> Result<LabelSequence> {
    if !path.exists() {
        return Err(StateError::MissingInput {
            kind: "label",
            path: path.to_path_buf(),
        });
    }

    match read_npy::<_, Array1<i64>>(path) {
        Ok(codes) => Ok(LabelSequence::new(codes.to_vec())),
        Err(ReadNpyError::WrongDescriptor(_)) => {
            let codes: Array1<f64> =
                read_npy(path).map_err(|e| StateError::corrupt("label", path, e))?;
            codes
                .iter()
                .map(|&c| {
                    if c.fract() == 0.0 && c.is_finite() {
                        Ok(c as i64)
                    } else {
                        Err(StateError::corrupt(
                            "label",
                            path,
                            format!("non-integer label {c}"),
                        ))
                    }
                })
                .collect::<Result<Vec<i64>>>()
                .map(LabelSequence::new)
        }
        Err(e) => Err(StateError::corrupt("label", path, e)),
    }
}

/// Write serializable rows as a CSV table with a header
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Create `dir` and its parents if needed
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}
