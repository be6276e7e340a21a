//! LabVIEW Measurement (`.lvm`) text file reader
//!
//! An LVM file is a file header and one or more segment headers, each closed
//! by `***End_of_Header***`, followed by delimited sample rows. The row right
//! after a segment header usually names the channels (`X_Value`, ...,
//! `Comment`).

use super::Recording;
use crate::error::{Result, TimelyError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

const END_OF_HEADER: &str = "***End_of_Header***";
const NAMES_ROW_MARKER: &str = "X_Value";
const COMMENT_COLUMN: &str = "Comment";

/// Options for reading LVM files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LvmOptions {
    /// Name columns after the channel-name row instead of by position
    pub use_channel_names: bool,
}

impl LvmOptions {
    pub fn with_channel_names(mut self, enabled: bool) -> Self {
        self.use_channel_names = enabled;
        self
    }
}

/// Read an LVM file from disk
pub fn read_lvm(path: &Path, options: &LvmOptions) -> Result<Recording> {
    let text = std::fs::read_to_string(path)?;
    parse_lvm(&text, options).map_err(|e| match e {
        TimelyError::DataError(msg) => {
            TimelyError::DataError(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })
}

/// Parse the contents of an LVM file
pub fn parse_lvm(text: &str, options: &LvmOptions) -> Result<Recording> {
    let mut separator = '\t';
    let mut decimal_comma = false;
    let mut names: Option<Vec<String>> = None;
    let mut width: Option<usize> = None;
    let mut samples: Vec<f64> = Vec::new();
    let mut n_rows = 0usize;

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with(END_OF_HEADER) {
            continue;
        }

        let fields = split_fields(line, separator);

        if let Some(values) = parse_row(&fields, decimal_comma) {
            let expected = *width.get_or_insert(values.len());
            if values.len() != expected {
                return Err(TimelyError::DataError(format!(
                    "line {}: expected {} values, found {}",
                    line_no + 1,
                    expected,
                    values.len()
                )));
            }
            samples.extend(values);
            n_rows += 1;
            continue;
        }

        if fields.first().map(|f| f.trim()) == Some(NAMES_ROW_MARKER) {
            if names.is_none() {
                names = Some(
                    fields
                        .iter()
                        .map(|f| f.trim().to_string())
                        .filter(|f| !f.is_empty() && f != COMMENT_COLUMN)
                        .collect(),
                );
            }
            continue;
        }

        // Header key/value line; keys may be separated by tab or comma
        let mut parts = line.splitn(2, |c| c == '\t' || c == ',');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        match key {
            "Separator" => {
                separator = if value.eq_ignore_ascii_case("comma") { ',' } else { '\t' };
            }
            "Decimal_Separator" => decimal_comma = value.starts_with(','),
            _ => {}
        }
    }

    let width = width.ok_or_else(|| TimelyError::DataError("no samples found".to_string()))?;
    let values = Array2::from_shape_vec((n_rows, width), samples)?;

    match names {
        Some(names) if options.use_channel_names && names.len() == width => {
            Recording::new(names, values)
        }
        _ => Ok(Recording::from_values(values)),
    }
}

fn split_fields(line: &str, separator: char) -> Vec<&str> {
    let mut fields: Vec<&str> = line.split(separator).collect();
    while fields.last().map_or(false, |f| f.trim().is_empty()) {
        fields.pop();
    }
    fields
}

/// Parse a sample row. Returns `None` when any non-empty field is not numeric.
fn parse_row(fields: &[&str], decimal_comma: bool) -> Option<Vec<f64>> {
    if fields.is_empty() {
        return None;
    }

    let mut any_value = false;
    let mut values = Vec::with_capacity(fields.len());
    for field in fields {
        let field = field.trim();
        if field.is_empty() {
            values.push(f64::NAN);
            continue;
        }
        let parsed = if decimal_comma {
            field.replace(',', ".").parse::<f64>()
        } else {
            field.parse::<f64>()
        };
        values.push(parsed.ok()?);
        any_value = true;
    }

    any_value.then_some(values)
}
