//! File discovery and format dispatch

use super::{read_lvm, LvmOptions, Recording};
use crate::error::{Result, TimelyError};
use ndarray::Array2;
use polars::prelude::*;
use std::path::{Path, PathBuf};

/// List regular files in `folder` with extension `ext`, sorted by file name
pub fn list_files(folder: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(TimelyError::DataError(format!(
            "{} is not a directory",
            folder.display()
        )));
    }

    let ext = ext.trim_start_matches('.');
    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| e.eq_ignore_ascii_case(ext))
        })
        .collect();

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Load a recording, picking the reader from the file extension
pub fn load_recording(path: &Path, lvm_options: &LvmOptions) -> Result<Recording> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "lvm" => read_lvm(path, lvm_options),
        "csv" => load_csv(path),
        _ => Err(TimelyError::DataError(format!(
            "Unsupported file format: {}",
            path.display()
        ))),
    }
}

/// Load a CSV file with a header row; every column is cast to f64
pub fn load_csv(path: &Path) -> Result<Recording> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1000))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let columns: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();

    let col_data: Vec<Vec<f64>> = columns
        .iter()
        .map(|name| {
            let column = df
                .column(name)
                .map_err(|_| TimelyError::FeatureNotFound(name.clone()))?;
            let as_f64 = column.cast(&DataType::Float64)?;
            let values: Vec<f64> = as_f64
                .f64()?
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect();
            Ok(values)
        })
        .collect::<Result<Vec<_>>>()?;

    let values = Array2::from_shape_fn((df.height(), columns.len()), |(r, c)| col_data[c][r]);
    Recording::new(columns, values)
}
