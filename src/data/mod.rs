//! Sensor recordings and their loaders
//!
//! A [`Recording`] is one acquisition file: a matrix of samples (rows are
//! time steps) with one named column per channel.

mod loader;
mod lvm;

pub use loader::{list_files, load_recording, load_csv};
pub use lvm::{read_lvm, parse_lvm, LvmOptions};

use crate::error::{Result, TimelyError};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a recording column, either by name or by position
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureRef {
    /// Zero-based column position
    Index(usize),
    /// Column name
    Name(String),
}

impl fmt::Display for FeatureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureRef::Index(i) => write!(f, "{}", i),
            FeatureRef::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for FeatureRef {
    fn from(name: &str) -> Self {
        FeatureRef::Name(name.to_string())
    }
}

impl From<usize> for FeatureRef {
    fn from(index: usize) -> Self {
        FeatureRef::Index(index)
    }
}

/// Multi-channel time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl Recording {
    /// Create a recording, checking that every column has a name
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(TimelyError::ShapeError {
                expected: format!("{} columns", columns.len()),
                actual: format!("{} columns", values.ncols()),
            });
        }
        Ok(Self { columns, values })
    }

    /// Create a recording with positional column names ("0", "1", ...)
    pub fn from_values(values: Array2<f64>) -> Self {
        let columns = (0..values.ncols()).map(|i| i.to_string()).collect();
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn into_values(self) -> Array2<f64> {
        self.values
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    /// Resolve a feature reference to a column position
    pub fn position(&self, feature: &FeatureRef) -> Result<usize> {
        match feature {
            FeatureRef::Index(i) if *i < self.columns.len() => Ok(*i),
            FeatureRef::Name(name) => self
                .columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| TimelyError::FeatureNotFound(name.clone())),
            other => Err(TimelyError::FeatureNotFound(other.to_string())),
        }
    }

    /// Keep only the given features, in the given order
    pub fn select(&self, features: &[FeatureRef]) -> Result<Recording> {
        let positions = features
            .iter()
            .map(|f| self.position(f))
            .collect::<Result<Vec<_>>>()?;

        let columns = positions.iter().map(|&p| self.columns[p].clone()).collect();
        let values = self.values.select(Axis(1), &positions);

        Ok(Recording { columns, values })
    }

    /// Replace the sample matrix, keeping the column names
    pub fn with_values(&self, values: Array2<f64>) -> Result<Recording> {
        Recording::new(self.columns.clone(), values)
    }

    /// Stack recordings with identical columns along the time axis
    pub fn concat(recordings: &[Recording]) -> Result<Recording> {
        let first = recordings
            .first()
            .ok_or_else(|| TimelyError::DataError("No recordings to concatenate".to_string()))?;

        if let Some(other) = recordings.iter().find(|r| r.columns != first.columns) {
            return Err(TimelyError::ShapeError {
                expected: format!("columns {:?}", first.columns),
                actual: format!("columns {:?}", other.columns),
            });
        }

        let views: Vec<_> = recordings.iter().map(|r| r.values.view()).collect();
        let values = ndarray::concatenate(Axis(0), &views)?;

        Ok(Recording {
            columns: first.columns.clone(),
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample() -> Recording {
        Recording::new(
            vec!["a".into(), "b".into(), "c".into()],
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_select_by_name_and_index() {
        let rec = sample();
        let selected = rec
            .select(&[FeatureRef::from("c"), FeatureRef::from(0usize)])
            .unwrap();

        assert_eq!(selected.columns(), &["c".to_string(), "a".to_string()]);
        assert_eq!(selected.values(), &array![[3.0, 1.0], [6.0, 4.0]]);
    }

    #[test]
    fn test_select_missing_feature() {
        let rec = sample();
        let err = rec.select(&[FeatureRef::from("z")]).unwrap_err();
        assert!(matches!(err, TimelyError::FeatureNotFound(name) if name == "z"));

        assert!(rec.select(&[FeatureRef::Index(3)]).is_err());
    }

    #[test]
    fn test_concat() {
        let rec = sample();
        let joined = Recording::concat(&[rec.clone(), rec]).unwrap();
        assert_eq!(joined.len(), 4);
        assert_eq!(joined.values()[[3, 2]], 6.0);
    }

    #[test]
    fn test_concat_column_mismatch() {
        let other = Recording::from_values(array![[1.0, 2.0, 3.0]]);
        assert!(Recording::concat(&[sample(), other]).is_err());
    }

    #[test]
    fn test_feature_ref_deserialize() {
        let refs: Vec<FeatureRef> = serde_json::from_str(r#"[1, "Voltage_0"]"#).unwrap();
        assert_eq!(refs, vec![FeatureRef::Index(1), FeatureRef::from("Voltage_0")]);
    }
}
