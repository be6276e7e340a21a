//! Per-feature reconstruction error of anomalous windows

use crate::error::{Result, TimelyError};
use crate::preprocessing::Scaler;
use ndarray::{Array1, Array2, Array3, Axis};
use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocateRow {
    /// Mean absolute error over time, one entry per feature
    pub errors: Vec<f64>,
    pub threshold: f64,
    /// State label of the window
    pub score: usize,
}

/// Which features a model failed to reconstruct, window by window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocateTable {
    features: Vec<String>,
    rows: Vec<LocateRow>,
}

impl LocateTable {
    /// Compare windows with their reconstructions in the original units.
    ///
    /// When a scaler was applied before windowing, both the input and the
    /// reconstruction are inverse transformed first.
    pub fn build(
        x: &Array3<f64>,
        x_pred: &Array3<f64>,
        labels: &Array1<usize>,
        features: &[String],
        threshold: f64,
        scaler: Option<&Scaler>,
    ) -> Result<Self> {
        if x.dim() != x_pred.dim() {
            return Err(TimelyError::ShapeError {
                expected: format!("{:?}", x.dim()),
                actual: format!("{:?}", x_pred.dim()),
            });
        }
        let (n, _, n_features) = x.dim();
        if labels.len() != n || features.len() != n_features {
            return Err(TimelyError::ShapeError {
                expected: format!("{} labels and {} feature names", n, n_features),
                actual: format!("{} labels and {} feature names", labels.len(), features.len()),
            });
        }

        let restore = |w: Array2<f64>| -> Result<Array2<f64>> {
            match scaler {
                Some(scaler) => scaler.inverse_transform(&w),
                None => Ok(w),
            }
        };

        let rows = (0..n)
            .into_par_iter()
            .map(|i| {
                let x_true = restore(x.index_axis(Axis(0), i).to_owned())?;
                let x_hat = restore(x_pred.index_axis(Axis(0), i).to_owned())?;
                let diff = (&x_true - &x_hat).mapv(f64::abs);
                let errors = diff
                    .mean_axis(Axis(0))
                    .map(|m| m.to_vec())
                    .unwrap_or_else(|| vec![0.0; n_features]);
                Ok(LocateRow {
                    errors,
                    threshold,
                    score: labels[i],
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            features: features.to_vec(),
            rows,
        })
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn rows(&self) -> &[LocateRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Mean error per feature over all windows
    pub fn feature_means(&self) -> Vec<(String, f64)> {
        let n = self.rows.len().max(1) as f64;
        self.features
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let mean = self.rows.iter().map(|r| r.errors[j]).sum::<f64>() / n;
                (name.clone(), mean)
            })
            .collect()
    }

    pub fn to_csv(&self, path: &Path) -> Result<()> {
        super::write_csv(&mut self.to_dataframe()?, path)
    }

    /// One column per feature, then `threshold` and `score`
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut columns: Vec<Column> = self
            .features
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let values: Vec<f64> = self.rows.iter().map(|r| r.errors[j]).collect();
                Column::new(name.as_str().into(), values)
            })
            .collect();
        let thresholds: Vec<f64> = self.rows.iter().map(|r| r.threshold).collect();
        let scores: Vec<u64> = self.rows.iter().map(|r| r.score as u64).collect();
        columns.push(Column::new("threshold".into(), thresholds));
        columns.push(Column::new("score".into(), scores));
        Ok(DataFrame::new(columns)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::ScalerType;
    use ndarray::array;

    fn names() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[test]
    fn test_per_feature_error() {
        let x = Array3::from_shape_vec((1, 2, 2), vec![1.0, 0.0, 3.0, 0.0]).unwrap();
        let x_pred = Array3::from_shape_vec((1, 2, 2), vec![0.0, 0.0, 0.0, 1.0]).unwrap();
        let table = LocateTable::build(&x, &x_pred, &array![2], &names(), 0.7, None).unwrap();

        assert_eq!(table.rows()[0].errors, vec![2.0, 0.5]);
        assert_eq!(table.rows()[0].score, 2);
        assert_eq!(table.rows()[0].threshold, 0.7);
    }

    #[test]
    fn test_errors_in_original_units() {
        let mut scaler = Scaler::new(ScalerType::MinMax);
        scaler.fit(&array![[0.0, 0.0], [10.0, 100.0]]).unwrap();

        // Scaled difference of 0.1 in both features
        let x = Array3::from_elem((1, 1, 2), 0.5);
        let x_pred = Array3::from_elem((1, 1, 2), 0.4);
        let table = LocateTable::build(&x, &x_pred, &array![0], &names(), 0.0, Some(&scaler)).unwrap();

        let errors = &table.rows()[0].errors;
        assert!((errors[0] - 1.0).abs() < 1e-9);
        assert!((errors[1] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_dataframe_columns() {
        let x = Array3::zeros((3, 2, 2));
        let table = LocateTable::build(&x, &x, &array![1, 1, 1], &names(), 0.1, None).unwrap();
        let df = table.to_dataframe().unwrap();
        let cols: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        assert_eq!(cols, vec!["a", "b", "threshold", "score"]);
        assert_eq!(df.height(), 3);
        assert_eq!(table.feature_means(), vec![("a".to_string(), 0.0), ("b".to_string(), 0.0)]);
    }

    #[test]
    fn test_label_count_mismatch() {
        let x = Array3::zeros((2, 2, 2));
        assert!(LocateTable::build(&x, &x, &array![0], &names(), 0.0, None).is_err());
    }
}
