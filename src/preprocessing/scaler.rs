//! Feature scaling implementations

use crate::error::{Result, TimelyError};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Type of scaler to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalerType {
    /// Standard scaling (z-score normalization): (x - mean) / std
    #[serde(alias = "std")]
    Standard,
    /// Min-Max scaling: (x - min) / (max - min)
    MinMax,
    /// Robust scaling using median and IQR
    Robust,
    /// Max absolute scaling: x / max(|x|)
    MaxAbs,
    /// No scaling
    None,
}

impl std::str::FromStr for ScalerType {
    type Err = TimelyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "standard" | "std" => Ok(ScalerType::Standard),
            "minmax" => Ok(ScalerType::MinMax),
            "robust" => Ok(ScalerType::Robust),
            "maxabs" => Ok(ScalerType::MaxAbs),
            "none" => Ok(ScalerType::None),
            other => Err(TimelyError::invalid_parameter(
                "transform_type",
                other,
                "expected one of standard, minmax, robust, maxabs, none",
            )),
        }
    }
}

/// Parameters for one fitted column
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScalerParams {
    center: f64, // mean, min, or median
    scale: f64,  // std, range, or IQR
}

/// Column-wise feature scaler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    scaler_type: ScalerType,
    params: Vec<ScalerParams>,
    is_fitted: bool,
}

impl Scaler {
    /// Create a new scaler
    pub fn new(scaler_type: ScalerType) -> Self {
        Self {
            scaler_type,
            params: Vec::new(),
            is_fitted: false,
        }
    }

    pub fn scaler_type(&self) -> ScalerType {
        self.scaler_type
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    /// Fit the scaler to the columns of `x`
    pub fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        if x.nrows() == 0 {
            return Err(TimelyError::DataError("Cannot fit scaler on empty data".to_string()));
        }

        self.params = x
            .axis_iter(Axis(1))
            .map(|column| self.compute_params(column))
            .collect();
        self.is_fitted = true;
        Ok(self)
    }

    /// Transform the data
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_input(x)?;
        let mut out = x.to_owned();
        for (mut column, params) in out.axis_iter_mut(Axis(1)).zip(&self.params) {
            column.mapv_inplace(|v| (v - params.center) / params.scale);
        }
        Ok(out)
    }

    /// Fit and transform in one step
    pub fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    /// Map scaled values back to the original units
    pub fn inverse_transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_input(x)?;
        let mut out = x.to_owned();
        for (mut column, params) in out.axis_iter_mut(Axis(1)).zip(&self.params) {
            column.mapv_inplace(|v| v * params.scale + params.center);
        }
        Ok(out)
    }

    fn check_input(&self, x: &Array2<f64>) -> Result<()> {
        if !self.is_fitted {
            return Err(TimelyError::ModelNotFitted);
        }
        if x.ncols() != self.params.len() {
            return Err(TimelyError::ShapeError {
                expected: format!("{} columns", self.params.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }
        Ok(())
    }

    fn compute_params(&self, column: ArrayView1<f64>) -> ScalerParams {
        let non_zero = |s: f64| if s == 0.0 || !s.is_finite() { 1.0 } else { s };

        match self.scaler_type {
            ScalerType::Standard => {
                let mean = column.mean().unwrap_or(0.0);
                let std = if column.len() > 1 { column.std(1.0) } else { 0.0 };
                ScalerParams { center: mean, scale: non_zero(std) }
            }
            ScalerType::MinMax => {
                let min = column.iter().copied().fold(f64::INFINITY, f64::min);
                let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                ScalerParams { center: min, scale: non_zero(max - min) }
            }
            ScalerType::Robust => {
                let mut sorted = column.to_vec();
                sorted.sort_by(f64::total_cmp);
                let median = crate::anomaly::quantile_sorted(&sorted, 0.5);
                let q1 = crate::anomaly::quantile_sorted(&sorted, 0.25);
                let q3 = crate::anomaly::quantile_sorted(&sorted, 0.75);
                ScalerParams { center: median, scale: non_zero(q3 - q1) }
            }
            ScalerType::MaxAbs => {
                let max_abs = column.iter().fold(0.0f64, |a, &b| a.max(b.abs()));
                ScalerParams { center: 0.0, scale: non_zero(max_abs) }
            }
            ScalerType::None => ScalerParams { center: 0.0, scale: 1.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn data() -> Array2<f64> {
        array![[1.0, 10.0], [2.0, 10.0], [3.0, 10.0], [4.0, 10.0], [5.0, 10.0]]
    }

    #[test]
    fn test_standard_scaler() {
        let mut scaler = Scaler::new(ScalerType::Standard);
        let result = scaler.fit_transform(&data()).unwrap();

        let mean = result.column(0).mean().unwrap();
        assert!(mean.abs() < 1e-10);
        // Constant column keeps a unit scale
        assert!(result.column(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_minmax_scaler() {
        let mut scaler = Scaler::new(ScalerType::MinMax);
        let result = scaler.fit_transform(&data()).unwrap();

        assert!((result[[0, 0]] - 0.0).abs() < 1e-10);
        assert!((result[[4, 0]] - 1.0).abs() < 1e-10);
        assert!((result[[2, 0]] - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_robust_scaler() {
        let mut scaler = Scaler::new(ScalerType::Robust);
        let result = scaler.fit_transform(&data()).unwrap();
        // median 3, IQR 2
        assert!((result[[0, 0]] + 1.0).abs() < 1e-10);
        assert!((result[[4, 0]] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_inverse_transform() {
        let mut scaler = Scaler::new(ScalerType::MinMax);
        let scaled = scaler.fit_transform(&data()).unwrap();
        let restored = scaler.inverse_transform(&scaled).unwrap();

        for (o, r) in data().iter().zip(restored.iter()) {
            assert!((o - r).abs() < 1e-10);
        }
    }

    #[test]
    fn test_transform_before_fit() {
        let scaler = Scaler::new(ScalerType::Standard);
        assert!(matches!(scaler.transform(&data()), Err(TimelyError::ModelNotFitted)));
    }

    #[test]
    fn test_width_mismatch() {
        let mut scaler = Scaler::new(ScalerType::Standard);
        scaler.fit(&data()).unwrap();
        assert!(scaler.transform(&array![[1.0, 2.0, 3.0]]).is_err());
    }

    #[test]
    fn test_parse_scaler_type() {
        assert_eq!("minmax".parse::<ScalerType>().unwrap(), ScalerType::MinMax);
        assert_eq!("std".parse::<ScalerType>().unwrap(), ScalerType::Standard);
        assert!("zscore".parse::<ScalerType>().is_err());

        let parsed: ScalerType = serde_json::from_str("\"maxabs\"").unwrap();
        assert_eq!(parsed, ScalerType::MaxAbs);
    }
}
