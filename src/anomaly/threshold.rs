//! Reconstruction error and the non-decreasing detection threshold

use super::quantile_sorted;
use crate::error::{Result, TimelyError};
use ndarray::{Array1, Array3, Axis};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Mean absolute difference per window over all time steps and features
pub fn reconstruction_error(x: &Array3<f64>, x_pred: &Array3<f64>) -> Result<Array1<f64>> {
    if x.dim() != x_pred.dim() {
        return Err(TimelyError::ShapeError {
            expected: format!("{:?}", x.dim()),
            actual: format!("{:?}", x_pred.dim()),
        });
    }
    let diff = (x - x_pred).mapv(f64::abs);
    let (_, k, f) = x.dim();
    let per_window = diff.sum_axis(Axis(2)).sum_axis(Axis(1));
    Ok(per_window / (k * f).max(1) as f64)
}

/// How the threshold is derived from training errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Add `iqr_factor * IQR` of the training errors on top of their maximum
    pub with_lazy: bool,
    pub iqr_factor: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            with_lazy: true,
            iqr_factor: 10.0,
        }
    }
}

impl ThresholdConfig {
    pub fn with_lazy(mut self, enabled: bool) -> Self {
        self.with_lazy = enabled;
        self
    }

    pub fn with_iqr_factor(mut self, factor: f64) -> Self {
        self.iqr_factor = factor;
        self
    }
}

/// Threshold that only ever grows across fits and tuning rounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionThreshold {
    config: ThresholdConfig,
    value: f64,
}

impl ReconstructionThreshold {
    pub fn new(config: ThresholdConfig) -> Self {
        Self { config, value: 0.0 }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Threshold candidate for one batch of training errors
    pub fn candidate(&self, errors: &Array1<f64>) -> Result<f64> {
        if errors.is_empty() {
            return Err(TimelyError::TrainingError(
                "Cannot compute a threshold without training errors".to_string(),
            ));
        }
        let mut sorted = errors.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mut t = sorted[sorted.len() - 1];
        if self.config.with_lazy {
            let iqr = quantile_sorted(&sorted, 0.75) - quantile_sorted(&sorted, 0.25);
            t += self.config.iqr_factor * iqr;
        }
        Ok(t)
    }

    /// Fold new training errors into the threshold and return it
    pub fn update(&mut self, errors: &Array1<f64>) -> Result<f64> {
        let candidate = self.candidate(errors)?;

        let n = errors.len() as f64;
        let mean = errors.sum() / n;
        let std = (errors.mapv(|e| (e - mean).powi(2)).sum() / n).sqrt();
        let min = errors.iter().copied().fold(f64::INFINITY, f64::min);
        let max = errors.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        info!(min, max, mean, std, "Training reconstruction error");

        self.value = self.value.max(candidate);
        info!(threshold = self.value, "Threshold updated");
        Ok(self.value)
    }
}
