//! Anomaly detectors over window tensors
//!
//! Every detector consumes windows shaped `(n_windows, kernel, n_features)`
//! and scores each window, higher meaning more anomalous. Reconstruction
//! models ([`LstmAutoencoder`], [`BiLstmAutoencoder`], [`DeepAutoencoder`],
//! [`PcaReconstructor`])
//! score by mean absolute reconstruction error against a threshold that
//! never decreases; [`IsolationForest`] and [`LocalOutlierFactor`] score the
//! flattened windows and threshold by contamination.

mod bilstm_autoencoder;
mod deep_autoencoder;
mod isolation_forest;
mod lof;
mod lstm_autoencoder;
mod pca;
mod registry;
mod threshold;

pub use bilstm_autoencoder::{BiLstmAutoencoder, BiLstmAutoencoderConfig};
pub use deep_autoencoder::{DeepAutoencoder, DeepAutoencoderConfig};
pub use isolation_forest::{IsolationForest, IsolationForestConfig, IsolationTree};
pub use lof::{LocalOutlierFactor, LofConfig};
pub use lstm_autoencoder::{LstmAutoencoder, LstmAutoencoderConfig};
pub use pca::{PcaConfig, PcaReconstructor};
pub use registry::{get_model, ModelKind};
pub use threshold::{reconstruction_error, ReconstructionThreshold, ThresholdConfig};

use crate::error::{Result, TimelyError};
use ndarray::{Array1, Array3, Axis};
use serde::{Deserialize, Serialize};

/// Output of [`AnomalyDetector::detect`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResult {
    /// Score per window
    pub scores: Array1<f64>,
    /// Anomaly flag per window
    pub is_anomaly: Array1<bool>,
    /// Threshold the flags were computed with
    pub threshold: f64,
    /// Number of flagged windows
    pub n_anomalies: usize,
}

/// Common interface of all window detectors
pub trait AnomalyDetector: Send + Sync {
    /// Registry key of the model
    fn name(&self) -> &str;

    /// Fit on normal windows
    fn fit(&mut self, x: &Array3<f64>) -> Result<()>;

    /// Anomaly score per window (higher = more anomalous)
    fn score_samples(&self, x: &Array3<f64>) -> Result<Array1<f64>>;

    /// Current decision threshold
    fn threshold(&self) -> f64;

    /// Turn scores into flags: `score > threshold`
    fn flag(&self, scores: &Array1<f64>) -> Array1<bool> {
        let threshold = self.threshold();
        scores.mapv(|s| s > threshold)
    }

    /// Anomaly flag per window
    fn predict(&self, x: &Array3<f64>) -> Result<Array1<bool>> {
        Ok(self.flag(&self.score_samples(x)?))
    }

    /// Signed distance to the threshold; positive means anomalous
    fn decision_score(&self, x: &Array3<f64>) -> Result<Array1<f64>> {
        let threshold = self.threshold();
        Ok(self.score_samples(x)? - threshold)
    }

    /// Continue training on new normal windows and refresh the threshold
    fn tune(&mut self, _x: &Array3<f64>) -> Result<()> {
        Err(TimelyError::Unsupported {
            model: self.name().to_string(),
            operation: "tune".to_string(),
        })
    }

    /// Reconstruct windows (reconstruction models only)
    fn reconstruct(&self, _x: &Array3<f64>) -> Result<Array3<f64>> {
        Err(TimelyError::Unsupported {
            model: self.name().to_string(),
            operation: "reconstruct".to_string(),
        })
    }

    /// Score, flag and count in one pass
    fn detect(&self, x: &Array3<f64>) -> Result<AnomalyResult> {
        let scores = self.score_samples(x)?;
        let threshold = self.threshold();
        let is_anomaly = self.flag(&scores);
        let n_anomalies = is_anomaly.iter().filter(|&&a| a).count();
        Ok(AnomalyResult {
            scores,
            is_anomaly,
            threshold,
            n_anomalies,
        })
    }
}

/// A model that learns to reproduce normal windows
pub trait Reconstructor: Send + Sync {
    fn name(&self) -> &'static str;

    fn fit(&mut self, x: &Array3<f64>) -> Result<()>;

    fn reconstruct(&self, x: &Array3<f64>) -> Result<Array3<f64>>;

    /// Continue training on new data. Closed-form models refit.
    fn tune(&mut self, x: &Array3<f64>) -> Result<()> {
        self.fit(x)
    }

    fn threshold_config(&self) -> ThresholdConfig;
}

/// Wraps a [`Reconstructor`] with reconstruction-error scoring and the
/// non-decreasing threshold.
#[derive(Debug, Clone)]
pub struct ReconstructionDetector<R> {
    model: R,
    threshold: ReconstructionThreshold,
}

impl<R: Reconstructor> ReconstructionDetector<R> {
    pub fn new(model: R) -> Self {
        let threshold = ReconstructionThreshold::new(model.threshold_config());
        Self { model, threshold }
    }

    pub fn model(&self) -> &R {
        &self.model
    }

    fn refresh_threshold(&mut self, x: &Array3<f64>) -> Result<()> {
        let errors = reconstruction_error(x, &self.model.reconstruct(x)?)?;
        self.threshold.update(&errors)?;
        Ok(())
    }
}

impl<R: Reconstructor> AnomalyDetector for ReconstructionDetector<R> {
    fn name(&self) -> &str {
        self.model.name()
    }

    fn fit(&mut self, x: &Array3<f64>) -> Result<()> {
        self.model.fit(x)?;
        self.refresh_threshold(x)
    }

    fn score_samples(&self, x: &Array3<f64>) -> Result<Array1<f64>> {
        reconstruction_error(x, &self.model.reconstruct(x)?)
    }

    fn threshold(&self) -> f64 {
        self.threshold.value()
    }

    fn tune(&mut self, x: &Array3<f64>) -> Result<()> {
        self.model.tune(x)?;
        self.refresh_threshold(x)
    }

    fn reconstruct(&self, x: &Array3<f64>) -> Result<Array3<f64>> {
        self.model.reconstruct(x)
    }
}

/// Quantile of ascending-sorted data with linear interpolation between
/// closest ranks. Empty input gives NaN.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

/// Cutoff for `score > threshold` flagging: the `floor(contamination * n)`
/// highest scores lie strictly above it when scores are distinct
pub(crate) fn contamination_threshold(scores: &Array1<f64>, contamination: f64) -> f64 {
    let mut sorted: Vec<f64> = scores.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let n = sorted.len();
    if n == 0 {
        return f64::INFINITY;
    }
    let idx = ((contamination * n as f64) as usize).min(n - 1);
    sorted[idx]
}

pub(crate) fn check_windows(x: &Array3<f64>, n_features: Option<usize>, kernel: Option<usize>) -> Result<()> {
    if x.len_of(Axis(0)) == 0 {
        return Err(TimelyError::DataError("No windows to process".to_string()));
    }
    let (_, k, f) = x.dim();
    if let Some(expected) = kernel.filter(|&e| e != k) {
        return Err(TimelyError::ShapeError {
            expected: format!("window length {}", expected),
            actual: format!("{}", k),
        });
    }
    if let Some(expected) = n_features.filter(|&e| e != f) {
        return Err(TimelyError::ShapeError {
            expected: format!("{} features", expected),
            actual: format!("{}", f),
        });
    }
    Ok(())
}
