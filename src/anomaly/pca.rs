//! Linear reconstruction by principal components
//!
//! Windows are flattened, centered, projected onto the top eigenvectors of
//! the covariance matrix and mapped back. Eigenvectors come from power
//! iteration with deflation.

use super::{check_windows, Reconstructor, ThresholdConfig};
use crate::error::{Result, TimelyError};
use crate::windowing::{flatten_windows, unflatten_windows};
use ndarray::{Array1, Array2, Array3, Axis};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaConfig {
    /// Number of retained components, capped by the data dimensions
    pub n_components: usize,
    pub max_iter: usize,
    pub tolerance: f64,
    pub random_state: u64,
    #[serde(flatten)]
    pub threshold: ThresholdConfig,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            n_components: 3,
            max_iter: 300,
            tolerance: 1e-10,
            random_state: 42,
            threshold: ThresholdConfig::default(),
        }
    }
}

impl PcaConfig {
    pub fn with_n_components(mut self, n: usize) -> Self {
        self.n_components = n.max(1);
        self
    }

    pub fn with_threshold(mut self, threshold: ThresholdConfig) -> Self {
        self.threshold = threshold;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PcaBasis {
    mean: Array1<f64>,
    /// One eigenvector per column: `(d, k)`
    components: Array2<f64>,
    eigenvalues: Vec<f64>,
    kernel: usize,
    n_features: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaReconstructor {
    config: PcaConfig,
    basis: Option<PcaBasis>,
}

impl PcaReconstructor {
    pub fn new(config: PcaConfig) -> Self {
        Self { config, basis: None }
    }

    /// Variance captured by each retained component
    pub fn eigenvalues(&self) -> Option<&[f64]> {
        self.basis.as_ref().map(|b| b.eigenvalues.as_slice())
    }

    /// Top-`k` eigenpairs of `cov`. Stops early once the remaining
    /// variance is numerically zero, so fewer than `k` may come back.
    fn power_iteration(&self, cov: &Array2<f64>, k: usize) -> (Vec<f64>, Array2<f64>) {
        let d = cov.nrows();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);
        let mut work = cov.clone();
        let mut eigenvalues = Vec::with_capacity(k);
        let mut vectors: Vec<Array1<f64>> = Vec::with_capacity(k);
        let scale = cov.diag().iter().fold(0.0_f64, |m, &v| m.max(v.abs())).max(1e-300);

        for _ in 0..k {
            let mut v: Array1<f64> = (0..d).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let norm = v.dot(&v).sqrt().max(1e-12);
            v /= norm;

            let mut eigenvalue = 0.0;
            for _ in 0..self.config.max_iter {
                let w = work.dot(&v);
                eigenvalue = v.dot(&w);
                let w_norm = w.dot(&w).sqrt();
                if w_norm < 1e-12 * scale {
                    eigenvalue = 0.0;
                    break;
                }
                let new_v = w / w_norm;
                let diff = (&new_v - &v).mapv(|x| x * x).sum().sqrt();
                v = new_v;
                if diff < self.config.tolerance {
                    break;
                }
            }

            if eigenvalue <= 1e-12 * scale {
                break;
            }

            // Deflate: A -= lambda v v^T
            let outer = v.view().insert_axis(Axis(1)).dot(&v.view().insert_axis(Axis(0)));
            work.scaled_add(-eigenvalue, &outer);
            eigenvalues.push(eigenvalue);
            vectors.push(v);
        }

        let mut components = Array2::zeros((d, vectors.len()));
        for (c, v) in vectors.iter().enumerate() {
            components.column_mut(c).assign(v);
        }
        (eigenvalues, components)
    }
}

impl Default for PcaReconstructor {
    fn default() -> Self {
        Self::new(PcaConfig::default())
    }
}

impl Reconstructor for PcaReconstructor {
    fn name(&self) -> &'static str {
        "pca"
    }

    fn fit(&mut self, x: &Array3<f64>) -> Result<()> {
        check_windows(x, None, None)?;
        let (n, kernel, n_features) = x.dim();
        if n < 2 {
            return Err(TimelyError::TrainingError("PCA needs at least 2 windows".to_string()));
        }

        let flat = flatten_windows(x);
        let d = flat.ncols();
        let mean = flat
            .mean_axis(Axis(0))
            .ok_or_else(|| TimelyError::DataError("No windows to process".to_string()))?;
        let centered = &flat - &mean;
        let cov = centered.t().dot(&centered) / (n - 1) as f64;

        let k = self.config.n_components.min(d).min(n).max(1);
        let (eigenvalues, components) = self.power_iteration(&cov, k);
        let total: f64 = cov.diag().sum().max(1e-12);
        debug!(
            components = eigenvalues.len(),
            explained = eigenvalues.iter().sum::<f64>() / total,
            "PCA fitted"
        );

        self.basis = Some(PcaBasis {
            mean,
            components,
            eigenvalues,
            kernel,
            n_features,
        });
        Ok(())
    }

    fn reconstruct(&self, x: &Array3<f64>) -> Result<Array3<f64>> {
        let basis = self.basis.as_ref().ok_or(TimelyError::ModelNotFitted)?;
        check_windows(x, Some(basis.n_features), Some(basis.kernel))?;

        let centered = flatten_windows(x) - &basis.mean;
        let projected = centered.dot(&basis.components);
        let restored = projected.dot(&basis.components.t()) + &basis.mean;
        unflatten_windows(&restored, basis.kernel)
    }

    fn threshold_config(&self) -> ThresholdConfig {
        self.config.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{AnomalyDetector, ReconstructionDetector};

    /// Windows on a 1-D line in the flattened space
    fn line_windows(n: usize) -> Array3<f64> {
        Array3::from_shape_fn((n, 3, 2), |(i, t, f)| {
            let a = i as f64 / n as f64;
            a * (t + 1) as f64 * if f == 0 { 1.0 } else { -2.0 }
        })
    }

    #[test]
    fn test_pca_reconstructs_low_rank_data() {
        let x = line_windows(30);
        let mut pca = PcaReconstructor::default();
        pca.fit(&x).unwrap();

        let x_hat = pca.reconstruct(&x).unwrap();
        let max_err = (&x - &x_hat).mapv(f64::abs).fold(0.0_f64, |m, &v| m.max(v));
        assert!(max_err < 1e-6);
        // Rank-one data stops extraction after the first component
        assert_eq!(pca.eigenvalues().unwrap().len(), 1);
    }

    #[test]
    fn test_pca_detector_flags_off_manifold_windows() {
        let x = line_windows(30);
        let mut detector = ReconstructionDetector::new(PcaReconstructor::new(
            PcaConfig::default()
                .with_n_components(1)
                .with_threshold(ThresholdConfig::default().with_lazy(false)),
        ));
        detector.fit(&x).unwrap();

        let mut odd = line_windows(2);
        odd[[1, 0, 0]] += 5.0;
        let scores = detector.score_samples(&odd).unwrap();
        assert!(scores[0] < 1e-6);
        assert!(scores[1] > detector.threshold());
        assert!(detector.predict(&odd).unwrap()[1]);
    }

    #[test]
    fn test_reconstruct_checks_shape() {
        let mut pca = PcaReconstructor::default();
        pca.fit(&line_windows(10)).unwrap();
        assert!(pca.reconstruct(&Array3::zeros((2, 4, 2))).is_err());
        assert!(matches!(
            PcaReconstructor::default().reconstruct(&line_windows(2)),
            Err(TimelyError::ModelNotFitted)
        ));
    }
}
