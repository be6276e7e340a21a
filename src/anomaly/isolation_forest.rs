//! Isolation Forest over flattened windows

use super::{check_windows, contamination_threshold, AnomalyDetector};
use crate::error::{Result, TimelyError};
use crate::windowing::flatten_windows;
use ndarray::{Array1, Array2, Array3, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Isolation Tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IsolationTree {
    Internal {
        feature: usize,
        threshold: f64,
        /// Values < threshold
        left: Box<IsolationTree>,
        /// Values >= threshold
        right: Box<IsolationTree>,
    },
    External {
        size: usize,
    },
}

impl IsolationTree {
    pub fn build(
        x: &Array2<f64>,
        indices: &[usize],
        height: usize,
        max_height: usize,
        rng: &mut impl Rng,
    ) -> Self {
        let n_samples = indices.len();
        if height >= max_height || n_samples <= 1 {
            return IsolationTree::External { size: n_samples };
        }

        let feature = rng.gen_range(0..x.ncols());
        let (min_val, max_val) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
            let v = x[[i, feature]];
            (lo.min(v), hi.max(v))
        });

        if (max_val - min_val).abs() < 1e-10 {
            return IsolationTree::External { size: n_samples };
        }

        let threshold = rng.gen_range(min_val..max_val);
        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| x[[i, feature]] < threshold);

        if left_indices.is_empty() || right_indices.is_empty() {
            return IsolationTree::External { size: n_samples };
        }

        let left = Box::new(Self::build(x, &left_indices, height + 1, max_height, rng));
        let right = Box::new(Self::build(x, &right_indices, height + 1, max_height, rng));

        IsolationTree::Internal {
            feature,
            threshold,
            left,
            right,
        }
    }

    pub fn path_length(&self, sample: ArrayView1<f64>, current_height: usize) -> f64 {
        match self {
            IsolationTree::External { size } => current_height as f64 + Self::c(*size),
            IsolationTree::Internal {
                feature,
                threshold,
                left,
                right,
            } => {
                if sample[*feature] < *threshold {
                    left.path_length(sample, current_height + 1)
                } else {
                    right.path_length(sample, current_height + 1)
                }
            }
        }
    }

    /// Average path length of an unsuccessful BST search:
    /// c(n) = 2 H(n-1) - 2(n-1)/n
    fn c(n: usize) -> f64 {
        if n <= 1 {
            0.0
        } else if n == 2 {
            1.0
        } else {
            let n_f = n as f64;
            2.0 * ((n_f - 1.0).ln() + 0.5772156649) - 2.0 * (n_f - 1.0) / n_f
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationForestConfig {
    pub n_estimators: usize,
    pub max_samples: usize,
    /// Expected proportion of anomalous training windows
    pub contamination: f64,
    pub random_state: Option<u64>,
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.1,
            random_state: Some(42),
        }
    }
}

impl IsolationForestConfig {
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n.max(1);
        self
    }

    pub fn with_max_samples(mut self, n: usize) -> Self {
        self.max_samples = n.max(1);
        self
    }

    pub fn with_contamination(mut self, c: f64) -> Self {
        self.contamination = c.clamp(0.0, 0.5);
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }
}

/// Isolation Forest; the score is `2^(-E[h(x)] / c(n))` in `(0, 1]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    config: IsolationForestConfig,
    trees: Option<Vec<IsolationTree>>,
    threshold: f64,
    n_samples: usize,
    width: usize,
}

impl IsolationForest {
    pub fn new(config: IsolationForestConfig) -> Self {
        Self {
            config,
            trees: None,
            threshold: 0.5,
            n_samples: 0,
            width: 0,
        }
    }

    pub fn config(&self) -> &IsolationForestConfig {
        &self.config
    }

    fn compute_scores(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let trees = self.trees.as_ref().ok_or(TimelyError::ModelNotFitted)?;
        if x.ncols() != self.width {
            return Err(TimelyError::ShapeError {
                expected: format!("{} values per window", self.width),
                actual: format!("{}", x.ncols()),
            });
        }
        let c_n = IsolationTree::c(self.n_samples).max(f64::EPSILON);

        let scores: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                let avg_path_length =
                    trees.iter().map(|tree| tree.path_length(row, 0)).sum::<f64>() / trees.len() as f64;
                2.0_f64.powf(-avg_path_length / c_n)
            })
            .collect();

        Ok(Array1::from_vec(scores))
    }
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new(IsolationForestConfig::default())
    }
}

impl AnomalyDetector for IsolationForest {
    fn name(&self) -> &str {
        "isolation_forest"
    }

    fn fit(&mut self, x: &Array3<f64>) -> Result<()> {
        check_windows(x, None, None)?;
        let x = flatten_windows(x);
        let n_samples = x.nrows();
        let samples_per_tree = self.config.max_samples.min(n_samples);

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        let max_height = (samples_per_tree as f64).log2().ceil() as usize;
        let trees = (0..self.config.n_estimators.max(1))
            .map(|_| {
                let indices: Vec<usize> = (0..samples_per_tree).map(|_| rng.gen_range(0..n_samples)).collect();
                IsolationTree::build(&x, &indices, 0, max_height, &mut rng)
            })
            .collect();

        self.trees = Some(trees);
        self.n_samples = samples_per_tree;
        self.width = x.ncols();

        let scores = self.compute_scores(&x)?;
        self.threshold = contamination_threshold(&scores, self.config.contamination);
        debug!(threshold = self.threshold, trees = self.config.n_estimators, "Isolation forest fitted");
        Ok(())
    }

    fn score_samples(&self, x: &Array3<f64>) -> Result<Array1<f64>> {
        self.compute_scores(&flatten_windows(x))
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows_with_outliers() -> Array3<f64> {
        // 50 normal windows of 2 steps x 1 feature, then 2 outliers
        let mut data = Vec::new();
        for i in 0..50 {
            data.push((i % 10) as f64);
            data.push(((i % 10) + 1) as f64);
        }
        data.extend_from_slice(&[100.0, 100.0]);
        data.extend_from_slice(&[-50.0, -50.0]);
        Array3::from_shape_vec((52, 2, 1), data).unwrap()
    }

    #[test]
    fn test_isolation_forest_basic() {
        let x = windows_with_outliers();
        let mut iforest = IsolationForest::new(
            IsolationForestConfig::default()
                .with_n_estimators(50)
                .with_contamination(0.05)
                .with_random_state(42),
        );

        iforest.fit(&x).unwrap();

        let scores = iforest.score_samples(&x).unwrap();
        let flags = iforest.predict(&x).unwrap();

        assert!(scores[50] > scores[0]);
        assert!(scores[51] > scores[0]);
        assert!(flags.iter().any(|&f| f));
        assert!(scores.iter().all(|&s| s > 0.0 && s <= 1.0));
    }

    #[test]
    fn test_contamination_share_of_training_windows_flagged() {
        // 90 tightly packed windows and 10 far apart, all distinct
        let values: Vec<f64> = (0..90)
            .map(|i| i as f64 * 0.01)
            .chain((1..=10).map(|j| 10.0 * j as f64))
            .collect();
        let x = Array3::from_shape_vec((100, 1, 1), values).unwrap();
        let mut iforest = IsolationForest::new(IsolationForestConfig::default().with_contamination(0.1));
        iforest.fit(&x).unwrap();

        let flags = iforest.predict(&x).unwrap();
        assert_eq!(flags.iter().filter(|&&f| f).count(), 10);
        assert!(flags.iter().skip(90).all(|&f| f));
        assert_eq!(iforest.detect(&x).unwrap().n_anomalies, 10);
    }

    #[test]
    fn test_unfitted_and_wrong_width() {
        let iforest = IsolationForest::default();
        let x = windows_with_outliers();
        assert!(matches!(iforest.score_samples(&x), Err(TimelyError::ModelNotFitted)));

        let mut iforest = IsolationForest::default();
        iforest.fit(&x).unwrap();
        assert!(iforest.score_samples(&Array3::zeros((3, 4, 1))).is_err());
    }

    #[test]
    fn test_isolation_tree_path_length() {
        let x = Array2::from_shape_vec(
            (10, 2),
            vec![
                1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0, 5.0, 5.0, 6.0, 6.0, 7.0, 7.0, 8.0, 8.0, 9.0, 9.0, 10.0, 10.0,
            ],
        )
        .unwrap();

        let indices: Vec<usize> = (0..10).collect();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let tree = IsolationTree::build(&x, &indices, 0, 10, &mut rng);

        let sample = ndarray::array![5.0, 5.0];
        assert!(tree.path_length(sample.view(), 0) > 0.0);
    }

    #[test]
    fn test_tune_is_unsupported() {
        let mut iforest = IsolationForest::default();
        let x = windows_with_outliers();
        assert!(matches!(iforest.tune(&x), Err(TimelyError::Unsupported { .. })));
    }
}
