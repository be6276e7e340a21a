//! Local Outlier Factor over flattened windows

use super::{check_windows, contamination_threshold, AnomalyDetector};
use crate::error::{Result, TimelyError};
use crate::windowing::flatten_windows;
use ndarray::{Array1, Array2, Array3, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::debug;

/// Distance paired with a row index, ordered by distance
#[derive(Debug, Clone, Copy)]
struct Neighbor(f64, usize);

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: peek() returns the farthest kept neighbor
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LofConfig {
    pub n_neighbors: usize,
    /// Expected proportion of anomalous training windows
    pub contamination: f64,
}

impl Default for LofConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 20,
            contamination: 0.1,
        }
    }
}

impl LofConfig {
    pub fn with_n_neighbors(mut self, k: usize) -> Self {
        self.n_neighbors = k.max(1);
        self
    }

    pub fn with_contamination(mut self, c: f64) -> Self {
        self.contamination = c.clamp(0.0, 0.5);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FittedLof {
    x_train: Array2<f64>,
    k: usize,
    k_distances: Array1<f64>,
    lrd: Array1<f64>,
}

/// Local Outlier Factor; scores near 1 are inliers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalOutlierFactor {
    config: LofConfig,
    fitted: Option<FittedLof>,
    threshold: f64,
}

fn euclidean_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

fn k_nearest_neighbors(
    point: ArrayView1<f64>,
    data: &Array2<f64>,
    k: usize,
    exclude_self: Option<usize>,
) -> Vec<(usize, f64)> {
    let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);

    for (i, row) in data.rows().into_iter().enumerate() {
        if Some(i) == exclude_self {
            continue;
        }
        let dist = euclidean_distance(point, row);
        if heap.len() < k {
            heap.push(Neighbor(dist, i));
        } else if let Some(&Neighbor(max_dist, _)) = heap.peek() {
            if dist < max_dist {
                heap.pop();
                heap.push(Neighbor(dist, i));
            }
        }
    }

    heap.into_iter().map(|Neighbor(d, i)| (i, d)).collect()
}

/// Distance to the k-th nearest neighbor
fn k_distance(neighbors: &[(usize, f64)]) -> f64 {
    neighbors.iter().map(|(_, d)| *d).fold(0.0, f64::max)
}

/// Local reachability density
fn local_reachability_density(neighbors: &[(usize, f64)], k_distances: &Array1<f64>) -> f64 {
    if neighbors.is_empty() {
        return 0.0;
    }
    let sum_reach_dist: f64 = neighbors.iter().map(|&(idx, dist)| k_distances[idx].max(dist)).sum();
    if sum_reach_dist == 0.0 {
        f64::INFINITY
    } else {
        neighbors.len() as f64 / sum_reach_dist
    }
}

fn lof_score(lrd_point: f64, neighbors: &[(usize, f64)], lrd: &Array1<f64>) -> f64 {
    if neighbors.is_empty() || lrd_point == 0.0 {
        return 1.0;
    }
    if lrd_point.is_infinite() {
        // Duplicates of a training point
        return 1.0;
    }
    let sum: f64 = neighbors
        .iter()
        .map(|&(idx, _)| {
            let ratio = lrd[idx] / lrd_point;
            if ratio.is_finite() { ratio } else { 1.0 }
        })
        .sum();
    sum / neighbors.len() as f64
}

impl LocalOutlierFactor {
    pub fn new(config: LofConfig) -> Self {
        Self {
            config,
            fitted: None,
            threshold: 1.5,
        }
    }

    pub fn config(&self) -> &LofConfig {
        &self.config
    }

    fn compute_scores(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let fitted = self.fitted.as_ref().ok_or(TimelyError::ModelNotFitted)?;
        if x.ncols() != fitted.x_train.ncols() {
            return Err(TimelyError::ShapeError {
                expected: format!("{} values per window", fitted.x_train.ncols()),
                actual: format!("{}", x.ncols()),
            });
        }

        let scores: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let neighbors = k_nearest_neighbors(x.row(i), &fitted.x_train, fitted.k, None);
                let lrd = local_reachability_density(&neighbors, &fitted.k_distances);
                lof_score(lrd, &neighbors, &fitted.lrd)
            })
            .collect();
        Ok(Array1::from_vec(scores))
    }
}

impl Default for LocalOutlierFactor {
    fn default() -> Self {
        Self::new(LofConfig::default())
    }
}

impl AnomalyDetector for LocalOutlierFactor {
    fn name(&self) -> &str {
        "lof"
    }

    fn fit(&mut self, x: &Array3<f64>) -> Result<()> {
        check_windows(x, None, None)?;
        let x = flatten_windows(x);
        let n = x.nrows();
        if n < 2 {
            return Err(TimelyError::TrainingError("LOF needs at least 2 windows".to_string()));
        }
        let k = self.config.n_neighbors.min(n - 1).max(1);

        let all_neighbors: Vec<Vec<(usize, f64)>> = (0..n)
            .into_par_iter()
            .map(|i| k_nearest_neighbors(x.row(i), &x, k, Some(i)))
            .collect();
        let k_distances: Array1<f64> = all_neighbors.iter().map(|nb| k_distance(nb)).collect();
        let lrd: Array1<f64> = all_neighbors
            .iter()
            .map(|nb| local_reachability_density(nb, &k_distances))
            .collect();
        let scores: Array1<f64> = all_neighbors
            .iter()
            .enumerate()
            .map(|(i, nb)| lof_score(lrd[i], nb, &lrd))
            .collect();

        self.threshold = contamination_threshold(&scores, self.config.contamination);
        self.fitted = Some(FittedLof {
            x_train: x,
            k,
            k_distances,
            lrd,
        });
        debug!(threshold = self.threshold, k, "LOF fitted");
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

    #[test]
    fn test_lof_basic() {
        // 10 normal windows of 1 step x 2 features and one outlier
        let mut data = Vec::new();
        for i in 0..10 {
            data.push((i % 5) as f64);
            data.push(((i % 5) + 1) as f64);
        }
        data.extend_from_slice(&[50.0, 50.0]);
        let x = Array3::from_shape_vec((11, 1, 2), data).unwrap();

        let mut lof = LocalOutlierFactor::new(LofConfig::default().with_n_neighbors(3).with_contamination(0.1));
        lof.fit(&x).unwrap();

        let scores = lof.score_samples(&x).unwrap();
        let normal_avg: f64 = scores.iter().take(10).sum::<f64>() / 10.0;
        assert!(scores[10] > normal_avg);
    }

    #[test]
    fn test_lof_flags_far_windows() {
        let mut data = Vec::new();
        for i in 0..15 {
            data.push((i % 6) as f64);
            data.push(((i + 1) % 6) as f64);
        }
        let train = Array3::from_shape_vec((15, 1, 2), data).unwrap();
        let mut lof = LocalOutlierFactor::new(LofConfig::default().with_n_neighbors(5).with_contamination(0.1));
        lof.fit(&train).unwrap();

        let test = Array3::from_shape_vec((2, 1, 2), vec![100.0, 100.0, -100.0, -100.0]).unwrap();
        let flags = lof.predict(&test).unwrap();
        assert!(flags.iter().all(|&f| f));
    }

    #[test]
    fn test_lof_requires_two_windows() {
        let mut lof = LocalOutlierFactor::default();
        assert!(lof.fit(&Array3::zeros((1, 2, 2))).is_err());
        assert!(matches!(
            LocalOutlierFactor::default().score_samples(&Array3::zeros((1, 2, 2))),
            Err(TimelyError::ModelNotFitted)
        ));
    }
}
