//! Per-sample anomaly flags for a single recording

use crate::anomaly::AnomalyDetector;
use crate::data::Recording;
use crate::error::Result;
use crate::windowing::sliding_window_matrix;
use ndarray::{s, Array1};
use tracing::debug;

/// Flag every sample of `recording` as anomalous (1.0) or normal (0.0).
///
/// With `with_skip`, windows do not overlap (stride = kernel) and each window
/// verdict covers its own `kernel` samples from the start of the series.
/// Otherwise windows advance one sample at a time and verdict `j` lands on
/// the last sample of window `j`. Samples no window covers stay 0.
pub fn predict_anomaly(
    recording: &Recording,
    detector: &dyn AnomalyDetector,
    kernel: usize,
    with_skip: bool,
) -> Result<Array1<f64>> {
    let stride = if with_skip { kernel } else { 1 };
    let windows = sliding_window_matrix(recording.values(), kernel, stride)?;
    let n = recording.len();
    let mut flags = Array1::zeros(n);
    if windows.is_empty() {
        return Ok(flags);
    }

    let verdicts = detector.predict(&windows)?;
    debug!(
        windows = verdicts.len(),
        anomalies = verdicts.iter().filter(|&&v| v).count(),
        "Per-sample prediction"
    );

    let expanded: Array1<f64> = verdicts
        .iter()
        .flat_map(|&v| std::iter::repeat(if v { 1.0 } else { 0.0 }).take(stride))
        .collect();
    let covered = expanded.len();
    if with_skip {
        flags.slice_mut(s![..covered]).assign(&expanded);
    } else {
        flags.slice_mut(s![n - covered..]).assign(&expanded);
    }
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use ndarray::{Array2, Array3, Axis};

    /// Flags windows whose mean exceeds 0.5
    struct MeanAbove;

    impl AnomalyDetector for MeanAbove {
        fn name(&self) -> &str {
            "mean_above"
        }

        fn fit(&mut self, _x: &Array3<f64>) -> Result<()> {
            Ok(())
        }

        fn score_samples(&self, x: &Array3<f64>) -> Result<Array1<f64>> {
            Ok(x.map_axis(Axis(1), |w| w.mean().unwrap_or(0.0)).column(0).to_owned())
        }

        fn threshold(&self) -> f64 {
            0.5
        }
    }

    fn recording(values: &[f64]) -> Recording {
        Recording::from_values(Array2::from_shape_vec((values.len(), 1), values.to_vec()).unwrap())
    }

    #[test]
    fn test_with_skip_repeats_from_start() {
        let rec = recording(&[0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
        let flags = predict_anomaly(&rec, &MeanAbove, 2, true).unwrap();
        // Three windows cover six samples; the seventh is uncovered
        assert_eq!(flags.to_vec(), vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_without_skip_right_aligned() {
        let rec = recording(&[0.0, 0.0, 1.0, 1.0, 0.0]);
        let flags = predict_anomaly(&rec, &MeanAbove, 2, false).unwrap();
        // Window means: 0, 0.5, 1, 0.5
        assert_eq!(flags.to_vec(), vec![0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_short_recording_is_all_zero() {
        let rec = recording(&[1.0, 1.0]);
        let flags = predict_anomaly(&rec, &MeanAbove, 5, true).unwrap();
        assert_eq!(flags.to_vec(), vec![0.0, 0.0]);
    }
}
