//! Block resampling of high-rate recordings

use crate::data::Recording;
use crate::error::{Result, TimelyError};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Statistic computed over one block of samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStat {
    Mean,
    Std,
    Min,
    Max,
    Rms,
    PeakToPeak,
    Skew,
    Kurtosis,
}

impl BlockStat {
    pub fn name(&self) -> &'static str {
        match self {
            BlockStat::Mean => "mean",
            BlockStat::Std => "std",
            BlockStat::Min => "min",
            BlockStat::Max => "max",
            BlockStat::Rms => "rms",
            BlockStat::PeakToPeak => "peak_to_peak",
            BlockStat::Skew => "skew",
            BlockStat::Kurtosis => "kurtosis",
        }
    }

    /// Default statistics used for feature-extracting resampling
    pub fn default_set() -> Vec<BlockStat> {
        vec![BlockStat::Mean, BlockStat::Std, BlockStat::Min, BlockStat::Max, BlockStat::Rms]
    }

    fn compute(&self, block: ArrayView1<f64>) -> f64 {
        let n = block.len() as f64;
        let mean = block.sum() / n;
        let central_moment = |k: i32| block.iter().map(|&v| (v - mean).powi(k)).sum::<f64>() / n;

        match self {
            BlockStat::Mean => mean,
            BlockStat::Std => central_moment(2).sqrt(),
            BlockStat::Min => block.iter().copied().fold(f64::INFINITY, f64::min),
            BlockStat::Max => block.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            BlockStat::Rms => (block.iter().map(|v| v * v).sum::<f64>() / n).sqrt(),
            BlockStat::PeakToPeak => {
                let (lo, hi) = block
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
                hi - lo
            }
            BlockStat::Skew => {
                let var = central_moment(2);
                if var < 1e-12 { 0.0 } else { central_moment(3) / var.powf(1.5) }
            }
            BlockStat::Kurtosis => {
                let var = central_moment(2);
                if var < 1e-12 { 0.0 } else { central_moment(4) / (var * var) - 3.0 }
            }
        }
    }
}

fn check_rate(rate: usize) -> Result<()> {
    if rate == 0 {
        return Err(TimelyError::invalid_parameter("resample_rate", rate, "must be at least 1"));
    }
    Ok(())
}

/// Replace every block of `rate` consecutive samples by its mean.
/// A trailing partial block is averaged as well.
pub fn resample(recording: &Recording, rate: usize) -> Result<Recording> {
    check_rate(rate)?;
    if rate == 1 {
        return Ok(recording.clone());
    }

    let values = recording.values();
    let n_blocks = (values.nrows() + rate - 1) / rate;
    let mut out = Array2::zeros((n_blocks, values.ncols()));

    for (mut row, block) in out
        .axis_iter_mut(Axis(0))
        .zip(values.axis_chunks_iter(Axis(0), rate))
    {
        if let Some(mean) = block.mean_axis(Axis(0)) {
            row.assign(&mean);
        }
    }

    recording.with_values(out)
}

/// Summarise every block of `rate` samples with a set of statistics.
/// Output columns are `{column}_{stat}`, grouped by source column.
pub fn resample_with_features(
    recording: &Recording,
    rate: usize,
    stats: &[BlockStat],
) -> Result<Recording> {
    check_rate(rate)?;
    if stats.is_empty() {
        return Err(TimelyError::invalid_parameter("stats", "[]", "at least one statistic is required"));
    }

    let values = recording.values();
    let n_blocks = (values.nrows() + rate - 1) / rate;
    let n_out = values.ncols() * stats.len();
    let mut out = Array2::zeros((n_blocks, n_out));

    for (mut row, block) in out
        .axis_iter_mut(Axis(0))
        .zip(values.axis_chunks_iter(Axis(0), rate))
    {
        for (c, column) in block.axis_iter(Axis(1)).enumerate() {
            for (s, stat) in stats.iter().enumerate() {
                row[c * stats.len() + s] = stat.compute(column);
            }
        }
    }

    let columns = recording
        .columns()
        .iter()
        .flat_map(|name| stats.iter().map(move |stat| format!("{}_{}", name, stat.name())))
        .collect();

    Recording::new(columns, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ramp() -> Recording {
        let values = Array2::from_shape_fn((7, 2), |(r, c)| (r as f64) * if c == 0 { 1.0 } else { -1.0 });
        Recording::new(vec!["a".into(), "b".into()], values).unwrap()
    }

    #[test]
    fn test_resample_block_mean() {
        let out = resample(&ramp(), 3).unwrap();
        // blocks: [0,1,2] [3,4,5] [6]
        assert_eq!(out.values(), &array![[1.0, -1.0], [4.0, -4.0], [6.0, -6.0]]);
        assert_eq!(out.columns(), ramp().columns());
    }

    #[test]
    fn test_resample_identity_and_zero() {
        assert_eq!(resample(&ramp(), 1).unwrap(), ramp());
        assert!(resample(&ramp(), 0).is_err());
    }

    #[test]
    fn test_resample_with_features() {
        let out = resample_with_features(&ramp(), 4, &[BlockStat::Mean, BlockStat::PeakToPeak]).unwrap();
        assert_eq!(
            out.columns(),
            &["a_mean", "a_peak_to_peak", "b_mean", "b_peak_to_peak"].map(String::from)
        );
        assert_eq!(out.len(), 2);
        assert!((out.values()[[0, 0]] - 1.5).abs() < 1e-12);
        assert!((out.values()[[0, 1]] - 3.0).abs() < 1e-12);
        assert!((out.values()[[1, 2]] + 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_block_stats() {
        let block = array![1.0, 2.0, 3.0, 4.0];
        assert!((BlockStat::Rms.compute(block.view()) - 7.5f64.sqrt()).abs() < 1e-12);
        assert!((BlockStat::Std.compute(block.view()) - 1.25f64.sqrt()).abs() < 1e-12);
        assert!(BlockStat::Skew.compute(block.view()).abs() < 1e-12);
        assert_eq!(BlockStat::Kurtosis.compute(array![2.0, 2.0].view()), 0.0);
    }
}
