//! Data preprocessing module
//!
//! - Block resampling (plain means or per-block statistics)
//! - Column scaling fitted on the training recordings and shared with test data

mod resample;
mod scaler;

pub use resample::{resample, resample_with_features, BlockStat};
pub use scaler::{Scaler, ScalerType};

use crate::data::Recording;
use crate::error::Result;
use rayon::prelude::*;

/// Fit one scaler on the concatenation of `recordings`
pub fn fit_scaler(recordings: &[Recording], scaler_type: ScalerType) -> Result<Scaler> {
    let joined = Recording::concat(recordings)?;
    let mut scaler = Scaler::new(scaler_type);
    scaler.fit(joined.values())?;
    Ok(scaler)
}

/// Apply a fitted scaler to every recording, keeping column names
pub fn apply_scaler(scaler: &Scaler, recordings: &[Recording]) -> Result<Vec<Recording>> {
    recordings
        .par_iter()
        .map(|rec| rec.with_values(scaler.transform(rec.values())?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_scaler_fitted_on_all_training_recordings() {
        let a = Recording::from_values(array![[0.0], [2.0]]);
        let b = Recording::from_values(array![[4.0], [10.0]]);

        let scaler = fit_scaler(&[a.clone(), b.clone()], ScalerType::MinMax).unwrap();
        let scaled = apply_scaler(&scaler, &[a, b]).unwrap();

        assert_eq!(scaled[0].values(), &array![[0.0], [0.2]]);
        assert_eq!(scaled[1].values(), &array![[0.4], [1.0]]);
    }
}
