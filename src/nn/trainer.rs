//! Mini-batch training loop for reconstruction models

use super::Adam;
use crate::error::{Result, TimelyError};
use ndarray::{s, Array3, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A network trained to reproduce its input windows
pub trait Autoencoder {
    /// Forward and backward pass on one batch followed by an optimizer step.
    /// Returns the batch loss before the update.
    fn train_batch(&mut self, x: &Array3<f64>, optimizer: &mut Adam) -> Result<f64>;

    /// Reconstruct a batch of windows
    fn reconstruct_batch(&self, x: &Array3<f64>) -> Array3<f64>;
}

/// Training loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Maximum number of epochs
    pub epochs: usize,
    /// Mini-batch size
    pub batch_size: usize,
    /// Fraction of windows, taken from the end, held out for validation
    pub validation_split: f64,
    /// Epochs without improvement of the monitored loss before stopping
    pub patience: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 128,
            validation_split: 0.1,
            patience: 20,
        }
    }
}

impl TrainingConfig {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }
}

/// Per-epoch losses of one training run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub val_loss: Vec<f64>,
    /// Epoch at which early stopping triggered, if it did
    pub stopped_epoch: Option<usize>,
}

impl TrainingHistory {
    pub fn epochs_run(&self) -> usize {
        self.loss.len()
    }
}

/// Mean squared error over all elements
pub fn mse(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
    let n = a.len().max(1) as f64;
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f64>() / n
}

/// Reconstruct `x` in chunks of `batch_size` windows
pub fn reconstruct_in_batches<M: Autoencoder + ?Sized>(
    model: &M,
    x: &Array3<f64>,
    batch_size: usize,
) -> Result<Array3<f64>> {
    let n = x.len_of(Axis(0));
    if n == 0 {
        return Ok(x.clone());
    }

    let parts: Vec<Array3<f64>> = x
        .axis_chunks_iter(Axis(0), batch_size.max(1))
        .map(|chunk| model.reconstruct_batch(&chunk.to_owned()))
        .collect();
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    Ok(ndarray::concatenate(Axis(0), &views)?)
}

/// Train `model` to reconstruct `x`.
///
/// The last `validation_split` fraction of windows is held out (no shuffling
/// before the split). Training windows are reshuffled every epoch. Training
/// stops early when the validation loss (training loss if there is no
/// validation set) has not improved for `patience` epochs.
pub fn fit_autoencoder<M: Autoencoder>(
    model: &mut M,
    x: &Array3<f64>,
    config: &TrainingConfig,
    optimizer: &mut Adam,
    rng: &mut impl Rng,
) -> Result<TrainingHistory> {
    let n = x.len_of(Axis(0));
    if n == 0 {
        return Err(TimelyError::TrainingError("No training windows".to_string()));
    }
    if config.batch_size == 0 {
        return Err(TimelyError::invalid_parameter("batch_size", 0, "must be at least 1"));
    }
    if !(0.0..1.0).contains(&config.validation_split) {
        return Err(TimelyError::invalid_parameter(
            "validation_split",
            config.validation_split,
            "must be in [0, 1)",
        ));
    }

    let mut train_size = (n as f64 * (1.0 - config.validation_split)).floor() as usize;
    if train_size == 0 {
        train_size = n;
    }
    let x_train = x.slice(s![..train_size, .., ..]).to_owned();
    let x_val = x.slice(s![train_size.., .., ..]).to_owned();
    let has_validation = x_val.len_of(Axis(0)) > 0;

    let mut history = TrainingHistory::default();
    let mut best = f64::INFINITY;
    let mut wait = 0usize;
    let mut indices: Vec<usize> = (0..train_size).collect();

    for epoch in 0..config.epochs {
        indices.shuffle(rng);

        let mut epoch_loss = 0.0;
        for batch in indices.chunks(config.batch_size) {
            let x_batch = x_train.select(Axis(0), batch);
            let loss = model.train_batch(&x_batch, optimizer)?;
            if !loss.is_finite() {
                return Err(TimelyError::TrainingError(format!(
                    "Loss diverged at epoch {}",
                    epoch + 1
                )));
            }
            epoch_loss += loss * batch.len() as f64;
        }
        let loss = epoch_loss / train_size as f64;
        history.loss.push(loss);

        let monitored = if has_validation {
            let reconstructed = reconstruct_in_batches(model, &x_val, config.batch_size)?;
            let val_loss = mse(&x_val, &reconstructed);
            history.val_loss.push(val_loss);
            debug!(epoch = epoch + 1, loss, val_loss, "epoch finished");
            val_loss
        } else {
            debug!(epoch = epoch + 1, loss, "epoch finished");
            loss
        };

        if monitored < best {
            best = monitored;
            wait = 0;
        } else {
            wait += 1;
            if wait >= config.patience {
                info!(epoch = epoch + 1, best_loss = best, "Early stopping");
                history.stopped_epoch = Some(epoch + 1);
                break;
            }
        }
    }

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    /// Learns one offset per feature: reconstruction = offset
    struct MeanModel {
        offset: Array1<f64>,
    }

    impl Autoencoder for MeanModel {
        fn train_batch(&mut self, x: &Array3<f64>, optimizer: &mut Adam) -> Result<f64> {
            let pred = self.reconstruct_batch(x);
            let loss = mse(x, &pred);
            let n = x.len() as f64;
            let grad = (&pred - x).sum_axis(Axis(0)).sum_axis(Axis(0)) * (2.0 / n);
            optimizer.next_step();
            optimizer.update(0, &mut self.offset, &grad);
            Ok(loss)
        }

        fn reconstruct_batch(&self, x: &Array3<f64>) -> Array3<f64> {
            let mut out = Array3::zeros(x.raw_dim());
            for mut row in out.lanes_mut(Axis(2)) {
                row.assign(&self.offset);
            }
            out
        }
    }

    fn data() -> Array3<f64> {
        Array3::from_shape_fn((50, 4, 2), |(i, _, f)| if f == 0 { 3.0 } else { -1.0 + (i % 2) as f64 * 0.01 })
    }

    #[test]
    fn test_fit_converges_and_records_history() {
        let mut model = MeanModel { offset: Array1::zeros(2) };
        let mut optimizer = Adam::new(0.1);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let config = TrainingConfig { epochs: 200, batch_size: 8, validation_split: 0.2, patience: 200 };

        let history = fit_autoencoder(&mut model, &data(), &config, &mut optimizer, &mut rng).unwrap();

        assert_eq!(history.loss.len(), 200);
        assert_eq!(history.val_loss.len(), 200);
        assert!(history.loss.last().unwrap() < &history.loss[0]);
        assert!((model.offset[0] - 3.0).abs() < 0.1);
    }

    #[test]
    fn test_early_stopping() {
        let mut model = MeanModel { offset: Array1::zeros(2) };
        let mut optimizer = Adam::new(0.0);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let config = TrainingConfig { epochs: 100, batch_size: 16, validation_split: 0.1, patience: 3 };

        // A zero learning rate never improves after the first epoch
        let history = fit_autoencoder(&mut model, &data(), &config, &mut optimizer, &mut rng).unwrap();
        assert_eq!(history.stopped_epoch, Some(4));
        assert_eq!(history.epochs_run(), 4);
    }

    #[test]
    fn test_empty_input_rejected() {
        let mut model = MeanModel { offset: Array1::zeros(2) };
        let mut optimizer = Adam::new(0.1);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let empty = Array3::zeros((0, 4, 2));
        let result = fit_autoencoder(&mut model, &empty, &TrainingConfig::default(), &mut optimizer, &mut rng);
        assert!(matches!(result, Err(TimelyError::TrainingError(_))));
    }

    #[test]
    fn test_reconstruct_in_batches_preserves_order() {
        let model = MeanModel { offset: Array1::from_vec(vec![1.0, 2.0]) };
        let x = data();
        let out = reconstruct_in_batches(&model, &x, 7).unwrap();
        assert_eq!(out.dim(), x.dim());
        assert_eq!(out[[49, 3, 1]], 2.0);
    }
}
