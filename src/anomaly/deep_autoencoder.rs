//! Dense autoencoder over flattened windows

use super::{check_windows, Reconstructor, ThresholdConfig};
use crate::error::{Result, TimelyError};
use crate::nn::{fit_autoencoder, reconstruct_in_batches, Activation, Adam, Autoencoder, Dense, TrainingConfig};
use crate::windowing::flatten_windows;
use ndarray::{Array2, Array3};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepAutoencoderConfig {
    /// Hidden layer widths; the output layer maps back to `kernel * n_features`
    pub hidden_units: Vec<usize>,
    pub activation: Activation,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f64,
    pub patience: usize,
    pub tune_epochs: usize,
    pub tune_patience: usize,
    pub random_state: Option<u64>,
    #[serde(flatten)]
    pub threshold: ThresholdConfig,
}

impl Default for DeepAutoencoderConfig {
    fn default() -> Self {
        Self {
            hidden_units: vec![64, 32, 64],
            activation: Activation::ReLU,
            learning_rate: 0.001,
            epochs: 100,
            batch_size: 128,
            validation_split: 0.1,
            patience: 20,
            tune_epochs: 50,
            tune_patience: 10,
            random_state: Some(42),
            threshold: ThresholdConfig::default(),
        }
    }
}

impl DeepAutoencoderConfig {
    pub fn with_hidden_units(mut self, units: Vec<usize>) -> Self {
        self.hidden_units = units;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    fn training(&self) -> TrainingConfig {
        TrainingConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            validation_split: self.validation_split,
            patience: self.patience,
        }
    }

    fn tuning(&self) -> TrainingConfig {
        self.training().with_epochs(self.tune_epochs).with_patience(self.tune_patience)
    }
}

#[derive(Debug, Clone)]
struct DenseNetwork {
    layers: Vec<Dense>,
    kernel: usize,
    n_features: usize,
}

impl DenseNetwork {
    fn new(config: &DeepAutoencoderConfig, kernel: usize, n_features: usize, rng: &mut Xoshiro256PlusPlus) -> Self {
        let width = kernel * n_features;
        let mut layers = Vec::with_capacity(config.hidden_units.len() + 1);
        let mut n_in = width;
        for &units in &config.hidden_units {
            layers.push(Dense::new(n_in, units, config.activation, rng));
            n_in = units;
        }
        layers.push(Dense::new(n_in, width, Activation::Linear, rng));
        Self {
            layers,
            kernel,
            n_features,
        }
    }

    fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        self.layers.iter().fold(x.clone(), |h, layer| layer.forward(&h))
    }

    fn to_windows(&self, flat: &Array2<f64>) -> Array3<f64> {
        let f = self.n_features;
        Array3::from_shape_fn((flat.nrows(), self.kernel, f), |(i, t, c)| flat[[i, t * f + c]])
    }
}

impl Autoencoder for DenseNetwork {
    fn train_batch(&mut self, x: &Array3<f64>, optimizer: &mut Adam) -> Result<f64> {
        let target = flatten_windows(x);

        let mut caches = Vec::with_capacity(self.layers.len());
        let mut h = target.clone();
        for layer in &self.layers {
            let (out, cache) = layer.forward_train(&h);
            caches.push(cache);
            h = out;
        }

        let diff = &h - &target;
        let n = diff.len().max(1) as f64;
        let loss = diff.mapv(|v| v * v).sum() / n;
        let mut grad = diff * (2.0 / n);

        let mut grads = Vec::with_capacity(self.layers.len());
        for (layer, cache) in self.layers.iter().zip(&caches).rev() {
            let (grad_in, layer_grads) = layer.backward(cache, &grad);
            grads.push(layer_grads);
            grad = grad_in;
        }
        grads.reverse();

        optimizer.next_step();
        let mut slot = 0;
        for (layer, layer_grads) in self.layers.iter_mut().zip(&grads) {
            slot = layer.update(layer_grads, optimizer, slot);
        }

        Ok(loss)
    }

    fn reconstruct_batch(&self, x: &Array3<f64>) -> Array3<f64> {
        self.to_windows(&self.forward(&flatten_windows(x)))
    }
}

/// Fully connected autoencoder; each window is one flat input vector
#[derive(Debug, Clone)]
pub struct DeepAutoencoder {
    config: DeepAutoencoderConfig,
    network: Option<DenseNetwork>,
    optimizer: Adam,
    rng: Xoshiro256PlusPlus,
}

impl DeepAutoencoder {
    pub fn new(config: DeepAutoencoderConfig) -> Self {
        let rng = match config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        let optimizer = Adam::new(config.learning_rate);
        Self {
            config,
            network: None,
            optimizer,
            rng,
        }
    }

    pub fn config(&self) -> &DeepAutoencoderConfig {
        &self.config
    }
}

impl Default for DeepAutoencoder {
    fn default() -> Self {
        Self::new(DeepAutoencoderConfig::default())
    }
}

impl Reconstructor for DeepAutoencoder {
    fn name(&self) -> &'static str {
        "deep"
    }

    fn fit(&mut self, x: &Array3<f64>) -> Result<()> {
        check_windows(x, None, None)?;
        let (_, kernel, n_features) = x.dim();

        let mut network = DenseNetwork::new(&self.config, kernel, n_features, &mut self.rng);
        self.optimizer = Adam::new(self.config.learning_rate);
        let history = fit_autoencoder(&mut network, x, &self.config.training(), &mut self.optimizer, &mut self.rng)?;
        info!(
            epochs = history.epochs_run(),
            loss = history.loss.last().copied().unwrap_or(f64::NAN),
            "Deep autoencoder trained"
        );

        self.network = Some(network);
        Ok(())
    }

    fn tune(&mut self, x: &Array3<f64>) -> Result<()> {
        let network = self.network.as_mut().ok_or(TimelyError::ModelNotFitted)?;
        check_windows(x, Some(network.n_features), Some(network.kernel))?;
        let history = fit_autoencoder(network, x, &self.config.tuning(), &mut self.optimizer, &mut self.rng)?;
        info!(epochs = history.epochs_run(), "Deep autoencoder tuned");
        Ok(())
    }

    fn reconstruct(&self, x: &Array3<f64>) -> Result<Array3<f64>> {
        let network = self.network.as_ref().ok_or(TimelyError::ModelNotFitted)?;
        check_windows(x, Some(network.n_features), Some(network.kernel))?;
        reconstruct_in_batches(network, x, self.config.batch_size)
    }

    fn threshold_config(&self) -> ThresholdConfig {
        self.config.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{AnomalyDetector, ReconstructionDetector};
    use crate::nn::mse;

    fn sine_windows(n: usize) -> Array3<f64> {
        Array3::from_shape_fn((n, 8, 2), |(i, t, f)| {
            let phase = (i + t) as f64 * 0.4;
            if f == 0 { phase.sin() * 0.5 } else { phase.cos() * 0.5 }
        })
    }

    fn small_config() -> DeepAutoencoderConfig {
        DeepAutoencoderConfig::default()
            .with_hidden_units(vec![8, 4, 8])
            .with_epochs(60)
            .with_learning_rate(0.01)
    }

    #[test]
    fn test_training_reduces_reconstruction_error() {
        let x = sine_windows(64);
        let mut model = DeepAutoencoder::new(small_config().with_epochs(1));
        model.fit(&x).unwrap();
        let early = mse(&x, &model.reconstruct(&x).unwrap());

        let mut model = DeepAutoencoder::new(small_config());
        model.fit(&x).unwrap();
        let trained = mse(&x, &model.reconstruct(&x).unwrap());

        assert!(trained < early);
    }

    #[test]
    fn test_tune_keeps_threshold_monotone() {
        let x = sine_windows(40);
        let mut detector = ReconstructionDetector::new(DeepAutoencoder::new(small_config().with_epochs(5)));
        detector.fit(&x).unwrap();
        let before = detector.threshold();
        detector.tune(&x).unwrap();
        assert!(detector.threshold() >= before);
        assert_eq!(detector.reconstruct(&x).unwrap().dim(), x.dim());
    }

    #[test]
    fn test_unfitted_model() {
        let mut model = DeepAutoencoder::default();
        let x = sine_windows(4);
        assert!(matches!(model.reconstruct(&x), Err(TimelyError::ModelNotFitted)));
        assert!(matches!(model.tune(&x), Err(TimelyError::ModelNotFitted)));
    }
}
