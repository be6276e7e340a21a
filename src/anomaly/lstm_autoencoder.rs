//! LSTM sequence autoencoder
//!
//! Encoder LSTMs compress a window to the final hidden state of the last
//! encoder layer; that vector is repeated once per time step and decoded by
//! LSTMs returning full sequences, followed by a dense layer applied at every
//! step to map back to the input features.

use super::{check_windows, Reconstructor, ThresholdConfig};
use crate::error::{Result, TimelyError};
use crate::nn::{
    fit_autoencoder, reconstruct_in_batches, Activation, Adam, Autoencoder, Dense, DenseGrads, Lstm, LstmGrads,
    TrainingConfig,
};
use ndarray::{s, Array2, Array3, Axis};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LstmAutoencoderConfig {
    pub encoder_units: Vec<usize>,
    pub decoder_units: Vec<usize>,
    /// Cell and hidden-state activation of every LSTM layer
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

impl Default for LstmAutoencoderConfig {
    fn default() -> Self {
        Self {
            encoder_units: vec![100, 64],
            decoder_units: vec![64, 100],
            activation: Activation::ReLU,
            learning_rate: 0.01,
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

impl LstmAutoencoderConfig {
    pub fn with_units(mut self, encoder: Vec<usize>, decoder: Vec<usize>) -> Self {
        self.encoder_units = encoder;
        self.decoder_units = decoder;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_threshold(mut self, threshold: ThresholdConfig) -> Self {
        self.threshold = threshold;
        self
    }

    pub(super) fn training(&self) -> TrainingConfig {
        TrainingConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            validation_split: self.validation_split,
            patience: self.patience,
        }
    }

    pub(super) fn tuning(&self) -> TrainingConfig {
        self.training().with_epochs(self.tune_epochs).with_patience(self.tune_patience)
    }

    pub(super) fn validate(&self) -> Result<()> {
        if self.encoder_units.is_empty() {
            return Err(TimelyError::invalid_parameter("encoder_units", "[]", "needs at least one layer"));
        }
        if let Some(&zero) = self.encoder_units.iter().chain(&self.decoder_units).find(|&&u| u == 0) {
            return Err(TimelyError::invalid_parameter("units", zero, "layer width must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct LstmNetwork {
    encoder: Vec<Lstm>,
    decoder: Vec<Lstm>,
    output: Dense,
    kernel: usize,
    n_features: usize,
}

/// Split `(n, T, F)` into `T` matrices of shape `(n, F)`
pub(super) fn time_major(x: &Array3<f64>) -> Vec<Array2<f64>> {
    x.axis_iter(Axis(1)).map(|step| step.to_owned()).collect()
}

pub(super) fn from_time_major(steps: &[Array2<f64>]) -> Array3<f64> {
    let n = steps.first().map_or(0, |s| s.nrows());
    let f = steps.first().map_or(0, |s| s.ncols());
    let mut out = Array3::zeros((n, steps.len(), f));
    for (t, step) in steps.iter().enumerate() {
        out.slice_mut(s![.., t, ..]).assign(step);
    }
    out
}

impl LstmNetwork {
    fn new(config: &LstmAutoencoderConfig, kernel: usize, n_features: usize, rng: &mut Xoshiro256PlusPlus) -> Self {
        let mut n_in = n_features;
        let encoder: Vec<Lstm> = config
            .encoder_units
            .iter()
            .map(|&units| {
                let layer = Lstm::new(n_in, units, config.activation, rng);
                n_in = units;
                layer
            })
            .collect();
        let decoder: Vec<Lstm> = config
            .decoder_units
            .iter()
            .map(|&units| {
                let layer = Lstm::new(n_in, units, config.activation, rng);
                n_in = units;
                layer
            })
            .collect();
        let output = Dense::new(n_in, n_features, Activation::Linear, rng);

        Self {
            encoder,
            decoder,
            output,
            kernel,
            n_features,
        }
    }

    fn forward(&self, x: &Array3<f64>) -> Array3<f64> {
        let mut seq = time_major(x);
        let last = self.encoder.len() - 1;
        for (l, layer) in self.encoder.iter().enumerate() {
            seq = layer.forward(&seq);
            if l == last {
                let code = seq.pop().unwrap_or_else(|| Array2::zeros((x.len_of(Axis(0)), layer.units())));
                seq = vec![code; self.kernel];
            }
        }
        for layer in &self.decoder {
            seq = layer.forward(&seq);
        }
        let out: Vec<Array2<f64>> = seq.iter().map(|h| self.output.forward(h)).collect();
        from_time_major(&out)
    }
}

impl Autoencoder for LstmNetwork {
    fn train_batch(&mut self, x: &Array3<f64>, optimizer: &mut Adam) -> Result<f64> {
        let steps = self.kernel;
        let n = x.len_of(Axis(0));
        let inputs = time_major(x);

        // Encoder; the last layer only exposes its final state
        let mut encoder_caches = Vec::with_capacity(self.encoder.len());
        let mut seq = inputs.clone();
        for layer in &self.encoder {
            let (hs, cache) = layer.forward_train(&seq);
            encoder_caches.push(cache);
            seq = hs;
        }
        let code = seq.pop().ok_or_else(|| TimelyError::TrainingError("Empty window".to_string()))?;
        let code_units = code.ncols();

        let mut seq = vec![code; steps];
        let mut decoder_caches = Vec::with_capacity(self.decoder.len());
        for layer in &self.decoder {
            let (hs, cache) = layer.forward_train(&seq);
            decoder_caches.push(cache);
            seq = hs;
        }

        let mut output_caches = Vec::with_capacity(steps);
        let mut outputs = Vec::with_capacity(steps);
        for h in &seq {
            let (y, cache) = self.output.forward_train(h);
            outputs.push(y);
            output_caches.push(cache);
        }

        let denom = (n * steps * self.n_features).max(1) as f64;
        let mut loss = 0.0;
        let mut grad_seq = Vec::with_capacity(steps);
        let mut output_grads = DenseGrads {
            weights: Array2::zeros((self.output.n_inputs(), self.output.n_outputs())),
            bias: ndarray::Array1::zeros(self.output.n_outputs()),
        };
        for t in 0..steps {
            let diff = &outputs[t] - &inputs[t];
            loss += diff.mapv(|v| v * v).sum();
            let (grad_h, g) = self.output.backward(&output_caches[t], &(diff * (2.0 / denom)));
            output_grads.weights += &g.weights;
            output_grads.bias += &g.bias;
            grad_seq.push(grad_h);
        }
        loss /= denom;

        let mut decoder_grads: Vec<LstmGrads> = Vec::with_capacity(self.decoder.len());
        for (layer, cache) in self.decoder.iter().zip(&decoder_caches).rev() {
            let (grad_in, g) = layer.backward(cache, &grad_seq);
            decoder_grads.push(g);
            grad_seq = grad_in;
        }
        decoder_grads.reverse();

        // Repeat vector: the code receives the sum over steps
        let mut grad_code: Array2<f64> = Array2::zeros((n, code_units));
        for g in &grad_seq {
            grad_code += g;
        }
        let mut grad_seq: Vec<Array2<f64>> = vec![Array2::zeros((n, code_units)); steps];
        if let Some(last) = grad_seq.last_mut() {
            *last = grad_code;
        }

        let mut encoder_grads: Vec<LstmGrads> = Vec::with_capacity(self.encoder.len());
        for (layer, cache) in self.encoder.iter().zip(&encoder_caches).rev() {
            let (grad_in, g) = layer.backward(cache, &grad_seq);
            encoder_grads.push(g);
            grad_seq = grad_in;
        }
        encoder_grads.reverse();

        optimizer.next_step();
        let mut slot = 0;
        for (layer, g) in self.encoder.iter_mut().zip(&encoder_grads) {
            slot = layer.update(g, optimizer, slot);
        }
        for (layer, g) in self.decoder.iter_mut().zip(&decoder_grads) {
            slot = layer.update(g, optimizer, slot);
        }
        self.output.update(&output_grads, optimizer, slot);

        Ok(loss)
    }

    fn reconstruct_batch(&self, x: &Array3<f64>) -> Array3<f64> {
        self.forward(x)
    }
}

/// LSTM autoencoder reconstructing `(kernel, n_features)` windows
#[derive(Debug, Clone)]
pub struct LstmAutoencoder {
    config: LstmAutoencoderConfig,
    network: Option<LstmNetwork>,
    optimizer: Adam,
    rng: Xoshiro256PlusPlus,
}

impl LstmAutoencoder {
    pub fn new(config: LstmAutoencoderConfig) -> Self {
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

    pub fn config(&self) -> &LstmAutoencoderConfig {
        &self.config
    }
}

impl Default for LstmAutoencoder {
    fn default() -> Self {
        Self::new(LstmAutoencoderConfig::default())
    }
}

impl Reconstructor for LstmAutoencoder {
    fn name(&self) -> &'static str {
        "lstm"
    }

    fn fit(&mut self, x: &Array3<f64>) -> Result<()> {
        self.config.validate()?;
        check_windows(x, None, None)?;
        let (n, kernel, n_features) = x.dim();
        info!(windows = n, kernel, n_features, "Training LSTM autoencoder");

        let mut network = LstmNetwork::new(&self.config, kernel, n_features, &mut self.rng);
        self.optimizer = Adam::new(self.config.learning_rate);
        let history = fit_autoencoder(&mut network, x, &self.config.training(), &mut self.optimizer, &mut self.rng)?;
        info!(
            epochs = history.epochs_run(),
            loss = history.loss.last().copied().unwrap_or(f64::NAN),
            val_loss = history.val_loss.last().copied().unwrap_or(f64::NAN),
            "LSTM autoencoder trained"
        );

        self.network = Some(network);
        Ok(())
    }

    fn tune(&mut self, x: &Array3<f64>) -> Result<()> {
        let network = self.network.as_mut().ok_or(TimelyError::ModelNotFitted)?;
        check_windows(x, Some(network.n_features), Some(network.kernel))?;
        let history = fit_autoencoder(network, x, &self.config.tuning(), &mut self.optimizer, &mut self.rng)?;
        info!(epochs = history.epochs_run(), "LSTM autoencoder tuned");
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
