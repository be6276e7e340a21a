//! Bidirectional LSTM sequence autoencoder
//!
//! Same layout as the LSTM autoencoder, but every layer runs one LSTM forward
//! and one over the reversed window and concatenates both hidden states. The
//! code vector joins the forward state at the last step with the backward
//! state at the first step.

use super::lstm_autoencoder::{from_time_major, time_major};
use super::{check_windows, LstmAutoencoderConfig, Reconstructor, ThresholdConfig};
use crate::error::{Result, TimelyError};
use crate::nn::{
    fit_autoencoder, reconstruct_in_batches, Activation, Adam, Autoencoder, Dense, DenseGrads, Lstm, LstmCache,
    LstmGrads,
};
use ndarray::{s, Array1, Array2, Array3, Axis};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::info;

/// Hyperparameters are shared with the unidirectional model; unit counts are per direction
pub type BiLstmAutoencoderConfig = LstmAutoencoderConfig;

fn concat_columns(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
    let (n, wa) = a.dim();
    let mut out = Array2::zeros((n, wa + b.ncols()));
    out.slice_mut(s![.., ..wa]).assign(a);
    out.slice_mut(s![.., wa..]).assign(b);
    out
}

fn reversed(seq: &[Array2<f64>]) -> Vec<Array2<f64>> {
    seq.iter().rev().cloned().collect()
}

#[derive(Debug, Clone)]
struct Bidirectional {
    forward: Lstm,
    backward: Lstm,
}

struct BidirectionalCache {
    forward: LstmCache,
    backward: LstmCache,
}

impl Bidirectional {
    fn new(n_in: usize, units: usize, activation: Activation, rng: &mut Xoshiro256PlusPlus) -> Self {
        Self {
            forward: Lstm::new(n_in, units, activation, rng),
            backward: Lstm::new(n_in, units, activation, rng),
        }
    }

    fn units(&self) -> usize {
        self.forward.units()
    }

    fn merge(fwd: &[Array2<f64>], bwd_reversed: &[Array2<f64>]) -> Vec<Array2<f64>> {
        fwd.iter()
            .zip(bwd_reversed.iter().rev())
            .map(|(f, b)| concat_columns(f, b))
            .collect()
    }

    /// `[forward_t, backward_t]` at every step, both aligned to input time
    fn forward(&self, xs: &[Array2<f64>]) -> Vec<Array2<f64>> {
        Self::merge(&self.forward.forward(xs), &self.backward.forward(&reversed(xs)))
    }

    fn forward_train(&self, xs: &[Array2<f64>]) -> (Vec<Array2<f64>>, BidirectionalCache) {
        let (fwd, forward) = self.forward.forward_train(xs);
        let (bwd, backward) = self.backward.forward_train(&reversed(xs));
        (Self::merge(&fwd, &bwd), BidirectionalCache { forward, backward })
    }

    fn backward(
        &self,
        cache: &BidirectionalCache,
        grad_hidden: &[Array2<f64>],
    ) -> (Vec<Array2<f64>>, (LstmGrads, LstmGrads)) {
        let u = self.units();
        let grad_fwd: Vec<Array2<f64>> = grad_hidden.iter().map(|g| g.slice(s![.., ..u]).to_owned()).collect();
        let grad_bwd: Vec<Array2<f64>> = grad_hidden.iter().rev().map(|g| g.slice(s![.., u..]).to_owned()).collect();

        let (dx_fwd, g_fwd) = self.forward.backward(&cache.forward, &grad_fwd);
        let (dx_bwd, g_bwd) = self.backward.backward(&cache.backward, &grad_bwd);
        let dx = dx_fwd.iter().zip(dx_bwd.iter().rev()).map(|(a, b)| a + b).collect();
        (dx, (g_fwd, g_bwd))
    }

    fn update(&mut self, grads: &(LstmGrads, LstmGrads), optimizer: &mut Adam, slot: usize) -> usize {
        let slot = self.forward.update(&grads.0, optimizer, slot);
        self.backward.update(&grads.1, optimizer, slot)
    }

    /// Final state of each direction
    fn code(&self, merged: &[Array2<f64>]) -> Option<Array2<f64>> {
        let u = self.units();
        let last = merged.last()?;
        let first = merged.first()?;
        Some(concat_columns(&last.slice(s![.., ..u]).to_owned(), &first.slice(s![.., u..]).to_owned()))
    }

    /// Inverse of [`Self::code`]: route the code gradient to the steps it came from
    fn code_grad(&self, grad_code: &Array2<f64>, steps: usize) -> Vec<Array2<f64>> {
        let u = self.units();
        let n = grad_code.nrows();
        let mut grads = vec![Array2::zeros((n, 2 * u)); steps];
        if steps > 0 {
            grads[steps - 1].slice_mut(s![.., ..u]).assign(&grad_code.slice(s![.., ..u]));
            grads[0].slice_mut(s![.., u..]).assign(&grad_code.slice(s![.., u..]));
        }
        grads
    }
}

#[derive(Debug, Clone)]
struct BiLstmNetwork {
    encoder: Vec<Bidirectional>,
    decoder: Vec<Bidirectional>,
    output: Dense,
    kernel: usize,
    n_features: usize,
}

impl BiLstmNetwork {
    fn new(config: &BiLstmAutoencoderConfig, kernel: usize, n_features: usize, rng: &mut Xoshiro256PlusPlus) -> Self {
        let mut n_in = n_features;
        let mut stack = |units: &[usize], rng: &mut Xoshiro256PlusPlus| -> Vec<Bidirectional> {
            units
                .iter()
                .map(|&u| {
                    let layer = Bidirectional::new(n_in, u, config.activation, rng);
                    n_in = 2 * u;
                    layer
                })
                .collect()
        };
        let encoder = stack(&config.encoder_units, rng);
        let decoder = stack(&config.decoder_units, rng);
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
        let n = x.len_of(Axis(0));
        let mut seq = time_major(x);
        let last = self.encoder.len() - 1;
        for (l, layer) in self.encoder.iter().enumerate() {
            seq = layer.forward(&seq);
            if l == last {
                let code = layer.code(&seq).unwrap_or_else(|| Array2::zeros((n, 2 * layer.units())));
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

impl Autoencoder for BiLstmNetwork {
    fn train_batch(&mut self, x: &Array3<f64>, optimizer: &mut Adam) -> Result<f64> {
        let steps = self.kernel;
        let n = x.len_of(Axis(0));
        let inputs = time_major(x);

        let mut encoder_caches = Vec::with_capacity(self.encoder.len());
        let mut seq = inputs.clone();
        for layer in &self.encoder {
            let (hs, cache) = layer.forward_train(&seq);
            encoder_caches.push(cache);
            seq = hs;
        }
        let code_layer = self
            .encoder
            .last()
            .ok_or_else(|| TimelyError::TrainingError("Encoder has no layers".to_string()))?;
        let code = code_layer
            .code(&seq)
            .ok_or_else(|| TimelyError::TrainingError("Empty window".to_string()))?;
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
            bias: Array1::zeros(self.output.n_outputs()),
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

        let mut decoder_grads = Vec::with_capacity(self.decoder.len());
        for (layer, cache) in self.decoder.iter().zip(&decoder_caches).rev() {
            let (grad_in, g) = layer.backward(cache, &grad_seq);
            decoder_grads.push(g);
            grad_seq = grad_in;
        }
        decoder_grads.reverse();

        let mut grad_code: Array2<f64> = Array2::zeros((n, code_units));
        for g in &grad_seq {
            grad_code += g;
        }
        let mut grad_seq = code_layer.code_grad(&grad_code, steps);

        let mut encoder_grads = Vec::with_capacity(self.encoder.len());
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

/// Bidirectional LSTM autoencoder reconstructing `(kernel, n_features)` windows
#[derive(Debug, Clone)]
pub struct BiLstmAutoencoder {
    config: BiLstmAutoencoderConfig,
    network: Option<BiLstmNetwork>,
    optimizer: Adam,
    rng: Xoshiro256PlusPlus,
}

impl BiLstmAutoencoder {
    pub fn new(config: BiLstmAutoencoderConfig) -> Self {
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

    pub fn config(&self) -> &BiLstmAutoencoderConfig {
        &self.config
    }
}

impl Default for BiLstmAutoencoder {
    fn default() -> Self {
        Self::new(BiLstmAutoencoderConfig::default())
    }
}

impl Reconstructor for BiLstmAutoencoder {
    fn name(&self) -> &'static str {
        "bilstm"
    }

    fn fit(&mut self, x: &Array3<f64>) -> Result<()> {
        self.config.validate()?;
        check_windows(x, None, None)?;
        let (n, kernel, n_features) = x.dim();
        info!(windows = n, kernel, n_features, "Training BiLSTM autoencoder");

        let mut network = BiLstmNetwork::new(&self.config, kernel, n_features, &mut self.rng);
        self.optimizer = Adam::new(self.config.learning_rate);
        let history = fit_autoencoder(&mut network, x, &self.config.training(), &mut self.optimizer, &mut self.rng)?;
        info!(
            epochs = history.epochs_run(),
            loss = history.loss.last().copied().unwrap_or(f64::NAN),
            "BiLSTM autoencoder trained"
        );

        self.network = Some(network);
        Ok(())
    }

    fn tune(&mut self, x: &Array3<f64>) -> Result<()> {
        let network = self.network.as_mut().ok_or(TimelyError::ModelNotFitted)?;
        check_windows(x, Some(network.n_features), Some(network.kernel))?;
        let history = fit_autoencoder(network, x, &self.config.tuning(), &mut self.optimizer, &mut self.rng)?;
        info!(epochs = history.epochs_run(), "BiLSTM autoencoder tuned");
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
    use crate::nn::mse;
    use rand::Rng;

    fn tiny_config() -> BiLstmAutoencoderConfig {
        BiLstmAutoencoderConfig::default()
            .with_units(vec![4, 3], vec![3, 4])
            .with_batch_size(16)
    }

    #[test]
    fn test_layer_widths() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let network = BiLstmNetwork::new(&tiny_config(), 5, 2, &mut rng);
        assert_eq!(network.encoder[0].forward.n_inputs(), 2);
        assert_eq!(network.encoder[1].forward.n_inputs(), 8);
        assert_eq!(network.decoder[0].backward.n_inputs(), 6);
        assert_eq!(network.output.n_inputs(), 8);
    }

    #[test]
    fn test_backward_direction_sees_reversed_window() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let layer = Bidirectional::new(1, 2, Activation::Tanh, &mut rng);
        let xs: Vec<Array2<f64>> = (0..4).map(|t| Array2::from_elem((1, 1), t as f64 * 0.3)).collect();

        let merged = layer.forward(&xs);
        let bwd = layer.backward.forward(&reversed(&xs));
        // Backward state at step 0 has read the whole window
        assert_eq!(merged[0].slice(s![.., 2..]), bwd[3]);
        assert_eq!(merged[3].slice(s![.., ..2]), layer.forward.forward(&xs)[3]);
    }

    #[test]
    fn test_train_batch_step_descends() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let config = tiny_config().with_activation(Activation::Tanh);
        let mut network = BiLstmNetwork::new(&config, 5, 2, &mut rng);
        let x = Array3::from_shape_fn((4, 5, 2), |_| rng.gen_range(-1.0..1.0));

        let before = mse(&x, &network.forward(&x));
        let reported = network.train_batch(&x, &mut Adam::new(1e-4)).unwrap();
        let after = mse(&x, &network.forward(&x));

        assert!((reported - before).abs() < 1e-12);
        assert!(after < before);
    }

    #[test]
    fn test_reconstruction_shape_and_errors() {
        let x = Array3::from_shape_fn((12, 5, 2), |(i, t, f)| ((i + t) as f64 * 0.5 + f as f64).sin() * 0.5);
        let mut model = BiLstmAutoencoder::new(tiny_config().with_epochs(2));
        assert!(matches!(model.reconstruct(&x), Err(TimelyError::ModelNotFitted)));

        model.fit(&x).unwrap();
        assert_eq!(model.reconstruct(&x).unwrap().dim(), (12, 5, 2));
        assert!(model.reconstruct(&Array3::zeros((2, 4, 2))).is_err());
        assert_eq!(model.name(), "bilstm");
    }
}
