//! Minimal neural-network toolkit for the autoencoder detectors
//!
//! Dense and LSTM layers with explicit forward caches and backward passes,
//! an Adam optimizer, and a mini-batch training loop with early stopping.
//! Everything runs on `ndarray` in `f64`.

mod dense;
mod lstm;
mod optim;
mod trainer;

pub use dense::{Dense, DenseCache, DenseGrads};
pub use lstm::{Lstm, LstmCache, LstmGrads};
pub use optim::Adam;
pub use trainer::{fit_autoencoder, mse, reconstruct_in_batches, Autoencoder, TrainingConfig, TrainingHistory};

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Activation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Rectified Linear Unit
    #[default]
    ReLU,
    /// Sigmoid
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
    /// Linear (identity)
    Linear,
}

impl Activation {
    pub fn apply(&self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::ReLU => z.mapv(|v| v.max(0.0)),
            Activation::Sigmoid => z.mapv(sigmoid),
            Activation::Tanh => z.mapv(f64::tanh),
            Activation::Linear => z.clone(),
        }
    }

    /// Derivative evaluated at the pre-activation `z`
    pub fn derivative(&self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::ReLU => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Sigmoid => z.mapv(|v| {
                let s = sigmoid(v);
                s * (1.0 - s)
            }),
            Activation::Tanh => z.mapv(|v| 1.0 - v.tanh().powi(2)),
            Activation::Linear => Array2::ones(z.raw_dim()),
        }
    }
}

pub(crate) fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

/// Glorot/Xavier uniform initialisation
pub(crate) fn glorot_uniform(n_in: usize, n_out: usize, rng: &mut impl Rng) -> Array2<f64> {
    let limit = (6.0 / (n_in + n_out).max(1) as f64).sqrt();
    Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-limit..limit))
}
