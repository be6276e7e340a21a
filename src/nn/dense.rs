//! Fully connected layer

use super::{glorot_uniform, Activation, Adam};
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Dense layer: `activation(x · W + b)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    weights: Array2<f64>,
    bias: Array1<f64>,
    activation: Activation,
}

/// Values kept from the forward pass for backpropagation
#[derive(Debug, Clone)]
pub struct DenseCache {
    input: Array2<f64>,
    pre_activation: Array2<f64>,
}

#[derive(Debug, Clone)]
pub struct DenseGrads {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl Dense {
    pub fn new(n_in: usize, n_out: usize, activation: Activation, rng: &mut impl Rng) -> Self {
        Self {
            weights: glorot_uniform(n_in, n_out, rng),
            bias: Array1::zeros(n_out),
            activation,
        }
    }

    pub fn n_inputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn n_outputs(&self) -> usize {
        self.weights.ncols()
    }

    pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        self.activation.apply(&(x.dot(&self.weights) + &self.bias))
    }

    pub fn forward_train(&self, x: &Array2<f64>) -> (Array2<f64>, DenseCache) {
        let pre_activation = x.dot(&self.weights) + &self.bias;
        let output = self.activation.apply(&pre_activation);
        let cache = DenseCache {
            input: x.clone(),
            pre_activation,
        };
        (output, cache)
    }

    /// Returns the gradient w.r.t. the layer input and the parameter gradients
    pub fn backward(&self, cache: &DenseCache, grad_output: &Array2<f64>) -> (Array2<f64>, DenseGrads) {
        let delta = grad_output * &self.activation.derivative(&cache.pre_activation);
        let grads = DenseGrads {
            weights: cache.input.t().dot(&delta),
            bias: delta.sum_axis(Axis(0)),
        };
        (delta.dot(&self.weights.t()), grads)
    }

    /// Apply an optimizer step; parameters use slots `slot` and `slot + 1`.
    /// Returns the next free slot.
    pub fn update(&mut self, grads: &DenseGrads, optimizer: &mut Adam, slot: usize) -> usize {
        optimizer.update(slot, &mut self.weights, &grads.weights);
        optimizer.update(slot + 1, &mut self.bias, &grads.bias);
        slot + 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn loss(layer: &Dense, x: &Array2<f64>, w: &Array2<f64>) -> f64 {
        (layer.forward(x) * w).sum()
    }

    #[test]
    fn test_dense_gradients() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let layer = Dense::new(3, 2, Activation::Tanh, &mut rng);
        let x = Array2::from_shape_fn((4, 3), |_| rng.gen_range(-1.0..1.0));
        let w = Array2::from_shape_fn((4, 2), |_| rng.gen_range(-1.0..1.0));

        let (_, cache) = layer.forward_train(&x);
        let (grad_x, grads) = layer.backward(&cache, &w);

        let eps = 1e-6;
        for (r, c) in [(0, 0), (1, 1), (2, 0)] {
            let mut plus = layer.clone();
            plus.weights[[r, c]] += eps;
            let mut minus = layer.clone();
            minus.weights[[r, c]] -= eps;
            let numeric = (loss(&plus, &x, &w) - loss(&minus, &x, &w)) / (2.0 * eps);
            assert!((numeric - grads.weights[[r, c]]).abs() < 1e-6);
        }

        let mut x_plus = x.clone();
        x_plus[[2, 1]] += eps;
        let mut x_minus = x.clone();
        x_minus[[2, 1]] -= eps;
        let numeric = (loss(&layer, &x_plus, &w) - loss(&layer, &x_minus, &w)) / (2.0 * eps);
        assert!((numeric - grad_x[[2, 1]]).abs() < 1e-6);
    }
}
