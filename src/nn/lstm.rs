//! Long short-term memory layer with backpropagation through time
//!
//! Gate layout in the packed weight matrices is `[input, forget, cell, output]`,
//! each `units` wide. Sequences are passed time-major as one `(batch, features)`
//! matrix per step.

use super::{glorot_uniform, sigmoid, Activation, Adam};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lstm {
    input_weights: Array2<f64>,
    recurrent_weights: Array2<f64>,
    bias: Array1<f64>,
    units: usize,
    /// Activation of the cell candidate and of the cell state output
    activation: Activation,
}

#[derive(Debug, Clone)]
struct LstmStep {
    x: Array2<f64>,
    h_prev: Array2<f64>,
    c_prev: Array2<f64>,
    i: Array2<f64>,
    f: Array2<f64>,
    g: Array2<f64>,
    o: Array2<f64>,
    c: Array2<f64>,
    z_g: Array2<f64>,
}

/// Per-step values kept for backpropagation through time
#[derive(Debug, Clone)]
pub struct LstmCache {
    steps: Vec<LstmStep>,
}

#[derive(Debug, Clone)]
pub struct LstmGrads {
    pub input_weights: Array2<f64>,
    pub recurrent_weights: Array2<f64>,
    pub bias: Array1<f64>,
}

fn gate_sigmoid(z: ArrayView2<f64>) -> Array2<f64> {
    z.mapv(sigmoid)
}

impl Lstm {
    pub fn new(n_in: usize, units: usize, activation: Activation, rng: &mut impl Rng) -> Self {
        let mut bias = Array1::<f64>::zeros(4 * units);
        // Unit forget bias
        bias.slice_mut(s![units..2 * units]).fill(1.0);

        Self {
            input_weights: glorot_uniform(n_in, 4 * units, rng),
            recurrent_weights: glorot_uniform(units, 4 * units, rng),
            bias,
            units,
            activation,
        }
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn n_inputs(&self) -> usize {
        self.input_weights.nrows()
    }

    /// Hidden state at every step
    pub fn forward(&self, xs: &[Array2<f64>]) -> Vec<Array2<f64>> {
        self.run(xs, None)
    }

    pub fn forward_train(&self, xs: &[Array2<f64>]) -> (Vec<Array2<f64>>, LstmCache) {
        let mut steps = Vec::with_capacity(xs.len());
        let hs = self.run(xs, Some(&mut steps));
        (hs, LstmCache { steps })
    }

    fn run(&self, xs: &[Array2<f64>], mut record: Option<&mut Vec<LstmStep>>) -> Vec<Array2<f64>> {
        let h = self.units;
        let n = xs.first().map_or(0, |x| x.nrows());
        let mut h_prev: Array2<f64> = Array2::zeros((n, h));
        let mut c_prev: Array2<f64> = Array2::zeros((n, h));
        let mut hs = Vec::with_capacity(xs.len());

        for x in xs {
            let z = x.dot(&self.input_weights) + h_prev.dot(&self.recurrent_weights) + &self.bias;

            let i = gate_sigmoid(z.slice(s![.., 0..h]));
            let f = gate_sigmoid(z.slice(s![.., h..2 * h]));
            let z_g = z.slice(s![.., 2 * h..3 * h]).to_owned();
            let g = self.activation.apply(&z_g);
            let o = gate_sigmoid(z.slice(s![.., 3 * h..4 * h]));

            let c = &f * &c_prev + &i * &g;
            let h_t = &o * &self.activation.apply(&c);

            if let Some(steps) = record.as_deref_mut() {
                steps.push(LstmStep {
                    x: x.clone(),
                    h_prev: h_prev.clone(),
                    c_prev: c_prev.clone(),
                    i,
                    f,
                    g,
                    o,
                    c: c.clone(),
                    z_g,
                });
            }

            hs.push(h_t.clone());
            h_prev = h_t;
            c_prev = c;
        }

        hs
    }

    /// Backpropagate gradients w.r.t. every hidden output.
    ///
    /// `grad_hidden[t]` is dL/dh_t coming from layers above; steps whose output
    /// is not used take a zero matrix. Returns dL/dx_t for every step.
    pub fn backward(&self, cache: &LstmCache, grad_hidden: &[Array2<f64>]) -> (Vec<Array2<f64>>, LstmGrads) {
        let h = self.units;
        let mut grads = LstmGrads {
            input_weights: Array2::zeros(self.input_weights.raw_dim()),
            recurrent_weights: Array2::zeros(self.recurrent_weights.raw_dim()),
            bias: Array1::zeros(self.bias.len()),
        };

        let n = cache.steps.first().map_or(0, |s| s.x.nrows());
        let mut dh_next: Array2<f64> = Array2::zeros((n, h));
        let mut dc_next: Array2<f64> = Array2::zeros((n, h));
        let mut grad_inputs: Vec<Array2<f64>> = vec![Array2::zeros((n, self.n_inputs())); cache.steps.len()];

        for (t, step) in cache.steps.iter().enumerate().rev() {
            let dh = &grad_hidden[t] + &dh_next;

            let d_o = &dh * &self.activation.apply(&step.c);
            let dc = &dc_next + &(&dh * &step.o * &self.activation.derivative(&step.c));
            let d_i = &dc * &step.g;
            let d_g = &dc * &step.i;
            let d_f = &dc * &step.c_prev;
            dc_next = &dc * &step.f;

            let mut dz: Array2<f64> = Array2::zeros((n, 4 * h));
            dz.slice_mut(s![.., 0..h])
                .assign(&(&d_i * &step.i * &(1.0 - &step.i)));
            dz.slice_mut(s![.., h..2 * h])
                .assign(&(&d_f * &step.f * &(1.0 - &step.f)));
            dz.slice_mut(s![.., 2 * h..3 * h])
                .assign(&(&d_g * &self.activation.derivative(&step.z_g)));
            dz.slice_mut(s![.., 3 * h..4 * h])
                .assign(&(&d_o * &step.o * &(1.0 - &step.o)));

            grads.input_weights += &step.x.t().dot(&dz);
            grads.recurrent_weights += &step.h_prev.t().dot(&dz);
            grads.bias += &dz.sum_axis(Axis(0));

            grad_inputs[t] = dz.dot(&self.input_weights.t());
            dh_next = dz.dot(&self.recurrent_weights.t());
        }

        (grad_inputs, grads)
    }

    /// Apply an optimizer step; parameters use slots `slot..slot + 3`.
    /// Returns the next free slot.
    pub fn update(&mut self, grads: &LstmGrads, optimizer: &mut Adam, slot: usize) -> usize {
        optimizer.update(slot, &mut self.input_weights, &grads.input_weights);
        optimizer.update(slot + 1, &mut self.recurrent_weights, &grads.recurrent_weights);
        optimizer.update(slot + 2, &mut self.bias, &grads.bias);
        slot + 3
    }
}
