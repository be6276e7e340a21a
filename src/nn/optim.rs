//! Adam optimizer

use ndarray::{Array, ArrayD, Dimension, IxDyn, Zip};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Moments {
    m: ArrayD<f64>,
    v: ArrayD<f64>,
}

/// Adam with bias correction. Each parameter tensor is identified by a
/// stable slot number chosen by the owning model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    step: u64,
    moments: HashMap<usize, Moments>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            moments: HashMap::new(),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn steps(&self) -> u64 {
        self.step
    }

    /// Advance the step counter; call once per batch before the updates
    pub fn next_step(&mut self) {
        self.step += 1;
    }

    pub fn update<D: Dimension>(&mut self, slot: usize, param: &mut Array<f64, D>, grad: &Array<f64, D>) {
        let t = self.step.max(1) as i32;
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let alpha = self.learning_rate * (1.0 - beta2.powi(t)).sqrt() / (1.0 - beta1.powi(t));

        let shape = IxDyn(param.shape());
        let state = self.moments.entry(slot).or_insert_with(|| Moments {
            m: ArrayD::zeros(shape.clone()),
            v: ArrayD::zeros(shape),
        });

        Zip::from(param.view_mut().into_dyn())
            .and(grad.view().into_dyn())
            .and(&mut state.m)
            .and(&mut state.v)
            .for_each(|p, &g, m, v| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                *p -= alpha * *m / (v.sqrt() + epsilon);
            });
    }
}
