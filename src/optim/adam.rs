//! Adam optimizer.

use super::Optimizer;
use crate::model::ParamSlotMut;
use ndarray::Array1;

/// Adam with bias-corrected moment estimates.
///
/// Update: m_t = β1·m + (1-β1)·g, v_t = β2·v + (1-β2)·g², then
/// θ = θ - lr_t · m_t / (√v_t + ε) where lr_t folds in the bias
/// correction for both moments.
#[derive(Debug)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    m: Vec<Option<Array1<f32>>>, // First moment
    v: Vec<Option<Array1<f32>>>, // Second moment
}

impl Adam {
    /// Create a new Adam optimizer
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self { lr, beta1, beta2, epsilon, t: 0, m: Vec::new(), v: Vec::new() }
    }

    /// Create Adam with default parameters (β1 = 0.9, β2 = 0.999, ε = 1e-8)
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8)
    }

    /// Optimizer step counter.
    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.t
    }

    fn ensure_moments(&mut self, n: usize) {
        if self.m.is_empty() {
            self.m = (0..n).map(|_| None).collect();
            self.v = (0..n).map(|_| None).collect();
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [ParamSlotMut<'_>]) {
        self.ensure_moments(params.len());
        self.t += 1;

        // Bias correction factors
        let lr_t = self.lr
            * ((1.0 - self.beta2.powi(self.t as i32)).sqrt()
                / (1.0 - self.beta1.powi(self.t as i32)));

        for (i, param) in params.iter_mut().enumerate() {
            if self.m[i].is_none() {
                self.m[i] = Some(Array1::zeros(param.grad.len()));
                self.v[i] = Some(Array1::zeros(param.grad.len()));
            }
            let m = self.m[i].as_mut().expect("momentum buffer initialized above");
            let v = self.v[i].as_mut().expect("velocity buffer initialized above");

            let m_slice = m.as_slice_mut().expect("momentum array is contiguous");
            let v_slice = v.as_slice_mut().expect("velocity array is contiguous");

            for (((theta, &g), m), v) in
                param.value.iter_mut().zip(param.grad).zip(m_slice).zip(v_slice)
            {
                *m = self.beta1 * *m + (1.0 - self.beta1) * g;
                *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
                *theta -= lr_t * *m / (v.sqrt() + self.epsilon);
            }
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}
