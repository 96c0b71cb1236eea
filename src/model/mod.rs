//! The dual-branch day-type network and its explicit parameter store.
//!
//! A convolutional branch extracts features from the flow grids, a dense
//! branch from the auxiliary covariates; the two 128-length feature vectors
//! are concatenated (flow branch first) and classified through two more
//! dense layers ending in a 2-way softmax.
//!
//! All twelve parameter tensors live in [`DayTypeNet`] and are mutated only
//! by the optimizer; there is no hidden graph and the set of L2-regularized
//! weights is the explicit list returned by
//! [`DayTypeNet::regularized_weights`].

use ndarray::{concatenate, s, Array, Array2, Array4, ArrayViewD, Axis, Dimension};
use rand::rngs::StdRng;

use crate::data::{FlowDataset, AUX_DIM, FLOW_CHANNELS, GRID_SIZE, NUM_CLASSES};
use crate::nn::conv::{conv2d_same, conv2d_same_backward, max_pool2x2, max_pool2x2_backward};
use crate::nn::dense::{dense, dense_backward};
use crate::nn::init::{constant_bias, truncated_normal, WEIGHT_STDDEV};
use crate::nn::ops::{dropout_mask, relu, relu_backward, softmax_rows};

/// Convolution kernel side.
pub const KERNEL: usize = 5;
/// Filters in the first convolution stage.
pub const CONV1_FILTERS: usize = 16;
/// Filters in the second convolution stage.
pub const CONV2_FILTERS: usize = 32;
/// Features extracted by the convolutional branch.
pub const FLOW_FEATURES: usize = 128;
/// Features extracted by the auxiliary branch.
pub const AUX_FEATURES: usize = 128;
/// Features after fusion.
pub const FUSED_FEATURES: usize = 64;
/// Flattened size after two 2x pooling steps: 8 * 8 * 32.
pub const FLAT_DIM: usize = (GRID_SIZE / 4) * (GRID_SIZE / 4) * CONV2_FILTERS;

/// Guard inside `ln` so an exactly-zero predicted probability cannot produce
/// an infinite loss.
const LOG_EPSILON: f32 = 1e-10;

/// One parameter tensor and its gradient buffer.
#[derive(Debug, Clone)]
pub struct Param<D: Dimension> {
    pub value: Array<f32, D>,
    pub grad: Array<f32, D>,
}

impl<D: Dimension> Param<D> {
    fn new(value: Array<f32, D>) -> Self {
        let grad = Array::zeros(value.raw_dim());
        Self { value, grad }
    }

    fn view(&self, name: &'static str) -> ParamView<'_> {
        ParamView { name, shape: self.value.shape(), data: self.value.as_slice().expect("parameters are contiguous") }
    }

    fn slot_mut(&mut self, name: &'static str) -> ParamSlotMut<'_> {
        let shape = self.value.shape().to_vec();
        ParamSlotMut {
            name,
            shape,
            value: self.value.as_slice_mut().expect("parameters are contiguous"),
            grad: self.grad.as_slice().expect("gradients are contiguous"),
        }
    }
}

/// Read-only flat view of a named parameter (checkpointing).
pub struct ParamView<'a> {
    pub name: &'static str,
    pub shape: &'a [usize],
    pub data: &'a [f32],
}

/// Mutable flat view of a named parameter plus its gradient (optimizer,
/// checkpoint restore).
pub struct ParamSlotMut<'a> {
    pub name: &'static str,
    pub shape: Vec<usize>,
    pub value: &'a mut [f32],
    pub grad: &'a [f32],
}

/// Parameter store for the dual-branch classifier.
#[derive(Debug, Clone)]
pub struct DayTypeNet {
    pub conv1_w: Param<ndarray::Ix4>,
    pub conv1_b: Param<ndarray::Ix1>,
    pub conv2_w: Param<ndarray::Ix4>,
    pub conv2_b: Param<ndarray::Ix1>,
    pub flow_w: Param<ndarray::Ix2>,
    pub flow_b: Param<ndarray::Ix1>,
    pub aux_w: Param<ndarray::Ix2>,
    pub aux_b: Param<ndarray::Ix1>,
    pub fuse_w: Param<ndarray::Ix2>,
    pub fuse_b: Param<ndarray::Ix1>,
    pub out_w: Param<ndarray::Ix2>,
    pub out_b: Param<ndarray::Ix1>,
}

/// Intermediate activations kept for the backward pass.
pub struct ForwardCache {
    h1: Array4<f32>,
    pool1: Array4<f32>,
    pool1_idx: Array4<usize>,
    h2: Array4<f32>,
    pool2_idx: Array4<usize>,
    flat: Array2<f32>,
    a_flow: Array2<f32>,
    m_flow: Option<Array2<f32>>,
    a_aux: Array2<f32>,
    m_aux: Option<Array2<f32>>,
    h_cat: Array2<f32>,
    a_fuse: Array2<f32>,
    m_fuse: Option<Array2<f32>>,
    d_fuse: Array2<f32>,
    probs: Array2<f32>,
}

impl ForwardCache {
    /// Predicted class probabilities, shape `(B, 2)`.
    pub fn probs(&self) -> &Array2<f32> {
        &self.probs
    }
}

impl DayTypeNet {
    /// Allocate and initialize all parameters: truncated-normal weights
    /// (stddev 0.1, clipped at two standard deviations), constant-0.1 biases.
    pub fn new(rng: &mut StdRng) -> Self {
        Self {
            conv1_w: Param::new(truncated_normal(
                (KERNEL, KERNEL, FLOW_CHANNELS, CONV1_FILTERS),
                WEIGHT_STDDEV,
                rng,
            )),
            conv1_b: Param::new(constant_bias(CONV1_FILTERS)),
            conv2_w: Param::new(truncated_normal(
                (KERNEL, KERNEL, CONV1_FILTERS, CONV2_FILTERS),
                WEIGHT_STDDEV,
                rng,
            )),
            conv2_b: Param::new(constant_bias(CONV2_FILTERS)),
            flow_w: Param::new(truncated_normal((FLAT_DIM, FLOW_FEATURES), WEIGHT_STDDEV, rng)),
            flow_b: Param::new(constant_bias(FLOW_FEATURES)),
            aux_w: Param::new(truncated_normal((AUX_DIM, AUX_FEATURES), WEIGHT_STDDEV, rng)),
            aux_b: Param::new(constant_bias(AUX_FEATURES)),
            fuse_w: Param::new(truncated_normal(
                (FLOW_FEATURES + AUX_FEATURES, FUSED_FEATURES),
                WEIGHT_STDDEV,
                rng,
            )),
            fuse_b: Param::new(constant_bias(FUSED_FEATURES)),
            out_w: Param::new(truncated_normal((FUSED_FEATURES, NUM_CLASSES), WEIGHT_STDDEV, rng)),
            out_b: Param::new(constant_bias(NUM_CLASSES)),
        }
    }

    /// All-zero parameter store, filled in by checkpoint restoration.
    pub fn zeros() -> Self {
        Self {
            conv1_w: Param::new(Array::zeros((KERNEL, KERNEL, FLOW_CHANNELS, CONV1_FILTERS))),
            conv1_b: Param::new(Array::zeros(CONV1_FILTERS)),
            conv2_w: Param::new(Array::zeros((KERNEL, KERNEL, CONV1_FILTERS, CONV2_FILTERS))),
            conv2_b: Param::new(Array::zeros(CONV2_FILTERS)),
            flow_w: Param::new(Array::zeros((FLAT_DIM, FLOW_FEATURES))),
            flow_b: Param::new(Array::zeros(FLOW_FEATURES)),
            aux_w: Param::new(Array::zeros((AUX_DIM, AUX_FEATURES))),
            aux_b: Param::new(Array::zeros(AUX_FEATURES)),
            fuse_w: Param::new(Array::zeros((FLOW_FEATURES + AUX_FEATURES, FUSED_FEATURES))),
            fuse_b: Param::new(Array::zeros(FUSED_FEATURES)),
            out_w: Param::new(Array::zeros((FUSED_FEATURES, NUM_CLASSES))),
            out_b: Param::new(Array::zeros(NUM_CLASSES)),
        }
    }

    /// Named read-only views of every parameter, in a stable order.
    pub fn views(&self) -> Vec<ParamView<'_>> {
        vec![
            self.conv1_w.view("conv1.weight"),
            self.conv1_b.view("conv1.bias"),
            self.conv2_w.view("conv2.weight"),
            self.conv2_b.view("conv2.bias"),
            self.flow_w.view("flow_fc.weight"),
            self.flow_b.view("flow_fc.bias"),
            self.aux_w.view("aux_fc.weight"),
            self.aux_b.view("aux_fc.bias"),
            self.fuse_w.view("fuse_fc.weight"),
            self.fuse_b.view("fuse_fc.bias"),
            self.out_w.view("output.weight"),
            self.out_b.view("output.bias"),
        ]
    }

    /// Named mutable slots for the optimizer and checkpoint restore, in the
    /// same order as [`DayTypeNet::views`].
    pub fn slots_mut(&mut self) -> Vec<ParamSlotMut<'_>> {
        vec![
            self.conv1_w.slot_mut("conv1.weight"),
            self.conv1_b.slot_mut("conv1.bias"),
            self.conv2_w.slot_mut("conv2.weight"),
            self.conv2_b.slot_mut("conv2.bias"),
            self.flow_w.slot_mut("flow_fc.weight"),
            self.flow_b.slot_mut("flow_fc.bias"),
            self.aux_w.slot_mut("aux_fc.weight"),
            self.aux_b.slot_mut("aux_fc.bias"),
            self.fuse_w.slot_mut("fuse_fc.weight"),
            self.fuse_b.slot_mut("fuse_fc.bias"),
            self.out_w.slot_mut("output.weight"),
            self.out_b.slot_mut("output.bias"),
        ]
    }

    /// The explicit list of L2-regularized tensors: the six weight matrices,
    /// never the biases.
    pub fn regularized_weights(&self) -> [ArrayViewD<'_, f32>; 6] {
        [
            self.conv1_w.value.view().into_dyn(),
            self.conv2_w.value.view().into_dyn(),
            self.flow_w.value.view().into_dyn(),
            self.aux_w.value.view().into_dyn(),
            self.fuse_w.value.view().into_dyn(),
            self.out_w.value.view().into_dyn(),
        ]
    }

    /// L2 penalty `lambda * sum(||W||^2) / 2` over the regularized weights.
    pub fn l2_penalty(&self, lambda: f32) -> f32 {
        let sq: f32 = self
            .regularized_weights()
            .iter()
            .map(|w| w.iter().map(|&v| v * v).sum::<f32>())
            .sum();
        0.5 * lambda * sq
    }

    /// Deterministic forward pass without dropout (retain probability 1.0).
    pub fn forward_eval(&self, flows: &Array4<f32>, aux: &Array2<f32>) -> Array2<f32> {
        let (probs, _) = self.forward_inner(flows, aux, None);
        probs
    }

    /// Stochastic forward pass with independent inverted-dropout masks on
    /// both branch outputs and the fused features.
    pub fn forward_train(
        &self,
        flows: &Array4<f32>,
        aux: &Array2<f32>,
        keep_prob: f32,
        rng: &mut StdRng,
    ) -> ForwardCache {
        let dropout = (keep_prob < 1.0).then_some((keep_prob, rng));
        let (_, cache) = self.forward_inner(flows, aux, dropout);
        cache
    }

    fn forward_inner(
        &self,
        flows: &Array4<f32>,
        aux: &Array2<f32>,
        mut dropout: Option<(f32, &mut StdRng)>,
    ) -> (Array2<f32>, ForwardCache) {
        let bsz = flows.dim().0;

        // Convolutional branch: two conv+relu+pool stages, then a dense layer.
        let h1 = relu(&conv2d_same(flows, &self.conv1_w.value, &self.conv1_b.value));
        let (pool1, pool1_idx) = max_pool2x2(&h1);
        let h2 = relu(&conv2d_same(&pool1, &self.conv2_w.value, &self.conv2_b.value));
        let (pool2, pool2_idx) = max_pool2x2(&h2);
        let flat = pool2
            .into_shape_with_order((bsz, FLAT_DIM))
            .expect("pooled tensor is contiguous");
        let a_flow = relu(&dense(&flat, &self.flow_w.value, &self.flow_b.value));
        let (d_flow, m_flow) = apply_dropout(&a_flow, &mut dropout);

        // Auxiliary branch.
        let a_aux = relu(&dense(aux, &self.aux_w.value, &self.aux_b.value));
        let (d_aux, m_aux) = apply_dropout(&a_aux, &mut dropout);

        // Fusion: flow features first, auxiliary second.
        let h_cat = concatenate(Axis(1), &[d_flow.view(), d_aux.view()])
            .expect("branch outputs share the batch dimension");
        let a_fuse = relu(&dense(&h_cat, &self.fuse_w.value, &self.fuse_b.value));
        let (d_fuse, m_fuse) = apply_dropout(&a_fuse, &mut dropout);

        let logits = dense(&d_fuse, &self.out_w.value, &self.out_b.value);
        let probs = softmax_rows(&logits);

        let cache = ForwardCache {
            h1,
            pool1,
            pool1_idx,
            h2,
            pool2_idx,
            flat,
            a_flow,
            m_flow,
            a_aux,
            m_aux,
            h_cat,
            a_fuse,
            m_fuse,
            d_fuse,
            probs: probs.clone(),
        };
        (probs, cache)
    }

    /// Backward pass over a minibatch: fills every gradient buffer (adding
    /// `lambda * W` to each regularized weight) and returns the total loss,
    /// sum-form cross-entropy plus the L2 penalty.
    ///
    /// Gradients are overwritten, not accumulated, so no clearing is needed
    /// between steps.
    pub fn backward(&mut self, batch: &FlowDataset, cache: &ForwardCache, lambda: f32) -> f32 {
        let labels = batch.labels();
        let loss = cross_entropy_sum(&cache.probs, labels) + self.l2_penalty(lambda);

        // Fused softmax + sum-form cross-entropy gradient.
        let d_logits = &cache.probs - labels;

        // Output layer.
        let g = dense_backward(&cache.d_fuse, &self.out_w.value, &d_logits);
        self.out_w.grad = g.w;
        self.out_b.grad = g.b;
        let mut d_fuse = g.input;

        // Fusion layer: dropout, relu, dense.
        if let Some(mask) = &cache.m_fuse {
            d_fuse *= mask;
        }
        relu_backward(&mut d_fuse, &cache.a_fuse);
        let g = dense_backward(&cache.h_cat, &self.fuse_w.value, &d_fuse);
        self.fuse_w.grad = g.w;
        self.fuse_b.grad = g.b;
        let d_cat = g.input;

        // Split the concatenation gradient back into the two branches.
        let mut d_flow = d_cat.slice(s![.., ..FLOW_FEATURES]).to_owned();
        let mut d_aux = d_cat.slice(s![.., FLOW_FEATURES..]).to_owned();

        // Auxiliary branch.
        if let Some(mask) = &cache.m_aux {
            d_aux *= mask;
        }
        relu_backward(&mut d_aux, &cache.a_aux);
        let g = dense_backward(batch.aux(), &self.aux_w.value, &d_aux);
        self.aux_w.grad = g.w;
        self.aux_b.grad = g.b;

        // Convolutional branch, unwinding through the dense layer, both
        // pooling stages, and both convolutions.
        if let Some(mask) = &cache.m_flow {
            d_flow *= mask;
        }
        relu_backward(&mut d_flow, &cache.a_flow);
        let g = dense_backward(&cache.flat, &self.flow_w.value, &d_flow);
        self.flow_w.grad = g.w;
        self.flow_b.grad = g.b;

        let bsz = batch.len();
        let d_pool2 = g
            .input
            .into_shape_with_order((bsz, GRID_SIZE / 4, GRID_SIZE / 4, CONV2_FILTERS))
            .expect("dense gradient is contiguous");
        let mut d_h2 = max_pool2x2_backward(&d_pool2, &cache.pool2_idx, cache.h2.dim());
        relu_backward(&mut d_h2, &cache.h2);
        let g = conv2d_same_backward(&cache.pool1, &self.conv2_w.value, &d_h2, true);
        self.conv2_w.grad = g.w;
        self.conv2_b.grad = g.b;
        let d_pool1 = g.input.expect("requested input gradient");

        let mut d_h1 = max_pool2x2_backward(&d_pool1, &cache.pool1_idx, cache.h1.dim());
        relu_backward(&mut d_h1, &cache.h1);
        let g = conv2d_same_backward(batch.flows(), &self.conv1_w.value, &d_h1, false);
        self.conv1_w.grad = g.w;
        self.conv1_b.grad = g.b;

        // L2 penalty gradient: lambda * W on every regularized weight.
        self.conv1_w.grad.scaled_add(lambda, &self.conv1_w.value);
        self.conv2_w.grad.scaled_add(lambda, &self.conv2_w.value);
        self.flow_w.grad.scaled_add(lambda, &self.flow_w.value);
        self.aux_w.grad.scaled_add(lambda, &self.aux_w.value);
        self.fuse_w.grad.scaled_add(lambda, &self.fuse_w.value);
        self.out_w.grad.scaled_add(lambda, &self.out_w.value);

        loss
    }
}

fn apply_dropout(
    activated: &Array2<f32>,
    dropout: &mut Option<(f32, &mut StdRng)>,
) -> (Array2<f32>, Option<Array2<f32>>) {
    match dropout {
        Some((keep, rng)) => {
            let mask = dropout_mask(activated.dim(), *keep, rng);
            (activated * &mask, Some(mask))
        }
        None => (activated.clone(), None),
    }
}

/// Sum-form cross-entropy over a batch: `-sum(y * ln(p))`, deliberately not
/// normalized by the batch size so training dynamics match the fixed
/// learning rate they were tuned with.
pub fn cross_entropy_sum(probs: &Array2<f32>, labels: &Array2<f32>) -> f32 {
    -probs
        .iter()
        .zip(labels.iter())
        .map(|(&p, &y)| y * (p + LOG_EPSILON).ln())
        .sum::<f32>()
}
