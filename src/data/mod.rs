//! Dataset container, storage loader, and train/test splitter.

pub mod load;
pub mod split;

use ndarray::{Array2, Array4, Axis};

use crate::{Error, Result};

/// Grid resolution of the flow tensor (rows and columns).
pub const GRID_SIZE: usize = 32;
/// Channels per grid cell: 48 daily time slots x {inflow, outflow}.
pub const FLOW_CHANNELS: usize = 96;
/// Number of auxiliary scalar covariates per sample.
pub const AUX_DIM: usize = 19;
/// Output classes: [1, 0] = weekend, [0, 1] = weekday.
pub const NUM_CLASSES: usize = 2;

/// An aligned triple of flow tensors, auxiliary features, and one-hot labels.
///
/// Rows are aligned by index across all three arrays; any permutation or
/// selection must be applied to all three jointly, which is why the arrays
/// are private and row selection only exists as [`FlowDataset::select`].
#[derive(Debug, Clone)]
pub struct FlowDataset {
    flows: Array4<f32>,
    aux: Array2<f32>,
    labels: Array2<f32>,
}

impl FlowDataset {
    /// Build a dataset, enforcing the fixed shape contract:
    /// flows `(N, 32, 32, 96)`, aux `(N, 19)`, labels `(N, 2)` with one-hot
    /// rows, all sharing the same leading dimension.
    pub fn new(flows: Array4<f32>, aux: Array2<f32>, labels: Array2<f32>) -> Result<Self> {
        let (n, h, w, c) = flows.dim();
        if (h, w, c) != (GRID_SIZE, GRID_SIZE, FLOW_CHANNELS) {
            return Err(Error::DataFormat(format!(
                "flow tensor has per-sample shape ({h}, {w}, {c}), expected \
                 ({GRID_SIZE}, {GRID_SIZE}, {FLOW_CHANNELS})"
            )));
        }
        if aux.dim() != (n, AUX_DIM) {
            return Err(Error::DataFormat(format!(
                "auxiliary features have shape {:?}, expected ({n}, {AUX_DIM})",
                aux.dim()
            )));
        }
        if labels.dim() != (n, NUM_CLASSES) {
            return Err(Error::DataFormat(format!(
                "labels have shape {:?}, expected ({n}, {NUM_CLASSES})",
                labels.dim()
            )));
        }
        for (i, row) in labels.outer_iter().enumerate() {
            let one_hot = row.iter().all(|&v| v == 0.0 || v == 1.0)
                && row.iter().sum::<f32>() == 1.0;
            if !one_hot {
                return Err(Error::DataFormat(format!(
                    "label row {i} is not one-hot: {:?}",
                    row.to_vec()
                )));
            }
        }
        Ok(Self { flows, aux, labels })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.flows.dim().0
    }

    /// True when the dataset holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flow tensors, shape `(N, 32, 32, 96)`.
    pub fn flows(&self) -> &Array4<f32> {
        &self.flows
    }

    /// Auxiliary features, shape `(N, 19)`.
    pub fn aux(&self) -> &Array2<f32> {
        &self.aux
    }

    /// One-hot labels, shape `(N, 2)`.
    pub fn labels(&self) -> &Array2<f32> {
        &self.labels
    }

    /// Select rows by index, applied jointly to all three arrays.
    ///
    /// Indices may repeat (minibatch sampling draws with replacement).
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            flows: self.flows.select(Axis(0), indices),
            aux: self.aux.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }
}
