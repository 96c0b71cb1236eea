//! Deterministic model evaluation.

use ndarray::Array2;

use crate::data::FlowDataset;
use crate::model::{cross_entropy_sum, DayTypeNet};

/// Accuracy and loss of a model over a dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    /// Fraction of samples whose argmax prediction matches the label.
    pub accuracy: f32,
    /// Sum-form cross-entropy over the dataset, without the L2 penalty.
    pub loss: f32,
}

/// Evaluate `net` on `dataset` with dropout disabled.
///
/// The loss reported here is the data term only; the L2 penalty depends on
/// the regularization coefficient and belongs to the training objective.
pub fn evaluate(net: &DayTypeNet, dataset: &FlowDataset) -> Metrics {
    let probs = net.forward_eval(dataset.flows(), dataset.aux());
    let loss = cross_entropy_sum(&probs, dataset.labels());
    Metrics { accuracy: accuracy(&probs, dataset.labels()), loss }
}

fn accuracy(probs: &Array2<f32>, labels: &Array2<f32>) -> f32 {
    let n = probs.nrows();
    if n == 0 {
        return 0.0;
    }
    let correct = probs
        .rows()
        .into_iter()
        .zip(labels.rows())
        .filter(|(p, y)| argmax(p) == argmax(y))
        .count();
    correct as f32 / n as f32
}

fn argmax(row: &ndarray::ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}
