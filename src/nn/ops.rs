//! Elementwise activations, softmax, and dropout masks.

use ndarray::{Array, Array2, Dimension, Zip};
use rand::rngs::StdRng;
use rand::Rng;

/// Rectified-linear activation.
pub fn relu<D: Dimension>(x: &Array<f32, D>) -> Array<f32, D> {
    x.mapv(|v| v.max(0.0))
}

/// Gate a gradient through relu, using the post-activation values as the
/// mask (`a > 0` iff the pre-activation was positive).
pub fn relu_backward<D: Dimension>(grad: &mut Array<f32, D>, activated: &Array<f32, D>) {
    Zip::from(grad).and(activated).for_each(|g, &a| {
        if a <= 0.0 {
            *g = 0.0;
        }
    });
}

/// Row-wise softmax with max-shifting for numerical stability.
///
/// Every output row sums to 1 and all entries lie in [0, 1].
pub fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Inverted dropout mask: entries are `1 / keep` with probability `keep`
/// and 0 otherwise, so no rescaling is needed at evaluation time.
pub fn dropout_mask(dim: (usize, usize), keep: f32, rng: &mut StdRng) -> Array2<f32> {
    let scale = 1.0 / keep;
    Array2::from_shape_simple_fn(dim, || if rng.gen::<f32>() < keep { scale } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use proptest::prelude::*;
    use rand::SeedableRng;

    #[test]
    fn test_relu_clamps_negatives() {
        let x = array![[-1.0f32, 0.0, 2.5], [3.0, -0.1, 0.0]];
        let y = relu(&x);
        assert_eq!(y, array![[0.0, 0.0, 2.5], [3.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_relu_backward_masks_gradient() {
        let activated = array![[0.0f32, 1.0], [2.0, 0.0]];
        let mut grad = array![[5.0f32, 5.0], [5.0, 5.0]];
        relu_backward(&mut grad, &activated);
        assert_eq!(grad, array![[0.0, 5.0], [5.0, 0.0]]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let logits = array![[2.0f32, 1.0], [0.0, 0.0], [-3.0, 4.0]];
        let probs = softmax_rows(&logits);
        for row in probs.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-5);
            for &p in row {
                assert!((0.0..=1.0).contains(&p));
            }
        }
        // Larger logit gets larger probability.
        assert!(probs[[0, 0]] > probs[[0, 1]]);
    }

    #[test]
    fn test_softmax_stable_for_large_logits() {
        let logits = array![[1000.0f32, 1001.0]];
        let probs = softmax_rows(&logits);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert_relative_eq!(probs.row(0).sum(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_dropout_mask_values() {
        let mut rng = StdRng::seed_from_u64(11);
        let mask = dropout_mask((32, 32), 0.5, &mut rng);
        for &m in &mask {
            assert!(m == 0.0 || m == 2.0, "unexpected mask entry {m}");
        }
        let kept = mask.iter().filter(|&&m| m != 0.0).count() as f32 / 1024.0;
        assert!((0.35..0.65).contains(&kept), "kept fraction {kept} far from 0.5");
    }

    #[test]
    fn test_dropout_mask_keep_one_is_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        let mask = dropout_mask((8, 8), 1.0, &mut rng);
        assert!(mask.iter().all(|&m| m == 1.0));
    }

    proptest! {
        #[test]
        fn prop_softmax_rows_are_distributions(
            vals in proptest::collection::vec(-50.0f32..50.0, 2..12),
        ) {
            let n = vals.len();
            let logits = Array2::from_shape_vec((1, n), vals).unwrap();
            let probs = softmax_rows(&logits);
            prop_assert!((probs.row(0).sum() - 1.0).abs() < 1e-4);
            for &p in probs.row(0) {
                prop_assert!((0.0..=1.0).contains(&p));
            }
        }
    }
}
