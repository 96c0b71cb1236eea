//! Parameter initialization.

use ndarray::{Array, Dimension, ShapeBuilder};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Standard deviation of the weight initializer.
pub const WEIGHT_STDDEV: f32 = 0.1;
/// Constant used for every bias.
pub const BIAS_VALUE: f32 = 0.1;

/// Draw weights from a truncated normal: N(0, stddev) with samples beyond
/// two standard deviations rejected and redrawn.
pub fn truncated_normal<D, Sh>(shape: Sh, stddev: f32, rng: &mut StdRng) -> Array<f32, D>
where
    D: Dimension,
    Sh: ShapeBuilder<Dim = D>,
{
    let dist = Normal::new(0.0f32, stddev).expect("stddev is finite and positive");
    Array::from_shape_simple_fn(shape, || loop {
        let v = dist.sample(rng);
        if v.abs() <= 2.0 * stddev {
            break v;
        }
    })
}

/// Constant bias vector.
pub fn constant_bias<D, Sh>(shape: Sh) -> Array<f32, D>
where
    D: Dimension,
    Sh: ShapeBuilder<Dim = D>,
{
    Array::from_elem(shape, BIAS_VALUE)
}
