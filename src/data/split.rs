//! Shuffle-and-cut train/test splitting.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::FlowDataset;
use crate::{Error, Result};

/// Shuffle the dataset and cut it into disjoint train/test subsets.
///
/// A random permutation of `[0, N)` is applied jointly to all three aligned
/// arrays, then cut at `floor(N * ratio)`: the first segment becomes the
/// train subset, the remainder the test subset. A seed makes the permutation
/// reproducible; `None` draws from entropy.
///
/// # Errors
///
/// `Error::Config` when `ratio` lies outside `(0.0, 1.0]`.
pub fn shuffle_split(
    dataset: &FlowDataset,
    ratio: f32,
    seed: Option<u64>,
) -> Result<(FlowDataset, FlowDataset)> {
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let (train_idx, test_idx) = split_indices(dataset.len(), ratio, &mut rng)?;
    Ok((dataset.select(&train_idx), dataset.select(&test_idx)))
}

/// Produce the permuted train/test index sets for a dataset of `n` rows.
///
/// Invariant: the two sets are disjoint and together cover `[0, n)` exactly
/// once; the train set holds `floor(n * ratio)` indices.
pub fn split_indices(
    n: usize,
    ratio: f32,
    rng: &mut impl Rng,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(ratio > 0.0 && ratio <= 1.0) {
        return Err(Error::Config(format!(
            "split ratio must lie in (0.0, 1.0], got {ratio}"
        )));
    }
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    let train_len = (n as f64 * f64::from(ratio)).floor() as usize;
    let test_idx = indices.split_off(train_len);
    Ok((indices, test_idx))
}
