//! Position-wise feature map matching
//!
//! Two maps are compared position by position: the cosine similarity of
//! the channel vectors at each spatial position, averaged over positions.

use ndarray::{Array2, Array3, ArrayView3, Axis};

use crate::error::{EvalError, Result};

/// Unit-normalise the channel vector at every position; zero vectors stay zero
pub fn normalize_positions(maps: ArrayView3<f32>) -> Array3<f32> {
    let mut out = maps.to_owned();
    for mut lane in out.lanes_mut(Axis(2)) {
        let norm = lane.dot(&lane).sqrt();
        if norm > 0.0 {
            lane.mapv_inplace(|v| v / norm);
        }
    }
    out
}

/// Mean per-position cosine similarity for every probe/reference map pair
///
/// Both sets must share the same `positions × channels` shape.
pub fn similarity_matrix(probe: ArrayView3<f32>, reference: ArrayView3<f32>) -> Result<Array2<f32>> {
    if probe.shape()[1..] != reference.shape()[1..] {
        return Err(EvalError::DimensionMismatch {
            left: probe.shape().to_vec(),
            right: reference.shape().to_vec(),
        });
    }
    let (n_probe, positions, channels) = probe.dim();
    let n_reference = reference.len_of(Axis(0));
    if positions == 0 {
        return Ok(Array2::zeros((n_probe, n_reference)));
    }

    // Flattened unit maps: one dot product sums the per-position cosines
    let flatten = |maps: Array3<f32>, n: usize| {
        maps.into_shape_with_order((n, positions * channels))
            .map_err(|e| EvalError::InvalidParameter(e.to_string()))
    };
    let a = flatten(normalize_positions(probe), n_probe)?;
    let b = flatten(normalize_positions(reference), n_reference)?;

    let mut similarities = a.dot(&b.t());
    similarities.mapv_inplace(|v| v / positions as f32);
    Ok(similarities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// One-hot channel maps: `channels[i][p]` is the active channel at position p
    fn one_hot(channels: &[&[usize]], depth: usize) -> Array3<f32> {
        let positions = channels[0].len();
        let mut maps = Array3::zeros((channels.len(), positions, depth));
        for (i, row) in channels.iter().enumerate() {
            for (p, &c) in row.iter().enumerate() {
                maps[[i, p, c]] = 1.0;
            }
        }
        maps
    }

    #[test]
    fn test_identical_maps_score_one() {
        let maps = one_hot(&[&[0, 1, 2, 0]], 3);
        let sims = similarity_matrix(maps.view(), maps.view()).unwrap();
        assert!((sims[[0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_partial_overlap_averages_positions() {
        let probe = one_hot(&[&[0, 1, 2, 0]], 3);
        let reference = one_hot(&[&[0, 1, 0, 1], &[1, 0, 1, 1]], 3);
        let sims = similarity_matrix(probe.view(), reference.view()).unwrap();
        // 2 of 4 positions agree with the first reference, none with the second
        assert!((sims[[0, 0]] - 0.5).abs() < 1e-6);
        assert!(sims[[0, 1]].abs() < 1e-6);
    }

    #[test]
    fn test_scale_invariant_per_position() {
        let mut probe = one_hot(&[&[0, 1]], 2);
        probe[[0, 0, 0]] = 5.0;
        let reference = one_hot(&[&[0, 1]], 2);
        let sims = similarity_matrix(probe.view(), reference.view()).unwrap();
        assert!((sims[[0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_shape_mismatch() {
        let probe = Array3::<f32>::zeros((1, 4, 3));
        let reference = Array3::<f32>::zeros((1, 2, 3));
        assert!(matches!(
            similarity_matrix(probe.view(), reference.view()),
            Err(EvalError::DimensionMismatch { .. })
        ));
    }
}
