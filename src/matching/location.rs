//! Location-weighted feature map matching
//!
//! For a probe/reference map pair the positions of one map are matched to
//! the most similar positions of the other. A match keeps its cosine score
//! weighted by `exp(-Δ² / (2σ))`, where `Δ` is the distance between the two
//! position indices, so agreeing features in roughly the same place count
//! most. Both directions are scored, each normalised by `2 · positions`, and
//! summed; identical maps therefore score 1.
//!
//! Cost grows with probes × references × positions² × channels.

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3, Axis};

use super::feature_map::normalize_positions;
use crate::benchmark::distance::argmax_first;
use crate::error::{EvalError, Result};

/// Combined location-weighted score for every probe/reference map pair
pub fn similarity_matrix(
    probe: ArrayView3<f32>,
    reference: ArrayView3<f32>,
    sigma: f32,
) -> Result<Array2<f32>> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(EvalError::InvalidParameter(format!(
            "sigma must be a positive number, got {}",
            sigma
        )));
    }
    if probe.len_of(Axis(2)) != reference.len_of(Axis(2)) {
        return Err(EvalError::DimensionMismatch {
            left: probe.shape().to_vec(),
            right: reference.shape().to_vec(),
        });
    }

    let probe = normalize_positions(probe);
    let reference = normalize_positions(reference);

    let mut out = Array2::zeros((probe.len_of(Axis(0)), reference.len_of(Axis(0))));
    for (i, probe_map) in probe.axis_iter(Axis(0)).enumerate() {
        for (j, reference_map) in reference.axis_iter(Axis(0)).enumerate() {
            out[[i, j]] = pair_score(probe_map, reference_map, sigma);
        }
    }
    Ok(out)
}

/// Score of one pair of unit-normalised `positions × channels` maps
pub fn pair_score(probe_map: ArrayView2<f32>, reference_map: ArrayView2<f32>, sigma: f32) -> f32 {
    let cos = probe_map.dot(&reference_map.t());
    let forward = directional_score(cos.axis_iter(Axis(0)), sigma);
    let backward = directional_score(cos.axis_iter(Axis(1)), sigma);
    forward + backward
}

/// Weighted sum over source positions of their best target match
fn directional_score<'a>(rows: impl ExactSizeIterator<Item = ArrayView1<'a, f32>>, sigma: f32) -> f32 {
    let count = rows.len();
    if count == 0 {
        return 0.0;
    }
    let total: f32 = rows
        .enumerate()
        .filter_map(|(source, row)| argmax_first(row).map(|(target, c)| (source, target, c)))
        .map(|(source, target, confidence)| location_weight(source, target, sigma) * confidence)
        .sum();
    total / (2 * count) as f32
}

/// Gaussian weight of a position offset
pub fn location_weight(source: usize, target: usize, sigma: f32) -> f32 {
    let delta = source.abs_diff(target) as f32;
    (-(delta * delta) / (2.0 * sigma)).exp()
}
