//! Whole-embedding matching and nearest-neighbour search

use ndarray::{Array2, ArrayView2, Axis};

use crate::benchmark::distance::{cosine_similarity_matrix, ranked_indices_desc};
use crate::error::{EvalError, Result};

/// Cosine similarity between every probe and reference embedding
pub fn similarity_matrix(probe: ArrayView2<f32>, reference: ArrayView2<f32>) -> Result<Array2<f32>> {
    cosine_similarity_matrix(probe, reference)
}

/// The `k` most similar references per probe
#[derive(Debug, Clone, PartialEq)]
pub struct KnnResult {
    /// `probe × k` cosine similarities, decreasing along each row
    pub scores: Array2<f32>,
    /// `probe × k` reference indices aligned with `scores`
    pub indices: Array2<usize>,
}

impl KnnResult {
    pub fn k(&self) -> usize {
        self.scores.ncols()
    }
}

/// Exhaustive cosine k-NN; `k` is capped at the reference count
///
/// Equal scores keep reference index order.
pub fn knn_search(probe: ArrayView2<f32>, reference: ArrayView2<f32>, k: usize) -> Result<KnnResult> {
    if k == 0 {
        return Err(EvalError::InvalidParameter("k must be at least 1".to_string()));
    }
    let similarities = cosine_similarity_matrix(probe, reference)?;
    let k = k.min(reference.nrows());

    let mut scores = Array2::zeros((probe.nrows(), k));
    let mut indices = Array2::zeros((probe.nrows(), k));
    for (i, row) in similarities.axis_iter(Axis(0)).enumerate() {
        for (slot, &j) in ranked_indices_desc(row).iter().take(k).enumerate() {
            scores[[i, slot]] = row[j];
            indices[[i, slot]] = j;
        }
    }
    Ok(KnnResult { scores, indices })
}
