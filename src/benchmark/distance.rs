//! Distance and similarity primitives plus summary statistics
//!
//! Shared by the matchers, the GAP calculator and the PCA validation pass.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::records::IndexPair;
use crate::error::{EvalError, Result};

/// Calculate cosine similarity between two vectors
///
/// Returns 0 when either vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Euclidean (L2) distance between two vectors of equal length
pub fn euclidean_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Scale each row to unit L2 norm; zero rows stay zero
pub fn normalize_rows(m: ArrayView2<f32>) -> Array2<f32> {
    let mut out = m.to_owned();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        }
    }
    out
}

/// Pairwise cosine similarity, shape `a.rows × b.rows`
pub fn cosine_similarity_matrix(a: ArrayView2<f32>, b: ArrayView2<f32>) -> Result<Array2<f32>> {
    check_same_dim(a, b)?;
    let a = normalize_rows(a);
    let b = normalize_rows(b);
    Ok(a.dot(&b.t()))
}

/// Pairwise euclidean distance, shape `a.rows × b.rows`
pub fn euclidean_distance_matrix(a: ArrayView2<f32>, b: ArrayView2<f32>) -> Result<Array2<f32>> {
    check_same_dim(a, b)?;
    let mut out = Array2::zeros((a.nrows(), b.nrows()));
    for (i, ra) in a.axis_iter(Axis(0)).enumerate() {
        for (j, rb) in b.axis_iter(Axis(0)).enumerate() {
            out[[i, j]] = euclidean_distance(ra, rb);
        }
    }
    Ok(out)
}

fn check_same_dim(a: ArrayView2<f32>, b: ArrayView2<f32>) -> Result<()> {
    if a.ncols() != b.ncols() {
        return Err(EvalError::DimensionMismatch {
            left: a.shape().to_vec(),
            right: b.shape().to_vec(),
        });
    }
    Ok(())
}

/// Index and value of the first maximum (NaN never wins)
pub fn argmax_first(values: ArrayView1<f32>) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best
}

/// Index and value of the first minimum (NaN never wins)
pub fn argmin_first(values: ArrayView1<f32>) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, b)| v < b) {
            best = Some((i, v));
        }
    }
    best
}

/// Indices of a row sorted by decreasing value; ties keep index order
pub fn ranked_indices_desc(values: ArrayView1<f32>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    order
}

/// Check that every ground-truth pair indexes into both sets
pub fn check_pairs(ground_truth: &[IndexPair], probe_len: usize, reference_len: usize) -> Result<()> {
    for pair in ground_truth {
        if pair.probe >= probe_len {
            return Err(EvalError::IndexOutOfRange {
                what: "probe",
                index: pair.probe,
                len: probe_len,
            });
        }
        if pair.reference >= reference_len {
            return Err(EvalError::IndexOutOfRange {
                what: "reference",
                index: pair.reference,
                len: reference_len,
            });
        }
    }
    Ok(())
}

// =============================================================================
// TOP-K HITS / CONFUSION MATRIX
// =============================================================================

/// Hit counts for the true reference among the top results of each probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopKHits {
    pub hit_at_1_euclidean: usize,
    pub hit_at_5_euclidean: usize,
    pub hit_at_1_cosine: usize,
    pub hit_at_5_cosine: usize,
}

/// Count hit@1 and hit@5 under euclidean distance and cosine similarity
pub fn top_k_hits(
    ground_truth: &[IndexPair],
    probe: ArrayView2<f32>,
    reference: ArrayView2<f32>,
) -> Result<TopKHits> {
    check_pairs(ground_truth, probe.nrows(), reference.nrows())?;
    let distances = euclidean_distance_matrix(probe, reference)?;
    let similarities = cosine_similarity_matrix(probe, reference)?;

    let mut hits = TopKHits::default();
    for pair in ground_truth {
        let mut by_distance: Vec<usize> = (0..reference.nrows()).collect();
        let row = distances.row(pair.probe);
        by_distance.sort_by(|&a, &b| row[a].total_cmp(&row[b]));
        let by_similarity = ranked_indices_desc(similarities.row(pair.probe));

        if by_distance.first() == Some(&pair.reference) {
            hits.hit_at_1_euclidean += 1;
        }
        if by_distance.iter().take(5).any(|&i| i == pair.reference) {
            hits.hit_at_5_euclidean += 1;
        }
        if by_similarity.first() == Some(&pair.reference) {
            hits.hit_at_1_cosine += 1;
        }
        if by_similarity.iter().take(5).any(|&i| i == pair.reference) {
            hits.hit_at_5_cosine += 1;
        }
    }
    Ok(hits)
}

/// How a threshold is applied when building a confusion matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    /// Match when distance <= threshold
    Euclidean,
    /// Match when similarity >= threshold
    Cosine,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

/// Threshold every probe/reference score of the ground-truth probes
///
/// The true reference counts as positive, every other reference as negative.
pub fn confusion_matrix(
    ground_truth: &[IndexPair],
    probe: ArrayView2<f32>,
    reference: ArrayView2<f32>,
    threshold: f32,
    mode: ThresholdMode,
) -> Result<ConfusionMatrix> {
    check_pairs(ground_truth, probe.nrows(), reference.nrows())?;
    let scores = match mode {
        ThresholdMode::Euclidean => euclidean_distance_matrix(probe, reference)?,
        ThresholdMode::Cosine => cosine_similarity_matrix(probe, reference)?,
    };
    let accepts = |score: f32| match mode {
        ThresholdMode::Euclidean => score <= threshold,
        ThresholdMode::Cosine => score >= threshold,
    };

    let mut cm = ConfusionMatrix::default();
    for pair in ground_truth {
        for (j, &score) in scores.row(pair.probe).iter().enumerate() {
            match (j == pair.reference, accepts(score)) {
                (true, true) => cm.true_positives += 1,
                (true, false) => cm.false_negatives += 1,
                (false, true) => cm.false_positives += 1,
                (false, false) => cm.true_negatives += 1,
            }
        }
    }
    Ok(cm)
}

// =============================================================================
// POSITIVE / NEGATIVE DISTANCE STATISTICS
// =============================================================================

/// Per-pair distances to the true reference and to one random non-match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistanceSamples {
    pub positive_distances: Vec<f32>,
    pub negative_distances: Vec<f32>,
    pub positive_similarities: Vec<f32>,
    pub negative_similarities: Vec<f32>,
}

impl DistanceSamples {
    pub fn extend(&mut self, other: DistanceSamples) {
        self.positive_distances.extend(other.positive_distances);
        self.negative_distances.extend(other.negative_distances);
        self.positive_similarities.extend(other.positive_similarities);
        self.negative_similarities.extend(other.negative_similarities);
    }
}

/// Sample positive and negative distances for every ground-truth pair
pub fn calculate_distance<R: Rng>(
    ground_truth: &[IndexPair],
    probe: ArrayView2<f32>,
    reference: ArrayView2<f32>,
    rng: &mut R,
) -> Result<DistanceSamples> {
    check_same_dim(probe, reference)?;
    check_pairs(ground_truth, probe.nrows(), reference.nrows())?;
    if !ground_truth.is_empty() && reference.nrows() < 2 {
        return Err(EvalError::InvalidParameter(
            "need at least two references to draw a negative".to_string(),
        ));
    }

    let mut samples = DistanceSamples::default();
    for pair in ground_truth {
        let q = probe.row(pair.probe);
        let positive = reference.row(pair.reference);

        // Uniform over every reference except the true one
        let mut negative_idx = rng.gen_range(0..reference.nrows() - 1);
        if negative_idx >= pair.reference {
            negative_idx += 1;
        }
        let negative = reference.row(negative_idx);

        samples.positive_distances.push(euclidean_distance(q, positive));
        samples.positive_similarities.push(cosine_similarity(q, positive));
        samples.negative_distances.push(euclidean_distance(q, negative));
        samples.negative_similarities.push(cosine_similarity(q, negative));
    }
    Ok(samples)
}

/// Mean positive/negative distance and similarity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceSummary {
    pub mean_positive_distance: f32,
    pub mean_negative_distance: f32,
    pub mean_positive_similarity: f32,
    pub mean_negative_similarity: f32,
}

impl DistanceSummary {
    pub fn from_samples(samples: &DistanceSamples) -> Self {
        Self {
            mean_positive_distance: mean(&samples.positive_distances),
            mean_negative_distance: mean(&samples.negative_distances),
            mean_positive_similarity: mean(&samples.positive_similarities),
            mean_negative_similarity: mean(&samples.negative_similarities),
        }
    }

    /// Format as a summary string
    pub fn format_summary(&self) -> String {
        format!(
            "average positive distance: {}\naverage negative distance: {}\n\n\
             average positive similarity: {}\naverage negative similarity: {}",
            self.mean_positive_distance,
            self.mean_negative_distance,
            self.mean_positive_similarity,
            self.mean_negative_similarity
        )
    }
}

/// Summary over row-aligned (anchor, positive, negative) triplets
pub fn paired_distance_summary<'a>(
    anchor: ArrayView2<'a, f32>,
    positive: ArrayView2<'a, f32>,
    negative: ArrayView2<'a, f32>,
) -> Result<DistanceSummary> {
    for other in [positive, negative] {
        if other.nrows() != anchor.nrows() {
            return Err(EvalError::LengthMismatch {
                what: "triplet rows",
                left: anchor.nrows(),
                right: other.nrows(),
            });
        }
        check_same_dim(anchor, other)?;
    }

    let mut samples = DistanceSamples::default();
    for ((a, p), n) in anchor
        .axis_iter(Axis(0))
        .zip(positive.axis_iter(Axis(0)))
        .zip(negative.axis_iter(Axis(0)))
    {
        samples.positive_distances.push(euclidean_distance(a, p));
        samples.negative_distances.push(euclidean_distance(a, n));
        samples.positive_similarities.push(cosine_similarity(a, p));
        samples.negative_similarities.push(cosine_similarity(a, n));
    }
    Ok(DistanceSummary::from_samples(&samples))
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_cosine_similarity() {
        let a = Array1::from(vec![1.0, 0.0, 0.0]);
        let b = Array1::from(vec![1.0, 0.0, 0.0]);
        assert!((cosine_similarity(a.view(), b.view()) - 1.0).abs() < 0.0001);

        let c = Array1::from(vec![0.0, 1.0, 0.0]);
        assert!(cosine_similarity(a.view(), c.view()).abs() < 0.0001);

        let zero = Array1::from(vec![0.0, 0.0, 0.0]);
        assert_eq!(cosine_similarity(a.view(), zero.view()), 0.0);
    }

    #[test]
    fn test_similarity_matrix_matches_pairwise() {
        let a = array![[1.0f32, 2.0], [0.0, 1.0]];
        let b = array![[2.0f32, 1.0], [1.0, 1.0], [0.0, 3.0]];
        let m = cosine_similarity_matrix(a.view(), b.view()).unwrap();
        assert_eq!(m.shape(), &[2, 3]);
        for i in 0..2 {
            for j in 0..3 {
                let expected = cosine_similarity(a.row(i), b.row(j));
                assert!((m[[i, j]] - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = array![[1.0f32, 2.0]];
        let b = array![[1.0f32, 2.0, 3.0]];
        assert!(matches!(
            cosine_similarity_matrix(a.view(), b.view()),
            Err(EvalError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_argmax_first_on_ties() {
        let v = Array1::from(vec![0.2f32, 0.9, 0.9, 0.1]);
        assert_eq!(argmax_first(v.view()), Some((1, 0.9)));
        let w = Array1::from(vec![0.5f32, 0.1, 0.1]);
        assert_eq!(argmin_first(w.view()), Some((1, 0.1)));
        assert_eq!(argmax_first(Array1::<f32>::zeros(0).view()), None);
    }

    #[test]
    fn test_top_k_hits() {
        let probe = array![[1.0f32, 0.0], [0.0, 1.0]];
        let reference = array![[0.0f32, 1.0], [1.0, 0.0]];
        let gt = vec![IndexPair::new(0, 1), IndexPair::new(1, 1)];
        let hits = top_k_hits(&gt, probe.view(), reference.view()).unwrap();
        assert_eq!(hits.hit_at_1_cosine, 1);
        assert_eq!(hits.hit_at_1_euclidean, 1);
        assert_eq!(hits.hit_at_5_cosine, 2);
        assert_eq!(hits.hit_at_5_euclidean, 2);
    }

    #[test]
    fn test_confusion_matrix_cosine() {
        let probe = array![[1.0f32, 0.0]];
        let reference = array![[1.0f32, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let gt = vec![IndexPair::new(0, 0)];
        let cm = confusion_matrix(&gt, probe.view(), reference.view(), 0.5, ThresholdMode::Cosine)
            .unwrap();
        assert_eq!(cm.true_positives, 1);
        assert_eq!(cm.false_negatives, 0);
        // cos = 0.707 for [1,1] passes, [0,1] fails
        assert_eq!(cm.false_positives, 1);
        assert_eq!(cm.true_negatives, 1);
    }

    #[test]
    fn test_calculate_distance_never_samples_positive() {
        let probe = array![[1.0f32, 0.0], [0.0, 1.0]];
        let reference = array![[1.0f32, 0.0], [0.0, 1.0], [3.0, 4.0]];
        let gt = vec![IndexPair::new(0, 0), IndexPair::new(1, 1)];
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let samples = calculate_distance(&gt, probe.view(), reference.view(), &mut rng).unwrap();
            assert_eq!(samples.positive_distances, vec![0.0, 0.0]);
            assert!(samples.negative_distances.iter().all(|&d| d > 0.0));
            assert!(samples.positive_similarities.iter().all(|&s| (s - 1.0).abs() < 1e-6));
        }
    }

    #[test]
    fn test_calculate_distance_single_reference_fails() {
        let probe = array![[1.0f32, 0.0]];
        let reference = array![[1.0f32, 0.0]];
        let mut rng = StdRng::seed_from_u64(1);
        assert!(calculate_distance(&[IndexPair::new(0, 0)], probe.view(), reference.view(), &mut rng).is_err());
    }

    #[test]
    fn test_paired_distance_summary() {
        let anchor = array![[0.0f32, 1.0], [1.0, 0.0]];
        let positive = array![[0.0f32, 1.0], [1.0, 0.0]];
        let negative = array![[3.0f32, 1.0], [1.0, 4.0]];
        let summary = paired_distance_summary(anchor.view(), positive.view(), negative.view()).unwrap();
        assert_eq!(summary.mean_positive_distance, 0.0);
        assert!((summary.mean_negative_distance - 3.5).abs() < 1e-6);
        assert!((summary.mean_positive_similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_paired_distance_summary_checks_both_sides() {
        let anchor = array![[0.0f32, 1.0], [1.0, 0.0]];
        let short = array![[0.0f32, 1.0]];
        let wide = array![[0.0f32, 1.0, 0.0], [1.0, 0.0, 0.0]];

        assert!(matches!(
            paired_distance_summary(anchor.view(), anchor.view(), short.view()),
            Err(EvalError::LengthMismatch { right: 1, .. })
        ));
        assert!(matches!(
            paired_distance_summary(anchor.view(), wide.view(), anchor.view()),
            Err(EvalError::DimensionMismatch { .. })
        ));
    }
}
