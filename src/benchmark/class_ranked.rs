//! Class-ranked retrieval metrics for labelled embedding sets
//!
//! Every item queries all items (itself included) by cosine similarity. The
//! item itself is expected at the top of its own ranking and is discounted
//! from the hit count.

use ndarray::{ArrayView2, Axis};
use std::collections::HashMap;

use super::distance::{cosine_similarity_matrix, ranked_indices_desc};
use crate::error::{EvalError, Result};

fn class_sizes(labels: &[usize]) -> HashMap<usize, usize> {
    let mut sizes = HashMap::new();
    for &label in labels {
        *sizes.entry(label).or_insert(0) += 1;
    }
    sizes
}

fn check_inputs(labels: &[usize], vectors: ArrayView2<f32>, rank: usize) -> Result<()> {
    if labels.len() != vectors.nrows() {
        return Err(EvalError::LengthMismatch {
            what: "labels/vectors",
            left: labels.len(),
            right: vectors.nrows(),
        });
    }
    if labels.is_empty() {
        return Err(EvalError::InvalidParameter("no labelled items".to_string()));
    }
    if rank == 0 {
        return Err(EvalError::InvalidParameter("rank must be at least 1".to_string()));
    }
    Ok(())
}

/// Same-label hits among the first `take` neighbours, minus the item itself
fn neighbour_hits(label: usize, ranked: &[usize], labels: &[usize], take: usize) -> usize {
    let same = ranked
        .iter()
        .take(take)
        .filter(|&&j| labels[j] == label)
        .count();
    same.saturating_sub(1)
}

/// Class-balanced recall@rank
///
/// Each item contributes `sqrt(c / (c + 1)) · hits / c`, where `c` is the size
/// of its class and `hits` the same-class items among its `rank` nearest
/// neighbours excluding itself. The result is the mean over items; the weight
/// damps the dominance of large classes, so a perfect ranking scores below 1.
pub fn ranked_recall(labels: &[usize], vectors: ArrayView2<f32>, rank: usize) -> Result<f64> {
    check_inputs(labels, vectors, rank)?;
    let sizes = class_sizes(labels);
    let similarities = cosine_similarity_matrix(vectors, vectors)?;

    let mut recall = 0.0;
    for (i, row) in similarities.axis_iter(Axis(0)).enumerate() {
        let label = labels[i];
        let class_num = sizes[&label] as f64;
        let weight = (class_num / (class_num + 1.0)).sqrt();
        let ranked = ranked_indices_desc(row);
        let tp = neighbour_hits(label, &ranked, labels, rank) as f64;
        recall += weight * (tp / class_num);
    }
    Ok(recall / labels.len() as f64)
}

/// Mean of per-class precision@rank
///
/// For every item, precision over its `rank` nearest neighbours excluding
/// itself (`rank + 1` are retrieved) is added to its class with weight
/// `1 / class_size`. The class values are averaged over `num_classes`, so
/// classes without items count as zero.
///
/// An item has only `class_size - 1` same-class neighbours once it is
/// discounted, so a perfectly separated class scores 1 only for
/// `rank < class_size`. At `rank == class_size` the last slot must hold another
/// class and precision drops to `(class_size - 1) / class_size`.
pub fn ranked_mean_precision(
    labels: &[usize],
    vectors: ArrayView2<f32>,
    rank: usize,
    num_classes: usize,
) -> Result<f64> {
    check_inputs(labels, vectors, rank)?;
    if let Some(&label) = labels.iter().find(|&&l| l >= num_classes) {
        return Err(EvalError::IndexOutOfRange {
            what: "class label",
            index: label,
            len: num_classes,
        });
    }
    let sizes = class_sizes(labels);
    let similarities = cosine_similarity_matrix(vectors, vectors)?;

    let mut precisions = vec![0.0; num_classes];
    for (i, row) in similarities.axis_iter(Axis(0)).enumerate() {
        let label = labels[i];
        let class_num = sizes[&label] as f64;
        let ranked = ranked_indices_desc(row);
        let tp = neighbour_hits(label, &ranked, labels, rank + 1);
        let fp = rank - tp.min(rank);
        precisions[label] += (tp as f64 / (tp + fp) as f64) / class_num;
    }
    Ok(precisions.iter().sum::<f64>() / num_classes as f64)
}

/// Number of classes implied by the labels (max label + 1)
pub fn infer_num_classes(labels: &[usize]) -> usize {
    labels.iter().max().map_or(0, |&m| m + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Two classes of identical vectors on orthogonal axes
    fn separable(per_class: usize) -> (Vec<usize>, Array2<f32>) {
        let mut labels = Vec::new();
        let mut data = Vec::new();
        for class in 0..2 {
            for _ in 0..per_class {
                labels.push(class);
                data.extend(if class == 0 { [1.0, 0.0] } else { [0.0, 1.0] });
            }
        }
        let vectors = Array2::from_shape_vec((2 * per_class, 2), data).unwrap();
        (labels, vectors)
    }

    #[test]
    fn test_mean_precision_separable_is_one() {
        let (labels, vectors) = separable(4);
        for rank in 1..4 {
            let map = ranked_mean_precision(&labels, vectors.view(), rank, 2).unwrap();
            assert!((map - 1.0).abs() < 1e-9, "rank {} gave {}", rank, map);
        }
    }

    #[test]
    fn test_mean_precision_at_class_size() {
        let (labels, vectors) = separable(4);
        // 3 same-class neighbours besides self fill 3 of 4 slots
        let map = ranked_mean_precision(&labels, vectors.view(), 4, 2).unwrap();
        assert!((map - 0.75).abs() < 1e-9, "{}", map);

        let map = ranked_mean_precision(&labels, vectors.view(), 8, 2).unwrap();
        assert!((map - 3.0 / 8.0).abs() < 1e-9, "{}", map);
    }

    #[test]
    fn test_recall_separable_hand_computed() {
        let (labels, vectors) = separable(4);
        // rank 4 retrieves the whole class: 3 hits besides self out of 4
        let expected = (4.0f64 / 5.0).sqrt() * 3.0 / 4.0;
        let recall = ranked_recall(&labels, vectors.view(), 4).unwrap();
        assert!((recall - expected).abs() < 1e-9);

        // Larger ranks cannot add same-class hits
        let recall_wide = ranked_recall(&labels, vectors.view(), 8).unwrap();
        assert!((recall_wide - expected).abs() < 1e-9);
    }

    #[test]
    fn test_recall_mixed_classes_is_lower() {
        let labels = vec![0, 1, 0, 1];
        let vectors = Array2::from_shape_vec((4, 2), vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0]).unwrap();
        let recall = ranked_recall(&labels, vectors.view(), 2).unwrap();
        assert_eq!(recall, 0.0);
        let map = ranked_mean_precision(&labels, vectors.view(), 1, 2).unwrap();
        assert_eq!(map, 0.0);
    }

    #[test]
    fn test_mean_precision_label_out_of_range() {
        let (labels, vectors) = separable(2);
        assert!(matches!(
            ranked_mean_precision(&labels, vectors.view(), 1, 1),
            Err(EvalError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_rank_zero_rejected() {
        let (labels, vectors) = separable(2);
        assert!(ranked_recall(&labels, vectors.view(), 0).is_err());
    }

    #[test]
    fn test_infer_num_classes() {
        assert_eq!(infer_num_classes(&[0, 3, 1]), 4);
        assert_eq!(infer_num_classes(&[]), 0);
    }
}
