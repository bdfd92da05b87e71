//! Precision/recall curves, average precision and operating points
//!
//! ## Tie handling
//!
//! Predictions are ranked by decreasing score. Among equal scores, negatives
//! are ranked before positives, which yields the worst cumulative precision a
//! tied block can produce. Giving every prediction the same score therefore
//! cannot inflate the result.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{EvalError, Result};

/// Precision/recall curve ordered by increasing recall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecisionRecall {
    pub precisions: Vec<f64>,
    pub recalls: Vec<f64>,
    /// Score at each position (decreasing)
    pub thresholds: Vec<f64>,
}

/// Compute the precision/recall curve of scored binary predictions
///
/// # Arguments
/// * `labels` - correctness of each prediction
/// * `scores` - score of each prediction (higher = more similar)
/// * `num_positives` - positives in the ground truth, the recall denominator
pub fn precision_recall(
    labels: &[bool],
    scores: &[f64],
    num_positives: usize,
) -> Result<PrecisionRecall> {
    if labels.len() != scores.len() {
        return Err(EvalError::LengthMismatch {
            what: "labels/scores",
            left: labels.len(),
            right: scores.len(),
        });
    }
    if num_positives == 0 {
        return Err(EvalError::NoPositives);
    }

    // Ascending stable sort on (score, !label), then reversed.
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .total_cmp(&scores[b])
            .then_with(|| (!labels[a]).cmp(&!labels[b]))
    });
    order.reverse();

    let mut precisions = Vec::with_capacity(order.len());
    let mut recalls = Vec::with_capacity(order.len());
    let mut thresholds = Vec::with_capacity(order.len());
    let mut ntp = 0usize;

    for (i, &idx) in order.iter().enumerate() {
        if labels[idx] {
            ntp += 1;
        }
        precisions.push(ntp as f64 / (i + 1) as f64);
        recalls.push(ntp as f64 / num_positives as f64);
        thresholds.push(scores[idx]);
    }

    Ok(PrecisionRecall {
        precisions,
        recalls,
        thresholds,
    })
}

/// Micro average precision (uAP) over the full operating range
///
/// Σ (recall[i] − recall[i−1]) · precision[i], with recall[−1] = 0.
pub fn average_precision(recalls: &[f64], precisions: &[f64]) -> Result<f64> {
    if recalls.len() != precisions.len() {
        return Err(EvalError::LengthMismatch {
            what: "recalls/precisions",
            left: recalls.len(),
            right: precisions.len(),
        });
    }
    if let Some(index) = recalls.windows(2).position(|w| w[0] > w[1]) {
        return Err(EvalError::UnsortedRecalls { index: index + 1 });
    }

    let mut previous = 0.0;
    let mut ap = 0.0;
    for (&r, &p) in recalls.iter().zip(precisions) {
        ap += (r - previous) * p;
        previous = r;
    }
    Ok(ap)
}

/// Best achievable operating point under a minimum-x constraint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperatingPoint {
    pub x: f64,
    /// `None` when no point reaches the required x
    pub y: Option<f64>,
    pub z: Option<f64>,
}

/// Find the highest `y` among points with `x >= required_x`
///
/// Returns the associated `x` and `z` too. When several points share the
/// maximum `y`, the first one in input order wins. When no point qualifies the
/// result is `(required_x, None, None)`.
pub fn find_operating_point(
    x: &[f64],
    y: &[f64],
    z: &[f64],
    required_x: f64,
) -> Result<OperatingPoint> {
    if x.len() != y.len() || x.len() != z.len() {
        return Err(EvalError::LengthMismatch {
            what: "operating point x/y/z",
            left: x.len(),
            right: y.len().min(z.len()),
        });
    }

    let mut best: Option<usize> = None;
    for i in (0..x.len()).filter(|&i| x[i] >= required_x) {
        let better = match best {
            None => true,
            Some(b) => y[i].partial_cmp(&y[b]) == Some(Ordering::Greater),
        };
        if better {
            best = Some(i);
        }
    }

    Ok(match best {
        Some(i) => OperatingPoint {
            x: x[i],
            y: Some(y[i]),
            z: Some(z[i]),
        },
        None => OperatingPoint {
            x: required_x,
            y: None,
            z: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_recall_sorted_by_score() {
        let labels = [false, true, true, false];
        let scores = [0.2, 0.9, 0.5, 0.7];
        let pr = precision_recall(&labels, &scores, 2).unwrap();

        assert_eq!(pr.thresholds, vec![0.9, 0.7, 0.5, 0.2]);
        assert_eq!(pr.precisions, vec![1.0, 0.5, 2.0 / 3.0, 0.5]);
        assert_eq!(pr.recalls, vec![0.5, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_recalls_non_decreasing_and_final_recall() {
        let labels = [true, false, true, true, false, false, true];
        let scores = [0.3, 0.3, 0.8, 0.1, 0.95, 0.3, 0.5];
        let pr = precision_recall(&labels, &scores, 5).unwrap();

        assert!(pr.recalls.windows(2).all(|w| w[0] <= w[1]));
        let last = *pr.recalls.last().unwrap();
        assert!((last - 4.0 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_precision_recall_zero_positives_fails() {
        let err = precision_recall(&[false], &[0.5], 0).unwrap_err();
        assert_eq!(err, EvalError::NoPositives);
    }

    #[test]
    fn test_tied_scores_rank_negatives_first() {
        // One positive and one negative with the same score.
        let pr = precision_recall(&[true, false], &[0.5, 0.5], 1).unwrap();
        assert_eq!(pr.precisions, vec![0.0, 0.5]);
        assert_eq!(pr.recalls, vec![0.0, 1.0]);

        let ap = average_precision(&pr.recalls, &pr.precisions).unwrap();
        // Pessimistic value, an optimistic ordering would give 1.0
        assert!((ap - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_average_precision_perfect_ranking() {
        let labels = [true, true, false, false];
        let scores = [0.9, 0.8, 0.3, 0.1];
        let pr = precision_recall(&labels, &scores, 2).unwrap();
        let ap = average_precision(&pr.recalls, &pr.precisions).unwrap();
        assert!((ap - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_average_precision_all_false() {
        let labels = [false, false, false];
        let scores = [0.9, 0.8, 0.3];
        let pr = precision_recall(&labels, &scores, 2).unwrap();
        let ap = average_precision(&pr.recalls, &pr.precisions).unwrap();
        assert_eq!(ap, 0.0);
    }

    #[test]
    fn test_average_precision_rejects_unsorted_recalls() {
        let err = average_precision(&[0.5, 0.2, 1.0], &[1.0, 1.0, 1.0]).unwrap_err();
        assert_eq!(err, EvalError::UnsortedRecalls { index: 1 });
    }

    #[test]
    fn test_operating_point_unreachable() {
        let op = find_operating_point(&[0.5, 0.8], &[0.2, 0.6], &[0.9, 0.4], 0.95).unwrap();
        assert_eq!(op.x, 0.95);
        assert_eq!(op.y, None);
        assert_eq!(op.z, None);
    }

    #[test]
    fn test_operating_point_first_max_wins() {
        let x = [1.0, 0.95, 0.92, 0.5];
        let y = [0.2, 0.6, 0.6, 0.9];
        let z = [0.9, 0.7, 0.6, 0.1];
        let op = find_operating_point(&x, &y, &z, 0.9).unwrap();
        assert_eq!(op.x, 0.95);
        assert_eq!(op.y, Some(0.6));
        assert_eq!(op.z, Some(0.7));
    }
}
