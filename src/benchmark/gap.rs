//! Global average precision (GAP)
//!
//! Every probe contributes its single top-1 prediction. Predictions are
//! re-ranked globally by confidence and precision@k is accumulated over the
//! correct ones, normalised by the ground-truth size.

use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::distance::{
    argmax_first, argmin_first, check_pairs, cosine_similarity_matrix, euclidean_distance_matrix,
};
use super::records::IndexPair;
use crate::error::{EvalError, Result};

/// Direction in which confidences are re-ranked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceOrder {
    Ascending,
    Descending,
}

/// GAP over confidences sorted ascending
///
/// `confidence` and `correct` are index-aligned to the probe set.
pub fn calculate_gap(confidence: &[f64], correct: &[bool], ground_truth_len: usize) -> Result<f64> {
    gap_with_order(confidence, correct, ground_truth_len, ConfidenceOrder::Ascending)
}

/// GAP with an explicit re-ranking direction
///
/// The sort is stable and NaN confidences are placed last in either direction.
pub fn gap_with_order(
    confidence: &[f64],
    correct: &[bool],
    ground_truth_len: usize,
    order: ConfidenceOrder,
) -> Result<f64> {
    if confidence.len() != correct.len() {
        return Err(EvalError::LengthMismatch {
            what: "confidence/correct",
            left: confidence.len(),
            right: correct.len(),
        });
    }
    if ground_truth_len == 0 {
        return Err(EvalError::EmptyGroundTruth);
    }

    let mut ranked: Vec<usize> = (0..confidence.len()).collect();
    ranked.sort_by(|&a, &b| {
        let (ca, cb) = (confidence[a], confidence[b]);
        match (ca.is_nan(), cb.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => match order {
                ConfidenceOrder::Ascending => ca.total_cmp(&cb),
                ConfidenceOrder::Descending => cb.total_cmp(&ca),
            },
        }
    });

    let mut cumulative = 0usize;
    let mut total = 0.0;
    for (k, &idx) in ranked.iter().enumerate() {
        if correct[idx] {
            cumulative += 1;
            total += cumulative as f64 / (k + 1) as f64;
        }
    }
    Ok(total / ground_truth_len as f64)
}

/// GAP under both euclidean and cosine top-1 matching
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DualGap {
    /// Top-1 by smallest distance, confidences re-ranked ascending
    pub euclidean: f64,
    /// Top-1 by highest similarity, confidences re-ranked descending
    pub cosine: f64,
}

/// Match every probe to its nearest reference and compute both GAP variants
pub fn global_average_precision(
    ground_truth: &[IndexPair],
    probe: ArrayView2<f32>,
    reference: ArrayView2<f32>,
) -> Result<DualGap> {
    check_pairs(ground_truth, probe.nrows(), reference.nrows())?;
    let distances = euclidean_distance_matrix(probe, reference)?;
    let similarities = cosine_similarity_matrix(probe, reference)?;

    let top_by_distance: Vec<Option<(usize, f32)>> =
        distances.axis_iter(Axis(0)).map(argmin_first).collect();
    let top_by_similarity: Vec<Option<(usize, f32)>> =
        similarities.axis_iter(Axis(0)).map(argmax_first).collect();

    let mut correct_euclidean = vec![false; probe.nrows()];
    let mut correct_cosine = vec![false; probe.nrows()];
    for pair in ground_truth {
        if top_by_distance[pair.probe].map(|(i, _)| i) == Some(pair.reference) {
            correct_euclidean[pair.probe] = true;
        }
        if top_by_similarity[pair.probe].map(|(i, _)| i) == Some(pair.reference) {
            correct_cosine[pair.probe] = true;
        }
    }

    Ok(DualGap {
        euclidean: gap_with_order(
            &top_confidences(&top_by_distance),
            &correct_euclidean,
            ground_truth.len(),
            ConfidenceOrder::Ascending,
        )?,
        cosine: gap_with_order(
            &top_confidences(&top_by_similarity),
            &correct_cosine,
            ground_truth.len(),
            ConfidenceOrder::Descending,
        )?,
    })
}

fn top_confidences(top: &[Option<(usize, f32)>]) -> Vec<f64> {
    top.iter()
        .map(|t| t.map_or(f64::NAN, |(_, v)| v as f64))
        .collect()
}
