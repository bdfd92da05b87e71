//! Aggregate retrieval quality for scored predictions
//!
//! Implements average precision, recall at 90% precision and recall at rank
//! 1/10 for a list of `(query, db, score)` predictions against ground truth.
//!
//! ## Metrics Overview
//!
//! - **AP**: micro average precision over all predictions, ranked globally
//! - **Recall@P90**: best recall reachable while precision stays >= 0.9
//! - **Recall@rank K**: fraction of ground-truth pairs whose true db entry is
//!   among the query's K best predictions

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::ranking::{average_precision, find_operating_point, precision_recall};
use super::records::{GroundTruthMatch, PredictedMatch};
use crate::error::{EvalError, Result};

/// Rank assigned when the true match is absent from a query's predictions
pub const RANK_NOT_FOUND: u64 = 1 << 35;

/// Minimum precision of the reported operating point
pub const REQUIRED_PRECISION: f64 = 0.9;

/// Full evaluation report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub average_precision: f64,
    /// Ordered by increasing recall
    pub precisions: Vec<f64>,
    pub recalls: Vec<f64>,
    pub thresholds: Vec<f64>,
    /// `None` when precision 0.9 is never reached
    pub recall_at_p90: Option<f64>,
    pub threshold_at_p90: Option<f64>,
    pub recall_at_rank1: f64,
    pub recall_at_rank10: f64,
}

impl Metrics {
    /// Format as the printed report
    pub fn format_summary(&self) -> String {
        let mut lines = vec![format!("Average Precision: {:.5}", self.average_precision)];
        match (self.recall_at_p90, self.threshold_at_p90) {
            (Some(recall), Some(threshold)) => {
                lines.push(format!("Recall at P90    : {:.5}", recall));
                lines.push(format!("Threshold at P90 : {}", threshold));
            }
            _ => lines.push("Does not reach P90".to_string()),
        }
        lines.push(format!("Recall at rank 1:  {:.5}", self.recall_at_rank1));
        lines.push(format!("Recall at rank 10: {:.5}", self.recall_at_rank10));
        lines.join("\n")
    }
}

/// Fail if several predictions share a (query, db) pair
pub fn check_duplicates(predictions: &[PredictedMatch]) -> Result<()> {
    let unique: HashSet<(&str, &str)> = predictions
        .iter()
        .map(|p| (p.query.as_str(), p.db.as_str()))
        .collect();
    if unique.len() != predictions.len() {
        return Err(EvalError::DuplicatePredictions {
            count: predictions.len() - unique.len(),
        });
    }
    Ok(())
}

/// Convert predictions to parallel (label, score) arrays via ground-truth membership
pub fn to_arrays(
    ground_truth: &[GroundTruthMatch],
    predictions: &[PredictedMatch],
) -> Result<(Vec<bool>, Vec<f64>)> {
    check_duplicates(predictions)?;
    if let Some(p) = predictions.iter().find(|p| !p.score.is_finite()) {
        return Err(EvalError::NonFiniteScore {
            query: p.query.clone(),
            db: p.db.clone(),
        });
    }

    let gt_set: HashSet<(&str, &str)> = ground_truth
        .iter()
        .map(|g| (g.query.as_str(), g.db.as_str()))
        .collect();

    let labels = predictions
        .iter()
        .map(|p| gt_set.contains(&(p.query.as_str(), p.db.as_str())))
        .collect();
    let scores = predictions.iter().map(|p| p.score).collect();
    Ok((labels, scores))
}

/// 0-based rank of each ground-truth pair's true db among its query's predictions
///
/// The rank counts every prediction scoring at least as high as the true
/// match, minus one, so exact ties inflate it. Missing queries and missing
/// true matches get [`RANK_NOT_FOUND`], as does a true match whose score is NaN.
pub fn find_tp_ranks(
    ground_truth: &[GroundTruthMatch],
    predictions: &[PredictedMatch],
) -> Vec<u64> {
    let mut by_query: HashMap<&str, Vec<&PredictedMatch>> = HashMap::new();
    for p in predictions {
        by_query.entry(p.query.as_str()).or_default().push(p);
    }

    ground_truth
        .iter()
        .map(|gt| {
            let Some(results) = by_query.get(gt.query.as_str()) else {
                return RANK_NOT_FOUND;
            };
            match results.iter().find(|p| p.db == gt.db) {
                Some(hit) if !hit.score.is_nan() => {
                    let at_least = results.iter().filter(|p| p.score >= hit.score).count();
                    (at_least - 1) as u64
                }
                Some(_) => RANK_NOT_FOUND,
                None => RANK_NOT_FOUND,
            }
        })
        .collect()
}

/// Evaluate predictions against ground truth
pub fn evaluate(
    ground_truth: &[GroundTruthMatch],
    predictions: &[PredictedMatch],
) -> Result<Metrics> {
    let (labels, scores) = to_arrays(ground_truth, predictions)?;
    let pr = precision_recall(&labels, &scores, ground_truth.len())?;
    let ap = average_precision(&pr.recalls, &pr.precisions)?;
    let p90 = find_operating_point(
        &pr.precisions,
        &pr.recalls,
        &pr.thresholds,
        REQUIRED_PRECISION,
    )?;

    let ranks = find_tp_ranks(ground_truth, predictions);
    let total = ranks.len() as f64;
    let recall_at_rank1 = ranks.iter().filter(|&&r| r == 0).count() as f64 / total;
    let recall_at_rank10 = ranks.iter().filter(|&&r| r < 10).count() as f64 / total;

    Ok(Metrics {
        average_precision: ap,
        precisions: pr.precisions,
        recalls: pr.recalls,
        thresholds: pr.thresholds,
        recall_at_p90: p90.y,
        threshold_at_p90: p90.z,
        recall_at_rank1,
        recall_at_rank10,
    })
}
