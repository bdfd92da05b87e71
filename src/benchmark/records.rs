//! Match records shared by the evaluators
//!
//! Ground truth and predictions are plain values. Equality and hashing on
//! [`GroundTruthMatch`] lets the evaluator test prediction membership with a set.

use serde::{Deserialize, Serialize};

/// One true query/database correspondence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroundTruthMatch {
    pub query: String,
    pub db: String,
}

impl GroundTruthMatch {
    pub fn new(query: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            db: db.into(),
        }
    }
}

/// One scored candidate correspondence (higher score = more similar)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedMatch {
    pub query: String,
    pub db: String,
    pub score: f64,
}

impl PredictedMatch {
    pub fn new(query: impl Into<String>, db: impl Into<String>, score: f64) -> Self {
        Self {
            query: query.into(),
            db: db.into(),
            score,
        }
    }
}

/// Index-based ground-truth pair between a probe set and a reference set
///
/// Stored on disk as a two-element JSON array `[probe, reference]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(usize, usize)", into = "(usize, usize)")]
pub struct IndexPair {
    pub probe: usize,
    pub reference: usize,
}

impl IndexPair {
    pub fn new(probe: usize, reference: usize) -> Self {
        Self { probe, reference }
    }
}

impl From<(usize, usize)> for IndexPair {
    fn from((probe, reference): (usize, usize)) -> Self {
        Self { probe, reference }
    }
}

impl From<IndexPair> for (usize, usize) {
    fn from(pair: IndexPair) -> Self {
        (pair.probe, pair.reference)
    }
}
