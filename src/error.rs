//! Error types for the evaluation core.
//!
//! Metric, matching and projection code returns [`EvalError`]. File handling
//! and the CLI wrap these in `anyhow` with context about the file involved.

use thiserror::Error;

/// Errors raised by the pure evaluation routines.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// Several predictions share the same (query, db) pair
    #[error("Predictions contain {count} duplicate (query, db) pairs")]
    DuplicatePredictions { count: usize },

    /// A prediction score is NaN or infinite
    #[error("Prediction ({query}, {db}) has a non-finite score")]
    NonFiniteScore { query: String, db: String },

    /// Recalls must be non-decreasing for average precision
    #[error("Recalls must be sorted in increasing order (violated at index {index})")]
    UnsortedRecalls { index: usize },

    /// Recall is undefined without positives
    #[error("Number of positives is zero, recall is undefined")]
    NoPositives,

    /// A metric normalised by the ground-truth size got an empty list
    #[error("Ground truth is empty")]
    EmptyGroundTruth,

    /// Two parallel arrays disagree in length
    #[error("Length mismatch for {what}: {left} vs {right}")]
    LengthMismatch {
        what: &'static str,
        left: usize,
        right: usize,
    },

    /// An index points past the end of the collection it refers to
    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    /// Probe and reference features have different dimensionality
    #[error("Feature dimension mismatch: {left:?} vs {right:?}")]
    DimensionMismatch { left: Vec<usize>, right: Vec<usize> },

    /// A matcher received features of the wrong layout
    #[error("Method '{method}' expects {expected} features, got {actual}")]
    UnsupportedShape {
        method: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    /// Caller supplied an unusable parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Linear algebra backend failure
    #[error("Linear algebra failure: {0}")]
    Linalg(String),
}

/// Result alias for the evaluation core.
pub type Result<T> = std::result::Result<T, EvalError>;
