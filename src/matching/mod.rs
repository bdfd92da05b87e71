//! Probe/reference matching strategies
//!
//! Every strategy turns a probe set and a reference set into a
//! `probe × reference` similarity matrix. The top-1 reference per probe
//! (first index on ties) is the prediction and its similarity the
//! confidence; accuracy is the share of ground-truth pairs whose probe was
//! matched to its reference.
//!
//! - `vector`: whole-embedding cosine similarity
//! - `feature_map`: per-position cosine similarity averaged over the map
//! - `location`: bidirectional position matching weighted by spatial offset

pub mod feature_map;
pub mod location;
pub mod vector;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::benchmark::distance::{argmax_first, check_pairs};
use crate::benchmark::IndexPair;
use crate::error::{EvalError, Result};
use crate::features::FeatureSet;

pub use vector::{knn_search, KnnResult};

/// Default Gaussian bandwidth for location-weighted matching
pub const DEFAULT_SIGMA: f32 = 2.0;

/// Matching method tag as it appears in configs and on the command line
///
/// - `Vector`: one embedding per image
/// - `RowFeature`: spatial feature maps compared position by position
/// - `MatchingBased`: spatial feature maps compared with location weighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    #[default]
    Vector,
    RowFeature,
    MatchingBased,
}

impl MatchMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::RowFeature => "row_feature",
            Self::MatchingBased => "matching_based",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "vector" | "vectors" | "embedding" => Some(Self::Vector),
            "row_feature" | "row" | "feature_map" | "map" => Some(Self::RowFeature),
            "matching_based" | "location" | "matching" => Some(Self::MatchingBased),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Vector => "Cosine similarity between whole embeddings",
            Self::RowFeature => "Per-position cosine similarity averaged over feature maps",
            Self::MatchingBased => "Location-weighted bidirectional feature map matching",
        }
    }

    /// Feature layout this method consumes
    pub fn expected_layout(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::RowFeature | Self::MatchingBased => "feature-map",
        }
    }
}

/// A matching strategy resolved with its parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Matcher {
    Vector,
    FeatureMap,
    Location { sigma: f32 },
}

impl Matcher {
    /// Resolve a method tag; `sigma` only applies to location matching
    pub fn new(method: MatchMethod, sigma: f32) -> Result<Self> {
        match method {
            MatchMethod::Vector => Ok(Self::Vector),
            MatchMethod::RowFeature => Ok(Self::FeatureMap),
            MatchMethod::MatchingBased => {
                if !(sigma.is_finite() && sigma > 0.0) {
                    return Err(EvalError::InvalidParameter(format!(
                        "sigma must be a positive number, got {}",
                        sigma
                    )));
                }
                Ok(Self::Location { sigma })
            }
        }
    }

    pub fn method(&self) -> MatchMethod {
        match self {
            Self::Vector => MatchMethod::Vector,
            Self::FeatureMap => MatchMethod::RowFeature,
            Self::Location { .. } => MatchMethod::MatchingBased,
        }
    }

    /// Probe × reference similarity matrix
    pub fn similarities(&self, probe: &FeatureSet, reference: &FeatureSet) -> Result<Array2<f32>> {
        let method = self.method();
        match *self {
            Self::Vector => vector::similarity_matrix(
                layout(probe.vectors(), method)?,
                layout(reference.vectors(), method)?,
            ),
            Self::FeatureMap => feature_map::similarity_matrix(
                layout(probe.maps(), method)?,
                layout(reference.maps(), method)?,
            ),
            Self::Location { sigma } => location::similarity_matrix(
                layout(probe.maps(), method)?,
                layout(reference.maps(), method)?,
                sigma,
            ),
        }
    }

    /// Match every probe and score the top-1 predictions against the ground truth
    pub fn run(
        &self,
        probe: &FeatureSet,
        reference: &FeatureSet,
        ground_truth: &[IndexPair],
    ) -> Result<MatchOutcome> {
        if ground_truth.is_empty() {
            return Err(EvalError::EmptyGroundTruth);
        }
        check_pairs(ground_truth, probe.len(), reference.len())?;
        let similarities = self.similarities(probe, reference)?;
        MatchOutcome::from_similarities(&similarities, ground_truth)
    }
}

/// Relabel a layout error with the method that needed the layout
fn layout<T>(view: Result<T>, method: MatchMethod) -> Result<T> {
    view.map_err(|e| match e {
        EvalError::UnsupportedShape { actual, .. } => EvalError::UnsupportedShape {
            method: method.name(),
            expected: method.expected_layout(),
            actual,
        },
        other => other,
    })
}

/// Top-1 matching result, index-aligned to the probe set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Similarity of each probe's top-1 reference
    pub confidence: Vec<f64>,
    /// Whether the top-1 reference is the ground-truth one
    pub correct: Vec<bool>,
    /// Hits over the whole ground truth divided by its length
    pub accuracy: f64,
    /// Top-1 reference index per probe
    pub predictions: Vec<usize>,
}

impl MatchOutcome {
    /// Derive predictions, confidences and accuracy from a similarity matrix
    pub fn from_similarities(similarities: &Array2<f32>, ground_truth: &[IndexPair]) -> Result<Self> {
        if ground_truth.is_empty() {
            return Err(EvalError::EmptyGroundTruth);
        }
        check_pairs(ground_truth, similarities.nrows(), similarities.ncols())?;
        if similarities.ncols() == 0 {
            return Err(EvalError::InvalidParameter("reference set is empty".to_string()));
        }

        let mut predictions = Vec::with_capacity(similarities.nrows());
        let mut confidence = Vec::with_capacity(similarities.nrows());
        for row in similarities.axis_iter(Axis(0)) {
            match argmax_first(row) {
                Some((index, value)) => {
                    predictions.push(index);
                    confidence.push(value as f64);
                }
                // all-NaN row: no usable prediction
                None => {
                    predictions.push(usize::MAX);
                    confidence.push(f64::NAN);
                }
            }
        }

        let mut correct = vec![false; predictions.len()];
        let mut hits = 0usize;
        for pair in ground_truth {
            if predictions[pair.probe] == pair.reference {
                hits += 1;
                correct[pair.probe] = true;
            }
        }

        Ok(Self {
            confidence,
            correct,
            accuracy: hits as f64 / ground_truth.len() as f64,
            predictions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn gt(pairs: &[(usize, usize)]) -> Vec<IndexPair> {
        pairs.iter().map(|&p| p.into()).collect()
    }

    #[test]
    fn test_method_names_roundtrip() {
        for method in [MatchMethod::Vector, MatchMethod::RowFeature, MatchMethod::MatchingBased] {
            assert_eq!(MatchMethod::from_str(method.name()), Some(method));
        }
        assert_eq!(MatchMethod::from_str("Location"), Some(MatchMethod::MatchingBased));
        assert_eq!(MatchMethod::from_str("bogus"), None);
    }

    #[test]
    fn test_matcher_rejects_bad_sigma() {
        assert!(Matcher::new(MatchMethod::MatchingBased, 0.0).is_err());
        assert!(Matcher::new(MatchMethod::MatchingBased, f32::NAN).is_err());
        assert_eq!(
            Matcher::new(MatchMethod::Vector, 0.0).unwrap(),
            Matcher::Vector
        );
    }

    #[test]
    fn test_outcome_first_index_wins_ties() {
        let sims = array![[0.5f32, 0.5], [0.1, 0.9]];
        let outcome = MatchOutcome::from_similarities(&sims, &gt(&[(0, 1), (1, 1)])).unwrap();
        assert_eq!(outcome.predictions, vec![0, 1]);
        assert_eq!(outcome.correct, vec![false, true]);
        assert!((outcome.accuracy - 0.5).abs() < 1e-12);
        assert!((outcome.confidence[1] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_outcome_accuracy_counts_all_ground_truth() {
        // Probe 2 is not in the ground truth; its prediction is ignored
        let sims = array![[0.9f32, 0.1], [0.2, 0.8], [0.7, 0.3]];
        let outcome = MatchOutcome::from_similarities(&sims, &gt(&[(0, 0), (1, 1)])).unwrap();
        assert!((outcome.accuracy - 1.0).abs() < 1e-12);
        assert_eq!(outcome.correct, vec![true, true, false]);
    }

    #[test]
    fn test_outcome_errors() {
        let sims = array![[0.9f32, 0.1]];
        assert_eq!(
            MatchOutcome::from_similarities(&sims, &[]).unwrap_err(),
            EvalError::EmptyGroundTruth
        );
        assert!(matches!(
            MatchOutcome::from_similarities(&sims, &gt(&[(0, 2)])),
            Err(EvalError::IndexOutOfRange { what: "reference", .. })
        ));
    }

    #[test]
    fn test_run_rejects_wrong_layout() {
        let names = vec!["a".to_string()];
        let vectors = FeatureSet::from_raw(names.clone(), &[1, 2], vec![1.0, 0.0]).unwrap();
        let err = Matcher::FeatureMap
            .run(&vectors, &vectors, &gt(&[(0, 0)]))
            .unwrap_err();
        assert_eq!(
            err,
            EvalError::UnsupportedShape {
                method: "row_feature",
                expected: "feature-map",
                actual: "vector",
            }
        );
    }
}
