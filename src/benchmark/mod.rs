//! Retrieval metrics
//!
//! ## Modules
//!
//! - `records` - ground-truth and prediction records
//! - `ranking` - precision/recall curve, average precision, operating points
//! - `quality` - aggregate evaluation (AP, recall@P90, recall@rank 1/10)
//! - `gap` - global average precision over top-1 matches
//! - `class_ranked` - class-balanced recall@k and mean precision@k
//! - `distance` - similarity primitives, hit counts and distance statistics

pub mod class_ranked;
pub mod distance;
pub mod gap;
pub mod quality;
pub mod ranking;
pub mod records;

pub use class_ranked::{infer_num_classes, ranked_mean_precision, ranked_recall};
pub use distance::{
    calculate_distance, confusion_matrix, cosine_similarity, cosine_similarity_matrix,
    euclidean_distance, paired_distance_summary, top_k_hits, ConfusionMatrix, DistanceSamples,
    DistanceSummary, ThresholdMode, TopKHits,
};
pub use gap::{calculate_gap, global_average_precision, DualGap};
pub use quality::{check_duplicates, evaluate, find_tp_ranks, Metrics, RANK_NOT_FOUND};
pub use ranking::{
    average_precision, find_operating_point, precision_recall, OperatingPoint, PrecisionRecall,
};
pub use records::{GroundTruthMatch, IndexPair, PredictedMatch};
