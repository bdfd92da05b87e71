//! Evaluation pipelines
//!
//! Glue between files, the metric core and the [`Reporter`]:
//!
//! - `run_pair_matching`: match configured dataset pairs concurrently, report
//!   accuracy and GAP per pair, write a JSON results file
//! - `run_class_ranked`: class-balanced recall@k and mAP@k for labelled features
//! - `run_pca_training`: fit, save and optionally validate a PCA projector
//! - `run_evaluation`: AP / recall@P90 / recall@rank for prediction CSVs

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::benchmark::{
    calculate_distance, calculate_gap, check_duplicates, confusion_matrix, evaluate,
    global_average_precision, infer_num_classes, paired_distance_summary, ranked_mean_precision,
    ranked_recall, top_k_hits, ConfusionMatrix, DistanceSamples, DistanceSummary, DualGap,
    IndexPair, Metrics, ThresholdMode, TopKHits,
};
use crate::config::{ClassRankedConfig, DatasetConfig, EvalConfig, PairConfig, PcaConfig};
use crate::features::{FeatureSet, Features};
use crate::io::{read_ground_truth, read_pairs, read_predictions, write_predictions_from_arrays};
use crate::matching::{knn_search, MatchMethod, Matcher};
use crate::pca::PcaMatrix;
use crate::report::Reporter;

// =============================================================================
// PAIR MATCHING
// =============================================================================

/// Result for one probe/reference pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairReport {
    pub name: String,
    pub accuracy: f64,
    pub gap: f64,
    pub probe_count: usize,
    pub reference_count: usize,
    pub ground_truth_count: usize,
    /// Euclidean and cosine GAP (vector features only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dual_gap: Option<DualGap>,
    /// Hit@1/5 counts (vector features only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hits: Option<TopKHits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confusion_euclidean: Option<ConfusionMatrix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confusion_cosine: Option<ConfusionMatrix>,
    /// k-NN predictions CSV written for this pair
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions_file: Option<PathBuf>,
}

impl PairReport {
    /// Format a summary line for display
    pub fn format_summary(&self) -> String {
        format!(
            "{}: accuracy {:.4} | GAP {:.4} | {} probes, {} references, {} pairs",
            self.name,
            self.accuracy,
            self.gap,
            self.probe_count,
            self.reference_count,
            self.ground_truth_count
        )
    }
}

/// Per-pair extras that only apply to vector features
#[derive(Debug, Clone, Default)]
pub struct PairOptions {
    pub top_k: usize,
    pub predictions_dir: Option<PathBuf>,
    pub threshold_distance: Option<f32>,
    pub threshold_similarity: Option<f32>,
}

impl PairOptions {
    pub fn from_config(config: &EvalConfig) -> Self {
        Self {
            top_k: config.top_k,
            predictions_dir: config.predictions_dir.clone(),
            threshold_distance: config.threshold_distance,
            threshold_similarity: config.threshold_similarity,
        }
    }
}

/// Match one pair and compute its metrics
pub fn evaluate_pair(
    name: &str,
    matcher: Matcher,
    probe: &FeatureSet,
    reference: &FeatureSet,
    ground_truth: &[IndexPair],
    options: &PairOptions,
) -> Result<PairReport> {
    let outcome = matcher
        .run(probe, reference, ground_truth)
        .with_context(|| format!("Matching failed for pair '{}'", name))?;
    let gap = calculate_gap(&outcome.confidence, &outcome.correct, ground_truth.len())?;

    let mut report = PairReport {
        name: name.to_string(),
        accuracy: outcome.accuracy,
        gap,
        probe_count: probe.len(),
        reference_count: reference.len(),
        ground_truth_count: ground_truth.len(),
        dual_gap: None,
        hits: None,
        confusion_euclidean: None,
        confusion_cosine: None,
        predictions_file: None,
    };

    if let (Features::Vectors(p), Features::Vectors(r)) = (&probe.data, &reference.data) {
        report.dual_gap = Some(global_average_precision(ground_truth, p.view(), r.view())?);
        report.hits = Some(top_k_hits(ground_truth, p.view(), r.view())?);
        if let Some(threshold) = options.threshold_distance {
            report.confusion_euclidean = Some(confusion_matrix(
                ground_truth,
                p.view(),
                r.view(),
                threshold,
                ThresholdMode::Euclidean,
            )?);
        }
        if let Some(threshold) = options.threshold_similarity {
            report.confusion_cosine = Some(confusion_matrix(
                ground_truth,
                p.view(),
                r.view(),
                threshold,
                ThresholdMode::Cosine,
            )?);
        }
        if let (Some(dir), true) = (&options.predictions_dir, options.top_k > 0) {
            let knn = knn_search(p.view(), r.view(), options.top_k)?;
            let path = dir.join(format!("{}.csv", name));
            write_predictions_from_arrays(
                knn.scores.view(),
                knn.indices.view(),
                &reference.names,
                &probe.names,
                &path,
                None,
            )?;
            report.predictions_file = Some(path);
        }
    }

    tracing::debug!("{}", report.format_summary());
    Ok(report)
}

/// JSON results file
#[derive(Debug, Serialize)]
struct MatchResultsOutput<'a> {
    timestamp: String,
    method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sigma: Option<f32>,
    pairs: &'a [PairReport],
}

/// Load every dataset named by a pair, once each
fn load_datasets(config: &EvalConfig, method: MatchMethod) -> Result<HashMap<String, Arc<FeatureSet>>> {
    let mut loaded = HashMap::new();
    for pair in &config.pairs {
        for name in [&pair.probe, &pair.reference] {
            if loaded.contains_key(name) {
                continue;
            }
            let dataset = config
                .dataset(name)
                .with_context(|| format!("Unknown dataset '{}'", name))?;
            let set = load_dataset(dataset)?;
            if set.data.layout() != method.expected_layout() {
                anyhow::bail!(
                    "Dataset '{}' holds {} features but method '{}' needs {} features",
                    name,
                    set.data.layout(),
                    method.name(),
                    method.expected_layout()
                );
            }
            loaded.insert(name.clone(), Arc::new(set));
        }
    }
    Ok(loaded)
}

fn load_dataset(dataset: &DatasetConfig) -> Result<FeatureSet> {
    FeatureSet::load(&dataset.features)
        .with_context(|| format!("Failed to load dataset '{}'", dataset.name))
}

/// Match every configured pair, report and save the results
pub async fn run_pair_matching(config: &EvalConfig, reporter: &Reporter) -> Result<Vec<PairReport>> {
    if config.is_empty() {
        anyhow::bail!("No dataset pairs configured");
    }
    let matcher = Matcher::new(config.method, config.sigma)?;
    reporter.new_exp(&format!(
        "Matching {} pairs with {} ({})",
        config.pair_count(),
        config.method.name(),
        config.method.description()
    ));

    let datasets = load_datasets(config, config.method)?;
    let options = Arc::new(PairOptions::from_config(config));

    let mut tasks = JoinSet::new();
    for (idx, pair) in config.pairs.iter().enumerate() {
        let PairConfig {
            name,
            probe,
            reference,
            ground_truth,
        } = pair.clone();
        let ground_truth = read_pairs(&ground_truth)
            .with_context(|| format!("Failed to load ground truth for pair '{}'", name))?;
        let probe = Arc::clone(&datasets[&probe]);
        let reference = Arc::clone(&datasets[&reference]);
        let options = Arc::clone(&options);

        tasks.spawn_blocking(move || {
            let report = evaluate_pair(&name, matcher, &probe, &reference, &ground_truth, &options)?;
            Ok::<_, anyhow::Error>((idx, report))
        });
    }

    let mut reports = Vec::with_capacity(config.pair_count());
    while let Some(res) = tasks.join_next().await {
        match res.context("A pair matching task panicked")? {
            Ok(indexed) => reports.push(indexed),
            Err(e) => {
                reporter.error(&format!("{:#}", e));
                return Err(e);
            }
        }
    }
    reports.sort_by_key(|(idx, _)| *idx);
    let reports: Vec<PairReport> = reports.into_iter().map(|(_, r)| r).collect();

    reporter.info("Evaluation results:");
    for report in &reports {
        reporter.info(&format!("Accuracy {}: {}", report.name, report.accuracy));
    }
    for report in &reports {
        reporter.info(&format!("GAP {}: {}", report.name, report.gap));
    }
    for report in &reports {
        if let (Some(dual), Some(hits)) = (&report.dual_gap, &report.hits) {
            reporter.info(&format!(
                "{}: GAP euclidean {:.5}, GAP cosine {:.5}, hit@1 {}/{} (cos {}), hit@5 {}/{} (cos {})",
                report.name,
                dual.euclidean,
                dual.cosine,
                hits.hit_at_1_euclidean,
                report.ground_truth_count,
                hits.hit_at_1_cosine,
                hits.hit_at_5_euclidean,
                report.ground_truth_count,
                hits.hit_at_5_cosine
            ));
        }
    }

    let output = MatchResultsOutput {
        timestamp: chrono::Utc::now().to_rfc3339(),
        method: config.method.name(),
        sigma: (config.method == MatchMethod::MatchingBased).then_some(config.sigma),
        pairs: &reports,
    };
    write_json(&config.output, &output)?;
    reporter.info(&format!("Results saved to {:?}", config.output));

    Ok(reports)
}

/// Write pretty JSON, creating parent directories
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

// =============================================================================
// CLASS-RANKED RETRIEVAL
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRankedReport {
    pub num_classes: usize,
    /// `(rank, recall@rank)`
    pub recall: Vec<(usize, f64)>,
    /// `(rank, mAP@rank)`
    pub mean_precision: Vec<(usize, f64)>,
}

/// Class-balanced recall and mAP at the configured ranks
pub fn run_class_ranked(
    features: &FeatureSet,
    labels: &[usize],
    config: &ClassRankedConfig,
    reporter: &Reporter,
) -> Result<ClassRankedReport> {
    let vectors = features.vectors()?;
    let num_classes = config.num_classes.unwrap_or_else(|| infer_num_classes(labels));
    reporter.info(&format!(
        "Class-ranked retrieval over {} items in {} classes",
        labels.len(),
        num_classes
    ));

    let mut recall = Vec::with_capacity(config.recall_ranks.len());
    for &rank in &config.recall_ranks {
        let value = ranked_recall(labels, vectors, rank)?;
        reporter.info(&format!("r[{}]: {}", rank, value));
        recall.push((rank, value));
    }

    let mut mean_precision = Vec::with_capacity(config.map_ranks.len());
    for &rank in &config.map_ranks {
        let value = ranked_mean_precision(labels, vectors, rank, num_classes)?;
        reporter.info(&format!("map[{}]: {}", rank, value));
        mean_precision.push((rank, value));
    }

    Ok(ClassRankedReport {
        num_classes,
        recall,
        mean_precision,
    })
}

// =============================================================================
// PCA TRAINING
// =============================================================================

/// How a freshly trained projector is checked
#[derive(Debug, Clone, Default)]
pub enum PcaValidation {
    #[default]
    None,
    /// Project the datasets and sample distances over the index pairs
    Pairs {
        datasets: Vec<DatasetConfig>,
        pairs: Vec<PairConfig>,
    },
    /// Row-aligned anchor / positive / negative feature files
    Triplets {
        anchor: PathBuf,
        positive: PathBuf,
        negative: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaReport {
    pub d_in: usize,
    pub d_out: usize,
    pub train_rows: usize,
    pub output: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<DistanceSummary>,
}

/// Train a projector on the stacked training sets, save it and validate it
pub fn run_pca_training(
    train_paths: &[PathBuf],
    config: &PcaConfig,
    validation: &PcaValidation,
    reporter: &Reporter,
) -> Result<PcaReport> {
    if train_paths.is_empty() {
        anyhow::bail!("No training feature files given");
    }
    let train_sets = train_paths
        .iter()
        .map(|p| FeatureSet::load(p))
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&FeatureSet> = train_sets.iter().collect();
    let train = FeatureSet::concat(&refs).context("Failed to stack training features")?;
    let vectors = train.vectors()?;

    reporter.info(&format!("Train PCA {} -> {}", vectors.ncols(), config.dim));
    let pca = PcaMatrix::train(vectors, config.dim, config.eigen_power)?;
    reporter.info(&format!("Storing PCA to {}", config.output.display()));
    pca.save(&config.output)?;

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let summary = match validation {
        PcaValidation::None => None,
        PcaValidation::Pairs { datasets, pairs } => {
            let mut projected = HashMap::new();
            for dataset in datasets {
                let set = load_dataset(dataset)?;
                projected.insert(dataset.name.clone(), project(&pca, &set)?);
            }
            let mut samples = DistanceSamples::default();
            for pair in pairs {
                let ground_truth = read_pairs(&pair.ground_truth)?;
                let (probe, reference) = match (projected.get(&pair.probe), projected.get(&pair.reference)) {
                    (Some(p), Some(r)) => (p, r),
                    _ => anyhow::bail!("Pair '{}' refers to an unknown dataset", pair.name),
                };
                samples.extend(calculate_distance(
                    &ground_truth,
                    probe.vectors()?,
                    reference.vectors()?,
                    &mut rng,
                )?);
            }
            Some(DistanceSummary::from_samples(&samples))
        }
        PcaValidation::Triplets {
            anchor,
            positive,
            negative,
        } => {
            let load = |path: &PathBuf| -> Result<FeatureSet> { project(&pca, &FeatureSet::load(path)?) };
            let (a, p, n) = (load(anchor)?, load(positive)?, load(negative)?);
            Some(paired_distance_summary(a.vectors()?, p.vectors()?, n.vectors()?)?)
        }
    };

    if let Some(summary) = &summary {
        for line in summary.format_summary().lines() {
            reporter.info(line);
        }
    }

    Ok(PcaReport {
        d_in: pca.d_in(),
        d_out: pca.d_out(),
        train_rows: train.len(),
        output: config.output.clone(),
        validation: summary,
    })
}

fn project(pca: &PcaMatrix, set: &FeatureSet) -> Result<FeatureSet> {
    let projected = pca.apply(set.vectors()?)?;
    Ok(FeatureSet::from_vectors(set.names.clone(), projected)?)
}

// =============================================================================
// PREDICTION FILES
// =============================================================================

/// Evaluate a predictions CSV against a ground-truth CSV
pub fn run_evaluation(gt_path: &Path, predictions_path: &Path, reporter: &Reporter) -> Result<Metrics> {
    let ground_truth = read_ground_truth(gt_path)?;
    let predictions = read_predictions(predictions_path)?;
    reporter.info(&format!(
        "Evaluating {} predictions against {} ground-truth matches",
        predictions.len(),
        ground_truth.len()
    ));

    let metrics = evaluate(&ground_truth, &predictions)?;
    for line in metrics.format_summary().lines() {
        reporter.info(line);
    }
    if metrics.recall_at_p90.is_none() {
        reporter.warning("No threshold reaches 90% precision");
    }
    Ok(metrics)
}

/// Check a predictions CSV for duplicate pairs; returns the prediction count
pub fn validate_predictions(path: &Path, reporter: &Reporter) -> Result<usize> {
    let predictions = read_predictions(path)?;
    if let Err(e) = check_duplicates(&predictions) {
        reporter.error(&format!("{}: {}", path.display(), e));
        return Err(e).with_context(|| format!("Invalid predictions file: {}", path.display()));
    }
    reporter.info(&format!("✓ {} predictions, no duplicate pairs", predictions.len()));
    Ok(predictions.len())
}
