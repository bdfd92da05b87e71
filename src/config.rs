//! Configuration for evaluation runs
//!
//! Defines the `eval.toml` schema: feature datasets, the probe/reference
//! pairs to match, and the class-ranked and PCA settings.
//!
//! ```toml
//! method = "vector"
//! output = "results/match_results.json"
//!
//! [[datasets]]
//! name = "d1"
//! features = "features/d1.json"
//!
//! [[datasets]]
//! name = "d2"
//! features = "features/d2.json"
//!
//! [[pairs]]
//! name = "d1-d2"
//! probe = "d1"
//! reference = "d2"
//! ground_truth = "gt/D1-D2.json"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::matching::{MatchMethod, DEFAULT_SIGMA};

/// Evaluation configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Matching method applied to every pair
    #[serde(default, deserialize_with = "deserialize_method")]
    pub method: MatchMethod,

    /// Gaussian bandwidth for `matching_based`
    #[serde(default = "default_sigma")]
    pub sigma: f32,

    /// Output file for results (JSON)
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Directory for the run log (`logs.txt`); stdout only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Neighbours per probe in written k-NN predictions (0 = off)
    #[serde(default)]
    pub top_k: usize,

    /// Directory for per-pair k-NN prediction CSVs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predictions_dir: Option<PathBuf>,

    /// Euclidean threshold for confusion-matrix diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_distance: Option<f32>,

    /// Cosine threshold for confusion-matrix diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_similarity: Option<f32>,

    /// Feature files, each loaded once
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,

    /// Probe/reference pairs to evaluate
    #[serde(default)]
    pub pairs: Vec<PairConfig>,

    #[serde(default)]
    pub class_ranked: ClassRankedConfig,

    #[serde(default)]
    pub pca: PcaConfig,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            method: MatchMethod::default(),
            sigma: default_sigma(),
            output: default_output(),
            log_dir: None,
            top_k: 0,
            predictions_dir: None,
            threshold_distance: None,
            threshold_similarity: None,
            datasets: vec![],
            pairs: vec![],
            class_ranked: ClassRankedConfig::default(),
            pca: PcaConfig::default(),
        }
    }
}

impl EvalConfig {
    /// Load config from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read eval config: {:?}", path))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse eval config: {:?}", path))?;
        config
            .validate()
            .with_context(|| format!("Invalid eval config: {:?}", path))?;
        Ok(config)
    }

    /// Load from default location (./eval.toml) or return defaults
    pub fn load_default() -> Result<Self> {
        let local_path = Path::new("eval.toml");
        if local_path.exists() {
            return Self::load(local_path);
        }
        Ok(Self::default())
    }

    /// Save config to TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check names, cross references and numeric ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            anyhow::bail!("sigma must be positive, got {}", self.sigma);
        }

        let mut names = HashSet::new();
        for dataset in &self.datasets {
            if dataset.name.is_empty() {
                anyhow::bail!("Dataset with features {:?} has an empty name", dataset.features);
            }
            if !names.insert(dataset.name.as_str()) {
                anyhow::bail!("Dataset '{}' is defined twice", dataset.name);
            }
        }

        for pair in &self.pairs {
            for side in [&pair.probe, &pair.reference] {
                if !names.contains(side.as_str()) {
                    anyhow::bail!("Pair '{}' refers to unknown dataset '{}'", pair.name, side);
                }
            }
        }

        self.class_ranked.validate()?;
        self.pca.validate()?;
        Ok(())
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.name == name)
    }

    /// Number of pairs configured
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Check if any pairs are configured
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// A named feature file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    /// Path to the feature JSON file
    pub features: PathBuf,
}

/// A probe/reference pair with its index ground truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairConfig {
    /// Name used in reports (e.g., "d1-d2")
    pub name: String,
    /// Probe dataset name
    pub probe: String,
    /// Reference dataset name
    pub reference: String,
    /// JSON list of `[probe_index, reference_index]`
    pub ground_truth: PathBuf,
}

/// Class-ranked retrieval settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRankedConfig {
    /// Ranks for recall@k
    #[serde(default = "default_recall_ranks")]
    pub recall_ranks: Vec<usize>,

    /// Ranks for mAP@k
    #[serde(default = "default_map_ranks")]
    pub map_ranks: Vec<usize>,

    /// Number of classes (defaults to max label + 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<usize>,
}

impl Default for ClassRankedConfig {
    fn default() -> Self {
        Self {
            recall_ranks: default_recall_ranks(),
            map_ranks: default_map_ranks(),
            num_classes: None,
        }
    }
}

impl ClassRankedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.recall_ranks.iter().chain(&self.map_ranks).any(|&r| r == 0) {
            anyhow::bail!("class-ranked ranks must be at least 1");
        }
        if self.num_classes == Some(0) {
            anyhow::bail!("num_classes must be at least 1");
        }
        Ok(())
    }
}

/// PCA training settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaConfig {
    /// Output dimension
    #[serde(default = "default_pca_dim")]
    pub dim: usize,

    /// Component scaling exponent (-0.5 whitens, 0 keeps raw projections)
    #[serde(default = "default_eigen_power")]
    pub eigen_power: f32,

    /// Where the trained projector is written (JSON)
    #[serde(default = "default_pca_output")]
    pub output: PathBuf,

    /// Seed for negative sampling during validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            dim: default_pca_dim(),
            eigen_power: default_eigen_power(),
            output: default_pca_output(),
            seed: None,
        }
    }
}

impl PcaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            anyhow::bail!("PCA dim must be at least 1");
        }
        if !self.eigen_power.is_finite() {
            anyhow::bail!("PCA eigen_power must be finite");
        }
        Ok(())
    }
}

/// Accept aliases such as "location" or "row-feature" for the method tag
fn deserialize_method<'de, D: Deserializer<'de>>(deserializer: D) -> Result<MatchMethod, D::Error> {
    let raw = String::deserialize(deserializer)?;
    MatchMethod::from_str(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unknown matching method '{}'", raw)))
}

fn default_sigma() -> f32 { DEFAULT_SIGMA }
fn default_output() -> PathBuf { PathBuf::from("results/match_results.json") }
fn default_recall_ranks() -> Vec<usize> { vec![5, 20, 50] }
fn default_map_ranks() -> Vec<usize> { vec![10, 20, 50] }
fn default_pca_dim() -> usize { 256 }
fn default_eigen_power() -> f32 { -0.5 }
fn default_pca_output() -> PathBuf { PathBuf::from("results/pca.json") }
