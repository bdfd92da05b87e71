//! Image Similarity Evaluation CLI
//!
//! Evaluates learned image features: prediction files, probe/reference
//! matching, class-ranked retrieval and PCA training.
//!
//! ## Quick Start
//!
//! ```bash
//! # Evaluate a predictions CSV against ground truth
//! ./image-similarity-eval evaluate \
//!     --ground-truth gt.csv \
//!     --predictions predictions.csv
//!
//! # Match every dataset pair in eval.toml
//! ./image-similarity-eval match --config eval.toml --method matching-based --sigma 2
//!
//! # Class-ranked recall / mAP for labelled features
//! ./image-similarity-eval class-ranked --features test.json --labels test.csv
//!
//! # Train a 256-d whitening PCA and validate on the configured pairs
//! ./image-similarity-eval train-pca --train d1.json --train d2.json --validate-pairs
//! ```
//!
//! ## Configuration
//!
//! Datasets, pairs and defaults live in `eval.toml`; command-line flags
//! override the file.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use image_similarity_eval::config::EvalConfig;
use image_similarity_eval::features::FeatureSet;
use image_similarity_eval::io::read_labels;
use image_similarity_eval::matching::MatchMethod;
use image_similarity_eval::pipeline::{
    run_class_ranked, run_evaluation, run_pair_matching, run_pca_training, validate_predictions,
    write_json, PcaValidation,
};
use image_similarity_eval::report::Reporter;

/// Matching method for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum MethodArg {
    /// Cosine similarity between whole embeddings
    Vector,
    /// Per-position cosine similarity over feature maps
    RowFeature,
    /// Location-weighted feature map matching
    MatchingBased,
}

impl From<MethodArg> for MatchMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Vector => MatchMethod::Vector,
            MethodArg::RowFeature => MatchMethod::RowFeature,
            MethodArg::MatchingBased => MatchMethod::MatchingBased,
        }
    }
}

#[derive(Parser)]
#[command(name = "image-similarity-eval")]
#[command(about = "Retrieval-quality evaluation for learned image features")]
#[command(version)]
struct Cli {
    /// Directory for the run log (logs.txt); stdout only when unset
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a predictions CSV against a ground-truth CSV
    ///
    /// Reports average precision, recall at 90% precision and recall at
    /// rank 1 and 10.
    Evaluate {
        /// Ground-truth CSV (query_id,reference_id)
        #[arg(short, long)]
        ground_truth: PathBuf,

        /// Predictions CSV (query_id,reference_id,score)
        #[arg(short, long)]
        predictions: PathBuf,

        /// Also save the metrics as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Match the dataset pairs of a config file and report accuracy and GAP
    Match {
        /// Path to the eval config (TOML)
        #[arg(short, long, default_value = "eval.toml")]
        config: PathBuf,

        /// Matching method (overrides the config)
        #[arg(short, long, value_enum)]
        method: Option<MethodArg>,

        /// Gaussian bandwidth for matching-based
        #[arg(long)]
        sigma: Option<f32>,

        /// Output file for results (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the top K neighbours per probe as prediction CSVs
        #[arg(long)]
        top_k: Option<usize>,

        /// Directory for the prediction CSVs
        #[arg(long)]
        predictions_dir: Option<PathBuf>,
    },

    /// Class-balanced recall@k and mAP@k for labelled features
    ClassRanked {
        /// Feature file (JSON)
        #[arg(short, long)]
        features: PathBuf,

        /// Labels CSV (label_encoded column)
        #[arg(short, long)]
        labels: PathBuf,

        /// Path to the eval config (TOML) for rank defaults
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Ranks for recall (comma-separated)
        #[arg(long, value_delimiter = ',')]
        recall_ranks: Option<Vec<usize>>,

        /// Ranks for mAP (comma-separated)
        #[arg(long, value_delimiter = ',')]
        map_ranks: Option<Vec<usize>>,

        /// Number of classes (default: max label + 1)
        #[arg(long)]
        num_classes: Option<usize>,
    },

    /// Train a PCA projector on feature files
    TrainPca {
        /// Training feature files (repeatable)
        #[arg(short, long, required = true)]
        train: Vec<PathBuf>,

        /// Path to the eval config (TOML) for PCA defaults and validation pairs
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output dimension
        #[arg(long)]
        dim: Option<usize>,

        /// Component scaling exponent
        #[arg(long, allow_hyphen_values = true)]
        eigen_power: Option<f32>,

        /// Where to store the projector (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seed for negative sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Validate on the dataset pairs of the config
        #[arg(long)]
        validate_pairs: bool,

        /// Validation anchors (with --positive and --negative)
        #[arg(long, requires_all = ["positive", "negative"])]
        anchor: Option<PathBuf>,

        #[arg(long, requires = "anchor")]
        positive: Option<PathBuf>,

        #[arg(long, requires = "anchor")]
        negative: Option<PathBuf>,
    },

    /// Check a predictions CSV for duplicate (query, reference) pairs
    ValidatePredictions {
        /// Predictions CSV
        #[arg(short, long)]
        predictions: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Evaluate {
            ground_truth,
            predictions,
            output,
        } => {
            let reporter = make_reporter(cli.log_dir.as_deref())?;
            print_banner("PREDICTION EVALUATION");
            let metrics = run_evaluation(&ground_truth, &predictions, &reporter)?;
            if let Some(output) = output {
                write_json(&output, &metrics)?;
                println!("\nResults saved to {:?}", output);
            }
        }

        Commands::Match {
            config,
            method,
            sigma,
            output,
            top_k,
            predictions_dir,
        } => {
            let mut config = EvalConfig::load(&config)?;
            if let Some(method) = method {
                config.method = method.into();
            }
            if let Some(sigma) = sigma {
                config.sigma = sigma;
            }
            if let Some(output) = output {
                config.output = output;
            }
            if let Some(top_k) = top_k {
                config.top_k = top_k;
            }
            if predictions_dir.is_some() {
                config.predictions_dir = predictions_dir;
            }
            config.validate()?;

            let log_dir = cli.log_dir.or_else(|| config.log_dir.clone());
            let reporter = make_reporter(log_dir.as_deref())?;
            print_banner("PAIR MATCHING");
            eprintln!("  Method: {} - {}", config.method.name(), config.method.description());
            run_pair_matching(&config, &reporter).await?;
        }

        Commands::ClassRanked {
            features,
            labels,
            config,
            recall_ranks,
            map_ranks,
            num_classes,
        } => {
            let mut settings = load_config_or_default(config.as_deref())?.class_ranked;
            if let Some(ranks) = recall_ranks {
                settings.recall_ranks = ranks;
            }
            if let Some(ranks) = map_ranks {
                settings.map_ranks = ranks;
            }
            if num_classes.is_some() {
                settings.num_classes = num_classes;
            }
            settings.validate()?;

            let reporter = make_reporter(cli.log_dir.as_deref())?;
            print_banner("CLASS-RANKED RETRIEVAL");
            let feature_set = FeatureSet::load(&features)?;
            let labels = read_labels(&labels)?;
            run_class_ranked(&feature_set, &labels, &settings, &reporter)?;
        }

        Commands::TrainPca {
            train,
            config,
            dim,
            eigen_power,
            output,
            seed,
            validate_pairs,
            anchor,
            positive,
            negative,
        } => {
            let eval_config = load_config_or_default(config.as_deref())?;
            let mut settings = eval_config.pca.clone();
            if let Some(dim) = dim {
                settings.dim = dim;
            }
            if let Some(power) = eigen_power {
                settings.eigen_power = power;
            }
            if let Some(output) = output {
                settings.output = output;
            }
            if seed.is_some() {
                settings.seed = seed;
            }
            settings.validate()?;

            let validation = match (anchor, positive, negative) {
                (Some(anchor), Some(positive), Some(negative)) => PcaValidation::Triplets {
                    anchor,
                    positive,
                    negative,
                },
                _ if validate_pairs => PcaValidation::Pairs {
                    datasets: eval_config.datasets.clone(),
                    pairs: eval_config.pairs.clone(),
                },
                _ => PcaValidation::None,
            };

            let reporter = make_reporter(cli.log_dir.as_deref())?;
            print_banner("PCA TRAINING");
            run_pca_training(&train, &settings, &validation, &reporter)?;
        }

        Commands::ValidatePredictions { predictions } => {
            let reporter = make_reporter(cli.log_dir.as_deref())?;
            println!("Validating {:?}...", predictions);
            validate_predictions(&predictions, &reporter)?;
        }
    }

    Ok(())
}

fn make_reporter(log_dir: Option<&Path>) -> Result<Reporter> {
    match log_dir {
        Some(dir) => Reporter::with_log_file(dir, "logs.txt"),
        None => Ok(Reporter::new()),
    }
}

fn load_config_or_default(path: Option<&Path>) -> Result<EvalConfig> {
    match path {
        Some(path) => EvalConfig::load(path),
        None => EvalConfig::load_default(),
    }
}

fn print_banner(title: &str) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  {:<60}║", title);
    println!("╚══════════════════════════════════════════════════════════════╝\n");
}
