use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use gcforest_core::{DataStyle, GcForestConfig, GcForestModel, GrowthOutcome, MaxFeatures, WindowConfig};
use gcforest_io::{ExperimentName, LabeledCsvReader, ResultWriter};

#[derive(Parser)]
#[command(name = "gcforest")]
#[command(about = "Deep forest classification with multi-grained scanning and cascade forests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// RNG seed for reproducibility
    #[arg(long, default_value_t = 42, global = true)]
    seed: u64,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of threads for parallel computation (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,
}

/// Deep forest hyperparameters.
#[derive(Args, Debug, Clone)]
struct ForestArgs {
    /// Multi-grained scanning window size; repeat for several windows (none = no scanning)
    #[arg(long = "scan-window")]
    scan_windows: Vec<usize>,

    /// Stride shared by every scanning window
    #[arg(long, default_value_t = 1)]
    scan_stride: usize,

    /// Treat each row as a ROWSxCOLS image when scanning, e.g. "28x28"
    #[arg(long)]
    image_shape: Option<String>,

    /// Random-forest units per cascade layer
    #[arg(long, default_value_t = 2)]
    rf_num: usize,

    /// Completely-random-forest units per cascade layer
    #[arg(long, default_value_t = 2)]
    crf_num: usize,

    /// Trees per scanning forest
    #[arg(long, default_value_t = 30)]
    scan_forest_tree_num: usize,

    /// Trees per cascade forest
    #[arg(long, default_value_t = 100)]
    cascade_forest_tree_num: usize,

    /// Maximum number of cascade layers
    #[arg(long, default_value_t = 10)]
    max_iteration: usize,

    /// Layers allowed after the best one before growth stops
    #[arg(long, default_value_t = 2)]
    early_stopping_rounds: usize,

    /// Maximum tree depth (unlimited if not set)
    #[arg(long)]
    max_depth: Option<usize>,

    /// Histogram bins for random-forest split search
    #[arg(long, default_value_t = 32)]
    max_bins: usize,

    /// Minimum impurity decrease per row for a split
    #[arg(long, default_value_t = 0.0)]
    min_info_gain: f64,

    /// Minimum rows per leaf in scanning forests
    #[arg(long, default_value_t = 1)]
    scan_min_instances_per_node: usize,

    /// Minimum rows per leaf in cascade forests
    #[arg(long, default_value_t = 1)]
    cascade_min_instances_per_node: usize,

    /// Random-forest feature subset: auto, sqrt, log2, onethird, all, a fraction, or a count
    #[arg(long, default_value = "sqrt")]
    feature_subset_strategy: String,

    /// Completely-random-forest feature subset, same syntax
    #[arg(long, default_value = "all")]
    crf_feature_subset_strategy: String,

    /// Cross-validation folds per layer
    #[arg(long, default_value_t = 3)]
    n_folds: usize,

    /// Hold out this fraction of the training rows to score layers
    #[arg(long)]
    validation_fraction: Option<f64>,

    /// Number of classes (defaults to the largest label + 1)
    #[arg(long)]
    n_classes: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Train a deep forest on a labeled CSV file
    Train {
        /// Path to the labeled training CSV (first column `label`)
        #[arg(long)]
        data: PathBuf,

        /// Path to a labeled validation CSV used to score layers
        #[arg(long)]
        validation: Option<PathBuf>,

        /// Experiment name for output files (must match [a-zA-Z0-9_-]+)
        #[arg(long)]
        experiment: String,

        /// Output directory for result files
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        #[command(flatten)]
        forest: ForestArgs,
    },

    /// Predict classes for a CSV file with a trained model
    Predict {
        /// Path to the trained model binary
        #[arg(long)]
        model: PathBuf,

        /// Path to the CSV file to classify
        #[arg(long)]
        data: PathBuf,

        /// The CSV has a leading `label` column; report accuracy against it
        #[arg(long, default_value_t = false)]
        labeled: bool,

        /// Number of top-k classes to output per row
        #[arg(long, default_value_t = 3)]
        top_k: usize,

        /// Experiment name for output files
        #[arg(long)]
        experiment: String,

        /// Output directory for result files
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
}

// --- JSON stdout output structs ---

#[derive(Serialize)]
struct TrainOutput {
    experiment: String,
    n_samples: usize,
    n_features: usize,
    n_classes: usize,
    uses_scanning: bool,
    outcome: GrowthOutcome,
    fitted_layers: usize,
    retained_layers: usize,
    best_score: f64,
    model_path: PathBuf,
    report_path: PathBuf,
}

#[derive(Serialize)]
struct PredictOutput {
    experiment: String,
    n_rows: usize,
    model_n_layers: usize,
    model_n_classes: usize,
    accuracy: Option<f64>,
    predictions_path: PathBuf,
}

fn parse_image_shape(s: &str) -> Result<DataStyle> {
    let (rows, cols) = s
        .split_once(['x', 'X'])
        .with_context(|| format!("image shape \"{s}\" must look like ROWSxCOLS"))?;
    Ok(DataStyle::Image {
        rows: rows.trim().parse().with_context(|| format!("bad image rows in \"{s}\""))?,
        cols: cols.trim().parse().with_context(|| format!("bad image cols in \"{s}\""))?,
    })
}

fn parse_subset(s: &str) -> Result<MaxFeatures> {
    s.parse()
        .with_context(|| format!("unknown feature subset strategy: {s}"))
}

fn build_config(args: &ForestArgs, seed: u64) -> Result<GcForestConfig> {
    let data_style = match &args.image_shape {
        Some(shape) => parse_image_shape(shape)?,
        None => DataStyle::Sequence,
    };
    let windows = args
        .scan_windows
        .iter()
        .map(|&size| WindowConfig::new(size).with_stride(args.scan_stride))
        .collect();

    GcForestConfig::builder()
        .with_scan_windows(windows)
        .with_data_style(data_style)
        .with_rf_num(args.rf_num)
        .with_crf_num(args.crf_num)
        .with_scan_forest_tree_num(args.scan_forest_tree_num)
        .with_cascade_forest_tree_num(args.cascade_forest_tree_num)
        .with_max_iteration(args.max_iteration)
        .with_early_stopping_rounds(args.early_stopping_rounds)
        .with_max_depth(args.max_depth)
        .with_max_bins(args.max_bins)
        .with_min_info_gain(args.min_info_gain)
        .with_scan_min_instances_per_node(args.scan_min_instances_per_node)
        .with_cascade_min_instances_per_node(args.cascade_min_instances_per_node)
        .with_feature_subset_strategy(parse_subset(&args.feature_subset_strategy)?)
        .with_crf_feature_subset_strategy(parse_subset(&args.crf_feature_subset_strategy)?)
        .with_n_folds(args.n_folds)
        .with_validation_fraction(args.validation_fraction)
        .with_n_classes(args.n_classes)
        .with_seed(seed)
        .build()
        .context("invalid deep forest configuration")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure thread pool")?;
        info!(threads, "thread pool configured");
    }

    match cli.command {
        Command::Train {
            data,
            validation,
            experiment,
            output_dir,
            forest,
        } => {
            let experiment_name = ExperimentName::new(experiment.clone())?;
            let config = build_config(&forest, cli.seed)?;

            // 1. Read training (and validation) data
            let dataset = LabeledCsvReader::new(&data)
                .read()
                .context("failed to read training CSV")?;
            let labels = dataset.labels().context("training CSV has no labels")?;
            let validation_set = validation
                .as_deref()
                .map(|path| LabeledCsvReader::new(path).read())
                .transpose()
                .context("failed to read validation CSV")?;

            // 2. Fit
            let mut trainer = config.trainer();
            if let Some(val) = &validation_set {
                let val_labels = val.labels().context("validation CSV has no labels")?;
                trainer = trainer.with_validation(val.features(), val_labels);
            }
            let writer = ResultWriter::new(&output_dir, experiment_name)?;
            let fit = match trainer.fit(dataset.features(), labels) {
                Ok(fit) => fit,
                Err(err) => {
                    let message = err.to_string();
                    if let Some(partial) = err.into_partial() {
                        let path = writer.model_path();
                        partial.save(&path).context("failed to save partial model")?;
                        warn!(
                            n_layers = partial.n_layers(),
                            path = %path.display(),
                            "saved the layers completed before the failure"
                        );
                    }
                    anyhow::bail!("training failed: {message}");
                }
            };

            // 3. Save model and report
            let model_path = writer.model_path();
            fit.model.save(&model_path).context("failed to save model")?;
            let report_path = writer.write_report(
                &config,
                &fit.report,
                dataset.n_samples(),
                dataset.n_features(),
            )?;

            // 4. Print summary
            let best_score = fit.report.layers[fit.report.best_layer - 1].score;
            let output = TrainOutput {
                experiment,
                n_samples: dataset.n_samples(),
                n_features: dataset.n_features(),
                n_classes: fit.model.n_classes(),
                uses_scanning: fit.model.uses_scanning(),
                outcome: fit.report.outcome,
                fitted_layers: fit.report.layers.len(),
                retained_layers: fit.report.retained_layers,
                best_score,
                model_path,
                report_path,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Predict {
            model,
            data,
            labeled,
            top_k,
            experiment,
            output_dir,
        } => {
            let experiment_name = ExperimentName::new(experiment.clone())?;

            // 1. Load model
            let model = GcForestModel::load(&model).context("failed to load model")?;
            info!(
                n_layers = model.n_layers(),
                n_classes = model.n_classes(),
                uses_scanning = model.uses_scanning(),
                "model loaded"
            );

            // 2. Read data
            let dataset = LabeledCsvReader::new(&data)
                .with_labels(labeled)
                .read()
                .context("failed to read CSV")?;

            // 3. Predict
            let probas = model
                .predict_proba(dataset.features())
                .context("prediction failed")?;
            let accuracy = match dataset.labels() {
                Some(labels) => Some(gcforest_core::accuracy(&probas, labels).context("scoring failed")?),
                None => None,
            };

            // 4. Write predictions JSON
            let writer = ResultWriter::new(&output_dir, experiment_name)?;
            let predictions_path = writer.write_predictions(&probas, top_k, dataset.labels())?;

            // 5. Print summary
            let output = PredictOutput {
                experiment,
                n_rows: dataset.n_samples(),
                model_n_layers: model.n_layers(),
                model_n_classes: model.n_classes(),
                accuracy,
                predictions_path,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
