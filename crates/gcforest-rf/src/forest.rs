//! Random Forest training with parallel tree construction.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{debug, instrument};

use crate::config::{RandomForestConfig, SamplingMode};
use crate::error::RfError;
use crate::tree::{DecisionTree, DecisionTreeConfig, resolve_class_count, validate_training_rows};

/// A fitted Random Forest ensemble.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RandomForest {
    pub(crate) trees: Vec<DecisionTree>,
    pub(crate) n_features: usize,
    pub(crate) n_classes: usize,
}

/// Draw `rows.len()` entries of `rows` with replacement.
fn bootstrap_rows(rows: &[usize], rng: &mut impl Rng) -> Vec<usize> {
    (0..rows.len())
        .map(|_| rows[rng.gen_range(0..rows.len())])
        .collect()
}

/// Train the Random Forest ensemble on the listed rows.
#[instrument(skip_all, fields(n_trees = config.n_trees, n_rows = rows.len()))]
pub(crate) fn train(
    config: &RandomForestConfig,
    features: &[Vec<f64>],
    labels: &[usize],
    rows: &[usize],
) -> Result<RandomForest, RfError> {
    let n_features = validate_training_rows(features, labels, rows)?;
    let n_classes = resolve_class_count(config.n_classes, labels, rows)?;
    let max_features_resolved = config.max_features.resolve(n_features)?;

    let template = DecisionTreeConfig::new()
        .with_criterion(config.criterion)
        .with_split_method(config.split_method)
        .with_max_depth(config.max_depth)
        .with_min_samples_split(config.min_samples_split)
        .with_min_samples_leaf(config.min_samples_leaf)
        .with_min_info_gain(config.min_info_gain)
        .with_max_features(Some(max_features_resolved))
        .with_n_classes(Some(n_classes));
    template.validate()?;

    debug!(
        n_trees = config.n_trees,
        n_rows = rows.len(),
        n_features,
        n_classes,
        max_features = max_features_resolved,
        sampling = ?config.sampling,
        "training random forest"
    );

    // Per-tree seeds come from the master RNG so results do not depend on
    // rayon's scheduling.
    let mut master_rng = ChaCha8Rng::seed_from_u64(config.seed);
    let tree_seeds: Vec<u64> = (0..config.n_trees).map(|_| master_rng.r#gen()).collect();
    let sampling = config.sampling;

    let trees: Vec<DecisionTree> = tree_seeds
        .into_par_iter()
        .map(|seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let tree_rows = match sampling {
                SamplingMode::Bootstrap => bootstrap_rows(rows, &mut rng),
                SamplingMode::FullSample => rows.to_vec(),
            };
            template.clone().with_seed(rng.r#gen()).grow(
                features,
                labels,
                &tree_rows,
                n_features,
                n_classes,
                max_features_resolved,
            )
        })
        .collect();

    debug!(n_trees_trained = trees.len(), "random forest training complete");

    Ok(RandomForest {
        trees,
        n_features,
        n_classes,
    })
}
