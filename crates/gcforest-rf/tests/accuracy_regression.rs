//! Accuracy regression tests for gcforest-rf.
//!
//! These tests verify that algorithmic changes do not degrade forest
//! classification accuracy on a deterministic synthetic dataset.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use gcforest_rf::{MaxFeatures, RandomForest, RandomForestConfig, SamplingMode, SplitMethod};

// ---------------------------------------------------------------------------
// Helper: deterministic synthetic classification dataset
// ---------------------------------------------------------------------------

/// Generate a 300-sample, 10-feature, 3-class classification dataset.
///
/// Features 0-2 are informative (class * 3.0 + noise in [0, 0.5]).
/// Features 3-9 are pure noise in [0, 0.5].
/// Samples are assigned round-robin across classes.
fn make_classification() -> (Vec<Vec<f64>>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let n_samples = 300;
    let n_features = 10;
    let n_classes = 3;

    let mut features = Vec::with_capacity(n_samples);
    let mut labels = Vec::with_capacity(n_samples);
    for i in 0..n_samples {
        let class = i % n_classes;
        labels.push(class);
        let row: Vec<f64> = (0..n_features)
            .map(|f| {
                let base = if f < 3 { class as f64 * 3.0 } else { 0.0 };
                base + rng.r#gen::<f64>() * 0.5
            })
            .collect();
        features.push(row);
    }
    (features, labels)
}

/// Train on even rows, score on odd rows.
fn holdout_accuracy(config: &RandomForestConfig) -> f64 {
    let (features, labels) = make_classification();
    let train_rows: Vec<usize> = (0..features.len()).step_by(2).collect();
    let forest = config.fit_subset(&features, &labels, &train_rows).unwrap();
    accuracy_on(&forest, &features, &labels, (1..features.len()).step_by(2))
}

fn accuracy_on(
    forest: &RandomForest,
    features: &[Vec<f64>],
    labels: &[usize],
    rows: impl Iterator<Item = usize>,
) -> f64 {
    let mut total = 0usize;
    let mut correct = 0usize;
    for row in rows {
        total += 1;
        if forest.predict(&features[row]).unwrap() == labels[row] {
            correct += 1;
        }
    }
    correct as f64 / total as f64
}

// ---------------------------------------------------------------------------
// a) holdout accuracy per forest flavour
// ---------------------------------------------------------------------------

/// Bootstrap RF with exact splits must generalize to the held-out half.
///
/// Reference: observed holdout accuracy = 1.0 with seed=42, 100 trees.
#[test]
fn random_forest_holdout_accuracy() {
    let config = RandomForestConfig::new(100).unwrap().with_seed(42);
    let accuracy = holdout_accuracy(&config);
    assert!(accuracy > 0.90, "holdout accuracy {accuracy} <= 0.90");
}

/// Histogram splitting is the cascade's RF flavour; it must stay close to exact.
#[test]
fn histogram_forest_holdout_accuracy() {
    let config = RandomForestConfig::new(100)
        .unwrap()
        .with_split_method(SplitMethod::Histogram { n_bins: 32 })
        .with_seed(42);
    let accuracy = holdout_accuracy(&config);
    assert!(accuracy > 0.90, "histogram holdout accuracy {accuracy} <= 0.90");
}

/// Completely-random trees pick splits without looking at labels, so they need
/// more trees; 7 of 10 features are noise and accuracy is lower than RF.
#[test]
fn completely_random_forest_holdout_accuracy() {
    let config = RandomForestConfig::new(200)
        .unwrap()
        .with_split_method(SplitMethod::CompletelyRandom)
        .with_sampling(SamplingMode::FullSample)
        .with_max_features(MaxFeatures::All)
        .with_seed(42);
    let accuracy = holdout_accuracy(&config);
    assert!(accuracy > 0.70, "completely-random holdout accuracy {accuracy} <= 0.70");
}

// ---------------------------------------------------------------------------
// b) deterministic_predictions
// ---------------------------------------------------------------------------

/// Same config and seed must produce identical probabilities across two runs.
#[test]
fn deterministic_predictions() {
    let (features, labels) = make_classification();
    let rf_config = RandomForestConfig::new(100).unwrap().with_seed(42);

    let forest1 = rf_config.fit(&features, &labels).unwrap();
    let forest2 = rf_config.fit(&features, &labels).unwrap();

    let proba1 = forest1.predict_proba_batch(&features).unwrap();
    let proba2 = forest2.predict_proba_batch(&features).unwrap();

    assert_eq!(proba1, proba2, "probabilities differ across runs with the same seed");
}

// ---------------------------------------------------------------------------
// c) prediction_accuracy_on_training_data
// ---------------------------------------------------------------------------

/// Training accuracy with 100 trees must exceed 0.95 (RF should memorize training data).
#[test]
fn prediction_accuracy_on_training_data() {
    let (features, labels) = make_classification();
    let rf_config = RandomForestConfig::new(100).unwrap().with_seed(42);
    let forest = rf_config.fit(&features, &labels).unwrap();

    let accuracy = accuracy_on(&forest, &features, &labels, 0..features.len());
    assert!(accuracy > 0.95, "training accuracy {accuracy} <= 0.95");
}

// ---------------------------------------------------------------------------
// d) probabilities are well formed
// ---------------------------------------------------------------------------

#[test]
fn probabilities_sum_to_one() {
    let (features, labels) = make_classification();
    let forest = RandomForestConfig::new(20)
        .unwrap()
        .with_seed(3)
        .fit(&features, &labels)
        .unwrap();
    for dist in forest.predict_proba_batch(&features).unwrap() {
        let sum: f64 = dist.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum = {sum}");
        assert!(dist.as_slice().iter().all(|&p| (0.0..=1.0).contains(&p)));
    }
}
