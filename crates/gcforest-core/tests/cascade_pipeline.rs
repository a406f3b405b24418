//! End-to-end tests for gcforest-core: fit, predict, persist.
//!
//! All datasets are synthetic and seeded, so every assertion is deterministic.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

use gcforest_core::{
    CancellationToken, DataStyle, ErrorKind, GcForestConfig, GcForestError, GcForestModel, GrowthOutcome,
    InputShape, WindowConfig,
};

// ---------------------------------------------------------------------------
// Helpers: deterministic synthetic datasets
// ---------------------------------------------------------------------------

/// 3-class tabular data with informative features 0-1 and label noise on 10% of rows.
fn make_tabular(n_samples: usize, seed: u64) -> (Vec<Vec<f64>>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut features = Vec::with_capacity(n_samples);
    let mut labels = Vec::with_capacity(n_samples);
    for i in 0..n_samples {
        let class = i % 3;
        let row: Vec<f64> = (0..6)
            .map(|f| {
                let base = if f < 2 { class as f64 * 1.5 } else { 0.0 };
                base + rng.r#gen::<f64>() * 1.2
            })
            .collect();
        features.push(row);
        let flip = rng.r#gen::<f64>() < 0.1;
        labels.push(if flip { (class + 1) % 3 } else { class });
    }
    (features, labels)
}

/// Binary sequences of length 12 where class 1 carries a bump at a random offset.
fn make_sequences(n_samples: usize, seed: u64) -> (Vec<Vec<f64>>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut features = Vec::with_capacity(n_samples);
    let mut labels = Vec::with_capacity(n_samples);
    for i in 0..n_samples {
        let class = i % 2;
        let mut row: Vec<f64> = (0..12).map(|_| rng.r#gen::<f64>() * 0.3).collect();
        if class == 1 {
            let start = rng.gen_range(0..9);
            for v in &mut row[start..start + 3] {
                *v += 2.0;
            }
        }
        features.push(row);
        labels.push(class);
    }
    (features, labels)
}

fn tabular_config() -> GcForestConfig {
    GcForestConfig::builder()
        .with_rf_num(1)
        .with_crf_num(1)
        .with_cascade_forest_tree_num(10)
        .with_max_iteration(4)
        .with_early_stopping_rounds(1)
        .with_seed(7)
        .build()
        .unwrap()
}

fn accuracy(pred: &[usize], labels: &[usize]) -> f64 {
    let correct = pred.iter().zip(labels).filter(|(p, l)| p == l).count();
    correct as f64 / labels.len() as f64
}

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

#[test]
fn same_seed_gives_identical_fits() {
    let (features, labels) = make_tabular(120, 1);
    let config = tabular_config();
    let a = config.fit(&features, &labels).unwrap();
    let b = config.fit(&features, &labels).unwrap();

    assert_eq!(a.report, b.report);
    assert_eq!(a.model.n_layers(), b.model.n_layers());
    assert_eq!(
        a.model.predict_proba(&features).unwrap(),
        b.model.predict_proba(&features).unwrap()
    );
}

#[test]
fn retained_prefix_scores_at_least_every_discarded_layer() {
    let (features, labels) = make_tabular(150, 2);
    let fit = tabular_config().fit(&features, &labels).unwrap();
    let report = &fit.report;

    assert!(fit.model.n_layers() >= 1);
    assert_eq!(fit.model.n_layers(), report.retained_layers);
    assert!(report.layers.len() >= report.retained_layers);
    let best = report.layers[report.best_layer - 1].score;
    for layer in &report.layers[report.best_layer..] {
        assert!(layer.score <= best);
    }
    if report.outcome == GrowthOutcome::StoppedEarly {
        assert_eq!(report.layers.len(), report.best_layer + 2);
    }
}

#[test]
fn probabilities_are_distributions() {
    let (features, labels) = make_tabular(90, 3);
    let model = tabular_config().fit(&features, &labels).unwrap().model;
    for row in model.predict_proba(&features).unwrap() {
        assert_eq!(row.len(), 3);
        assert!(row.iter().all(|&p| p >= 0.0));
        assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-6);
    }
}

#[test]
fn held_out_accuracy_beats_chance() {
    let (features, labels) = make_tabular(240, 4);
    let (train_x, test_x) = features.split_at(180);
    let (train_y, test_y) = labels.split_at(180);
    let model = tabular_config().fit(train_x, train_y).unwrap().model;
    let acc = accuracy(&model.predict(test_x).unwrap(), test_y);
    assert!(acc > 0.7, "held-out accuracy {acc}");
}

#[test]
fn explicit_validation_set_drives_scores() {
    let (features, labels) = make_tabular(150, 5);
    let (train_x, val_x) = features.split_at(110);
    let (train_y, val_y) = labels.split_at(110);
    let config = tabular_config();
    let fit = config.trainer().with_validation(val_x, val_y).fit(train_x, train_y).unwrap();
    for layer in &fit.report.layers {
        let val = layer.validation_accuracy.unwrap();
        assert_eq!(layer.score, val);
        assert!((0.0..=1.0).contains(&val));
    }
}

#[test]
fn empty_validation_set_is_configuration_error() {
    let (features, labels) = make_tabular(60, 6);
    let config = tabular_config();
    let err = config.trainer().with_validation(&[], &[]).fit(&features, &labels).unwrap_err();
    assert!(matches!(err, GcForestError::EmptyValidationSet));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn predict_rejects_other_widths() {
    let (features, labels) = make_tabular(60, 7);
    let model = tabular_config().fit(&features, &labels).unwrap().model;
    assert_eq!(model.input_shape(), InputShape::Fixed { width: 6 });

    let err = model.predict(&[vec![0.0; 5]]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);
    assert!(matches!(
        err,
        GcForestError::FeatureWidthMismatch { expected: 6, got: 5, sample_index: 0 }
    ));
}

#[test]
fn cancelled_fit_reports_cancellation() {
    let (features, labels) = make_tabular(60, 8);
    let token = CancellationToken::new();
    let config = tabular_config();
    let trainer = config.trainer().with_cancellation(&token);
    token.cancel();
    let err = trainer.fit(&features, &labels).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[test]
fn too_few_rows_for_folds_rejected() {
    let features = vec![vec![0.0], vec![1.0]];
    let labels = vec![0, 1];
    let err = tabular_config().fit(&features, &labels).unwrap_err();
    assert!(matches!(err, GcForestError::TooFewRows { n_rows: 2, n_folds: 3, .. }));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

fn scan_config(windows: Vec<WindowConfig>, style: DataStyle) -> GcForestConfig {
    GcForestConfig::builder()
        .with_scan_windows(windows)
        .with_data_style(style)
        .with_scan_forest_tree_num(8)
        .with_rf_num(1)
        .with_crf_num(1)
        .with_cascade_forest_tree_num(8)
        .with_max_iteration(2)
        .build()
        .unwrap()
}

#[test]
fn scanned_sequences_are_classified() {
    let (features, labels) = make_sequences(80, 9);
    let (train_x, test_x) = features.split_at(60);
    let (train_y, test_y) = labels.split_at(60);
    let config = scan_config(vec![WindowConfig::new(3), WindowConfig::new(6).with_stride(2)], DataStyle::Sequence);
    let fit = config.fit(train_x, train_y).unwrap();

    let scanner = fit.model.scanner().unwrap();
    assert_eq!(scanner.output_width(), 2 * 2 * 2);
    assert_eq!(fit.report.layers[0].input_width, 8);
    let acc = accuracy(&fit.model.predict(test_x).unwrap(), test_y);
    assert!(acc > 0.8, "scanned accuracy {acc}");
}

#[test]
fn ragged_sequences_keep_length_range() {
    let (mut features, labels) = make_sequences(40, 10);
    for (i, row) in features.iter_mut().enumerate() {
        if i % 4 == 0 {
            row.truncate(10);
        }
    }
    let config = scan_config(vec![WindowConfig::new(4)], DataStyle::Sequence);
    let model = config.fit(&features, &labels).unwrap().model;
    assert_eq!(model.input_shape(), InputShape::Ragged { min_len: 10, max_len: 12 });
    assert_eq!(model.predict(&[vec![0.1; 11]]).unwrap().len(), 1);
    assert_eq!(model.predict(&[vec![0.1; 13]]).unwrap_err().kind(), ErrorKind::Shape);
}

#[test]
fn window_larger_than_every_instance_rejected() {
    let (features, labels) = make_sequences(30, 11);
    let config = scan_config(vec![WindowConfig::new(20)], DataStyle::Sequence);
    let err = config.fit(&features, &labels).unwrap_err();
    assert!(matches!(err, GcForestError::WindowTooLarge { size: 20, max_extent: 12 }));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn image_rows_must_match_grid() {
    let (features, labels) = make_sequences(30, 12);
    let config = scan_config(vec![WindowConfig::new(2)], DataStyle::Image { rows: 5, cols: 2 });
    let err = config.fit(&features, &labels).unwrap_err();
    assert!(matches!(err, GcForestError::ImageWidthMismatch { width: 12, .. }));
}

#[test]
fn image_scanning_fits() {
    let (features, labels) = make_sequences(40, 13);
    let config = scan_config(vec![WindowConfig::new(2)], DataStyle::Image { rows: 3, cols: 4 });
    let fit = config.fit(&features, &labels).unwrap();
    assert!(fit.model.uses_scanning());
    assert_eq!(fit.model.predict_proba(&features[..5]).unwrap().len(), 5);
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn saved_model_predicts_identically() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scanned.bin");
    let (features, labels) = make_sequences(50, 14);
    let model = scan_config(vec![WindowConfig::new(4)], DataStyle::Sequence)
        .fit(&features, &labels)
        .unwrap()
        .model;
    model.save(&path).unwrap();

    let loaded = GcForestModel::load(&path).unwrap();
    assert!(loaded.uses_scanning());
    assert_eq!(loaded.n_layers(), model.n_layers());
    assert_eq!(loaded.n_classes(), 2);
    assert_eq!(
        loaded.predict_proba(&features).unwrap(),
        model.predict_proba(&features).unwrap()
    );
}
