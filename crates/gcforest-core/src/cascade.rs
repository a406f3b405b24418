//! Cascade growth: scanning, layer-by-layer fitting, early stopping.

use std::borrow::Cow;

use gcforest_rf::MaxFeatures;
use tracing::{info, instrument};

use crate::cancel::CancellationToken;
use crate::config::{DataStyle, GcForestConfig};
use crate::error::GcForestError;
use crate::folds::{FoldPlan, distinct_count, stratified_holdout};
use crate::growth::{EarlyStopping, GrowthDecision, GrowthOutcome};
use crate::layer::CascadeLayer;
use crate::metrics::{accuracy, concat_rows, mean_rows};
use crate::model::{GcForestModel, InputShape, layer_input};
use crate::scan::{FittedScanner, MultiGrainScanner};
use crate::seed::{CASCADE_STAGE, HOLDOUT_STAGE, derive_seed};

/// Scores of one fitted cascade layer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LayerReport {
    /// One-based layer index.
    pub layer: usize,
    /// Width of the features the layer was trained on.
    pub input_width: usize,
    /// Accuracy of the mean out-of-fold prediction on the training rows.
    pub oof_accuracy: f64,
    /// Accuracy on the validation rows, when a validation set was used.
    pub validation_accuracy: Option<f64>,
    /// The score early stopping saw: validation accuracy if present, else OOF accuracy.
    pub score: f64,
}

/// How growth went, layer by layer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GrowthReport {
    /// Why growth ended.
    pub outcome: GrowthOutcome,
    /// Every layer fitted, including the ones discarded after the best.
    pub layers: Vec<LayerReport>,
    /// One-based index of the best-scoring layer.
    pub best_layer: usize,
    /// Layers kept in the model.
    pub retained_layers: usize,
}

/// A fitted model and the report of how it was grown.
#[derive(Debug, Clone)]
pub struct GcForestFit {
    /// The fitted model, truncated to the best-scoring prefix.
    pub model: GcForestModel,
    /// Per-layer scores and the stop reason.
    pub report: GrowthReport,
}

/// Runs a deep forest fit for one [`GcForestConfig`].
///
/// Obtain one from [`GcForestConfig::trainer`]. Without a validation set,
/// layers are scored on a stratified hold-out when `validation_fraction` is
/// set, and on their own out-of-fold accuracy otherwise.
#[derive(Debug, Clone)]
pub struct Trainer<'a> {
    config: &'a GcForestConfig,
    validation: Option<(&'a [Vec<f64>], &'a [usize])>,
    cancel: CancellationToken,
}

/// Training rows after the hold-out split, plus the rows layers are scored on.
struct Split<'a> {
    train_x: Cow<'a, [Vec<f64>]>,
    train_y: Cow<'a, [usize]>,
    validation: Option<(Cow<'a, [Vec<f64>]>, Cow<'a, [usize]>)>,
}

impl<'a> Trainer<'a> {
    /// Create a trainer for `config`.
    #[must_use]
    pub fn new(config: &'a GcForestConfig) -> Self {
        Self {
            config,
            validation: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Score layers on an explicit validation set instead of a hold-out.
    #[must_use]
    pub fn with_validation(mut self, features: &'a [Vec<f64>], labels: &'a [usize]) -> Self {
        self.validation = Some((features, labels));
        self
    }

    /// Observe `token`; cancelling it aborts training at the next stage or job.
    #[must_use]
    pub fn with_cancellation(mut self, token: &CancellationToken) -> Self {
        self.cancel = token.clone();
        self
    }

    /// Fit the scanner (when windows are configured) and grow the cascade.
    ///
    /// Layers are added until early stopping, convergence, or `max_iteration`,
    /// then the model is truncated to the best-scoring prefix.
    ///
    /// # Errors
    ///
    /// | Variant                                         | When                                          |
    /// |-------------------------------------------------|-----------------------------------------------|
    /// | [`GcForestError::EmptyDataset`]                 | no training rows                              |
    /// | [`GcForestError::LabelCountMismatch`]           | labels and rows differ in count               |
    /// | [`GcForestError::ZeroFeatures`]                 | a row is empty                                |
    /// | [`GcForestError::NonFiniteValue`]               | a value is NaN or infinite                    |
    /// | [`GcForestError::LabelOutOfRange`]              | a label is not below `n_classes`              |
    /// | [`GcForestError::TooFewClasses`]                | fewer than two distinct labels                |
    /// | [`GcForestError::FeatureWidthMismatch`]         | ragged rows without scanning, or validation rows of another width |
    /// | [`GcForestError::SequenceLengthOutOfRange`]     | validation sequences outside the training length range |
    /// | [`GcForestError::InvalidFeatureSubset`]         | a fixed subset count exceeds a forest's width |
    /// | [`GcForestError::EmptyValidationSet`]           | the validation set or hold-out is empty       |
    /// | [`GcForestError::TooFewRows`]                   | fewer training rows than folds                |
    /// | [`GcForestError::WindowTooLarge`]               | a window fits in no instance                  |
    /// | [`GcForestError::LayerFailed`]                  | a cascade layer could not be trained          |
    /// | [`GcForestError::Cancelled`]                    | the cancellation token fired                  |
    #[instrument(skip_all, fields(n_rows = features.len(), n_windows = self.config.scan_windows.len(), seed = self.config.seed))]
    pub fn fit(&self, features: &[Vec<f64>], labels: &[usize]) -> Result<GcForestFit, GcForestError> {
        let config = self.config;
        let n_classes = validate_training_data(config, features, labels)?;
        let input_shape = InputShape::of_rows(features);
        let split = self.split(features, labels, n_classes, input_shape)?;
        let train_y: &[usize] = &split.train_y;
        if train_y.len() < config.n_folds {
            return Err(GcForestError::TooFewRows {
                stage: "training set".to_string(),
                n_rows: train_y.len(),
                n_folds: config.n_folds,
            });
        }

        let (scanner, base, val_base) = if config.scan_windows.is_empty() {
            check_fixed_subset(config, "cascade", features[0].len())?;
            let val_base = split.validation.as_ref().map(|(x, _)| Cow::Borrowed(&x[..]));
            (None, Cow::Borrowed(&split.train_x[..]), val_base)
        } else {
            for window in &config.scan_windows {
                check_fixed_subset(config, "scan", window.width(config.data_style))?;
            }
            self.cancel.check()?;
            let (scanner, transformed) =
                MultiGrainScanner::new(config).fit(&split.train_x, train_y, n_classes, &self.cancel)?;
            check_fixed_subset(config, "cascade", scanner.output_width())?;
            let val_base = match &split.validation {
                Some((x, _)) => Some(Cow::Owned(scanner.transform(x)?)),
                None => None,
            };
            (Some(scanner), Cow::Owned(transformed), val_base)
        };
        let validation = val_base.zip(split.validation.as_ref().map(|(_, y)| &y[..]));

        let mut stopper = EarlyStopping::new(config.early_stopping_rounds, config.max_iteration);
        let mut layers: Vec<CascadeLayer> = Vec::new();
        let mut reports: Vec<LayerReport> = Vec::new();
        let mut train_aug: Option<Vec<Vec<f64>>> = None;
        let mut val_aug: Option<Vec<Vec<f64>>> = None;

        let outcome = loop {
            let layer_no = layers.len() + 1;
            let fail = |err: GcForestError| {
                failure(err, layer_no, &scanner, &layers, stopper.best_layer(), n_classes, input_shape)
            };
            self.cancel.check().map_err(fail)?;

            let stage = format!("cascade layer {layer_no}");
            let input = layer_input(&base, train_aug.as_deref());
            let plan = FoldPlan::resolve(
                train_y,
                config.n_folds,
                derive_seed(config.seed, &[CASCADE_STAGE, layer_no as u64]),
                &stage,
            )
            .map_err(fail)?;
            let specs = config.cascade_unit_specs(layer_no);
            let fit = CascadeLayer::fit(&specs, &input, train_y, &plan, n_classes, &stage, &self.cancel)
                .map_err(fail)?;

            let validation_accuracy = match &validation {
                Some((val_x, val_y)) => {
                    let val_input = layer_input(val_x, val_aug.as_deref());
                    let blocks = fit.layer.predict_blocks(&val_input).map_err(fail)?;
                    let score = accuracy(&mean_rows(&blocks), val_y).map_err(fail)?;
                    val_aug = Some(concat_rows(&blocks));
                    Some(score)
                }
                None => None,
            };
            let score = validation_accuracy.unwrap_or(fit.oof_accuracy);
            let input_width = fit.layer.input_width();
            info!(
                layer = layer_no,
                input_width,
                oof_accuracy = fit.oof_accuracy,
                validation_accuracy,
                score,
                "cascade layer fitted"
            );

            reports.push(LayerReport {
                layer: layer_no,
                input_width,
                oof_accuracy: fit.oof_accuracy,
                validation_accuracy,
                score,
            });
            train_aug = Some(fit.augmented);
            layers.push(fit.layer);

            if let GrowthDecision::Stop(outcome) = stopper.observe(score) {
                break outcome;
            }
        };

        let best_layer = stopper.best_layer();
        layers.truncate(best_layer);
        info!(
            ?outcome,
            fitted_layers = reports.len(),
            retained_layers = best_layer,
            best_score = stopper.best_score(),
            "cascade growth stopped"
        );

        Ok(GcForestFit {
            model: GcForestModel {
                scanner,
                layers,
                n_classes,
                input_shape,
            },
            report: GrowthReport {
                outcome,
                layers: reports,
                best_layer,
                retained_layers: best_layer,
            },
        })
    }

    /// Pick the rows layers are scored on: the explicit set, a hold-out, or none.
    fn split<'b>(
        &self,
        features: &'b [Vec<f64>],
        labels: &'b [usize],
        n_classes: usize,
        input_shape: InputShape,
    ) -> Result<Split<'b>, GcForestError>
    where
        'a: 'b,
    {
        if let Some((val_x, val_y)) = self.validation {
            validate_validation_data(val_x, val_y, n_classes, input_shape)?;
            return Ok(Split {
                train_x: Cow::Borrowed(features),
                train_y: Cow::Borrowed(labels),
                validation: Some((Cow::Borrowed(val_x), Cow::Borrowed(val_y))),
            });
        }

        let Some(fraction) = self.config.validation_fraction else {
            return Ok(Split {
                train_x: Cow::Borrowed(features),
                train_y: Cow::Borrowed(labels),
                validation: None,
            });
        };

        let seed = derive_seed(self.config.seed, &[HOLDOUT_STAGE]);
        let (train, holdout) = stratified_holdout(labels, fraction, seed)?;
        info!(n_train = train.len(), n_holdout = holdout.len(), fraction, "held out validation rows");
        let pick_x = |idx: &[usize]| idx.iter().map(|&i| features[i].clone()).collect::<Vec<_>>();
        let pick_y = |idx: &[usize]| idx.iter().map(|&i| labels[i]).collect::<Vec<_>>();
        Ok(Split {
            train_x: Cow::Owned(pick_x(&train)),
            train_y: Cow::Owned(pick_y(&train)),
            validation: Some((Cow::Owned(pick_x(&holdout)), Cow::Owned(pick_y(&holdout)))),
        })
    }
}

/// Wrap a layer failure, attaching the best prefix of the completed layers.
fn failure(
    err: GcForestError,
    layer: usize,
    scanner: &Option<FittedScanner>,
    layers: &[CascadeLayer],
    best_layer: usize,
    n_classes: usize,
    input_shape: InputShape,
) -> GcForestError {
    let partial = (best_layer > 0).then(|| {
        Box::new(GcForestModel {
            scanner: scanner.clone(),
            layers: layers[..best_layer].to_vec(),
            n_classes,
            input_shape,
        })
    });
    match err {
        GcForestError::Cancelled { .. } => GcForestError::Cancelled {
            completed_layers: layers.len(),
            partial,
        },
        source => GcForestError::LayerFailed {
            layer,
            source: Box::new(source),
            partial,
        },
    }
}

/// Check the training rows and labels; return the class count.
fn validate_training_data(
    config: &GcForestConfig,
    features: &[Vec<f64>],
    labels: &[usize],
) -> Result<usize, GcForestError> {
    if features.is_empty() {
        return Err(GcForestError::EmptyDataset);
    }
    if labels.len() != features.len() {
        return Err(GcForestError::LabelCountMismatch {
            n_rows: features.len(),
            n_labels: labels.len(),
        });
    }
    check_rows(features)?;

    let n_classes = match config.n_classes {
        Some(n) => n,
        None => labels.iter().max().map_or(0, |&m| m + 1),
    };
    check_labels(labels, n_classes)?;
    let n_distinct = distinct_count(labels.iter().copied());
    if n_distinct < 2 {
        return Err(GcForestError::TooFewClasses { n_distinct });
    }

    // Scanning handles ragged sequences; the cascade alone needs one width.
    if config.scan_windows.is_empty() {
        InputShape::Fixed {
            width: features[0].len(),
        }
        .check(features)?;
    } else if let DataStyle::Image { rows, cols } = config.data_style
        && let Some((sample_index, row)) = features.iter().enumerate().find(|(_, r)| r.len() != rows * cols)
    {
        return Err(GcForestError::ImageWidthMismatch {
            rows,
            cols,
            width: row.len(),
            sample_index,
        });
    }
    Ok(n_classes)
}

/// Validation rows must fit the shape the training rows established, scanned or not.
fn validate_validation_data(
    features: &[Vec<f64>],
    labels: &[usize],
    n_classes: usize,
    input_shape: InputShape,
) -> Result<(), GcForestError> {
    if features.is_empty() {
        return Err(GcForestError::EmptyValidationSet);
    }
    if labels.len() != features.len() {
        return Err(GcForestError::LabelCountMismatch {
            n_rows: features.len(),
            n_labels: labels.len(),
        });
    }
    check_rows(features)?;
    check_labels(labels, n_classes)?;
    input_shape.check(features)
}

fn check_rows(features: &[Vec<f64>]) -> Result<(), GcForestError> {
    for (sample_index, row) in features.iter().enumerate() {
        if row.is_empty() {
            return Err(GcForestError::ZeroFeatures { sample_index });
        }
        if let Some(feature_index) = row.iter().position(|v| !v.is_finite()) {
            return Err(GcForestError::NonFiniteValue {
                sample_index,
                feature_index,
            });
        }
    }
    Ok(())
}

fn check_labels(labels: &[usize], n_classes: usize) -> Result<(), GcForestError> {
    match labels.iter().position(|&l| l >= n_classes) {
        Some(sample_index) => Err(GcForestError::LabelOutOfRange {
            label: labels[sample_index],
            n_classes,
            sample_index,
        }),
        None => Ok(()),
    }
}

/// A fixed feature-subset count must fit the narrowest input a forest sees.
fn check_fixed_subset(config: &GcForestConfig, stage: &'static str, width: usize) -> Result<(), GcForestError> {
    let strategies = [
        ("random forest", config.feature_subset_strategy),
        ("completely random forest", config.crf_feature_subset_strategy),
    ];
    for (kind, strategy) in strategies {
        if let MaxFeatures::Fixed(n) = strategy
            && n > width
        {
            return Err(GcForestError::InvalidFeatureSubset {
                stage: kind,
                strategy: format!("{strategy:?}"),
                reason: format!("count exceeds the {width} {stage} features"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::window::WindowConfig;

    fn blobs(n: usize) -> (Vec<Vec<f64>>, Vec<usize>) {
        let features = (0..n)
            .map(|i| {
                let class = (i % 3) as f64;
                vec![class * 3.0 + (i % 5) as f64 * 0.3, (i % 7) as f64, class - (i % 2) as f64 * 0.5]
            })
            .collect();
        let labels = (0..n).map(|i| i % 3).collect();
        (features, labels)
    }

    fn small_config() -> GcForestConfig {
        GcForestConfig::builder()
            .with_rf_num(1)
            .with_crf_num(1)
            .with_cascade_forest_tree_num(8)
            .with_max_iteration(3)
            .build()
            .unwrap()
    }

    #[test]
    fn fit_retains_best_prefix() {
        let (features, labels) = blobs(60);
        let fit = small_config().fit(&features, &labels).unwrap();
        let report = &fit.report;
        assert!(fit.model.n_layers() >= 1);
        assert_eq!(fit.model.n_layers(), report.retained_layers);
        assert_eq!(report.best_layer, report.retained_layers);
        let best = report.layers[report.best_layer - 1].score;
        assert!(report.layers.iter().all(|l| l.score <= best));
        assert!(report.layers.iter().all(|l| l.validation_accuracy.is_none()));
    }

    #[test]
    fn later_layers_see_augmented_width() {
        let (features, labels) = blobs(60);
        let fit = small_config().fit(&features, &labels).unwrap();
        for window in fit.report.layers.windows(2) {
            assert_eq!(window[1].input_width, 3 + 2 * 3);
            assert_eq!(window[0].layer + 1, window[1].layer);
        }
    }

    #[test]
    fn label_count_mismatch_rejected() {
        let (features, labels) = blobs(12);
        let err = small_config().fit(&features, &labels[..10]).unwrap_err();
        assert!(matches!(err, GcForestError::LabelCountMismatch { n_rows: 12, n_labels: 10 }));
    }

    #[test]
    fn single_class_rejected() {
        let (features, _) = blobs(12);
        let err = small_config().fit(&features, &[1; 12]).unwrap_err();
        assert!(matches!(err, GcForestError::TooFewClasses { n_distinct: 1 }));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn label_beyond_fixed_class_count_rejected() {
        let (features, labels) = blobs(12);
        let config = GcForestConfig::builder().with_n_classes(Some(2)).build().unwrap();
        let err = config.fit(&features, &labels).unwrap_err();
        assert!(matches!(err, GcForestError::LabelOutOfRange { label: 2, n_classes: 2, .. }));
    }

    #[test]
    fn nan_rejected_before_training() {
        let (mut features, labels) = blobs(12);
        features[4][1] = f64::NAN;
        let err = small_config().fit(&features, &labels).unwrap_err();
        assert!(matches!(
            err,
            GcForestError::NonFiniteValue { sample_index: 4, feature_index: 1 }
        ));
    }

    #[test]
    fn ragged_rows_need_scanning() {
        let (mut features, labels) = blobs(12);
        features[3].push(1.0);
        let err = small_config().fit(&features, &labels).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn fixed_subset_wider_than_input_rejected() {
        let (features, labels) = blobs(12);
        let config = GcForestConfig::builder()
            .with_feature_subset_strategy(MaxFeatures::Fixed(5))
            .build()
            .unwrap();
        let err = config.fit(&features, &labels).unwrap_err();
        assert!(matches!(err, GcForestError::InvalidFeatureSubset { .. }));
    }

    #[test]
    fn holdout_fraction_scores_on_validation() {
        let (features, labels) = blobs(60);
        let config = GcForestConfig::builder()
            .with_rf_num(1)
            .with_crf_num(1)
            .with_cascade_forest_tree_num(8)
            .with_max_iteration(2)
            .with_validation_fraction(Some(0.25))
            .build()
            .unwrap();
        let fit = config.fit(&features, &labels).unwrap();
        for layer in &fit.report.layers {
            assert_eq!(layer.validation_accuracy, Some(layer.score));
        }
    }

    #[test]
    fn explicit_validation_with_wrong_width_rejected() {
        let (features, labels) = blobs(30);
        let val = vec![vec![1.0, 2.0]];
        let config = small_config();
        let err = config.trainer().with_validation(&val, &[0]).fit(&features, &labels).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn scanned_validation_rows_must_match_training_length() {
        let features: Vec<Vec<f64>> = (0..24).map(|i| vec![(i % 2) as f64; 12]).collect();
        let labels: Vec<usize> = (0..24).map(|i| i % 2).collect();
        let config = GcForestConfig::builder()
            .with_scan_windows(vec![WindowConfig::new(4)])
            .with_scan_forest_tree_num(4)
            .with_rf_num(1)
            .with_crf_num(1)
            .with_cascade_forest_tree_num(4)
            .with_max_iteration(2)
            .build()
            .unwrap();

        for width in [3, 40] {
            let val = vec![vec![0.0; width], vec![1.0; 12]];
            let err = config.trainer().with_validation(&val, &[0, 1]).fit(&features, &labels).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Shape);
            assert!(matches!(
                err,
                GcForestError::FeatureWidthMismatch { expected: 12, got, sample_index: 0 } if got == width
            ));
        }
    }

    #[test]
    fn pre_cancelled_token_returns_without_partial() {
        let (features, labels) = blobs(30);
        let token = CancellationToken::new();
        token.cancel();
        let err = small_config().trainer().with_cancellation(&token).fit(&features, &labels).unwrap_err();
        assert!(matches!(err, GcForestError::Cancelled { completed_layers: 0, .. }));
        assert!(err.into_partial().is_none());
    }

    #[test]
    fn failure_keeps_best_prefix_as_partial() {
        let (features, labels) = blobs(60);
        let model = small_config().fit(&features, &labels).unwrap().model;
        let layers = vec![model.layers[0].clone(), model.layers[0].clone()];
        let err = failure(
            GcForestError::EmptyValidationSet,
            3,
            &None,
            &layers,
            1,
            3,
            model.input_shape(),
        );
        assert!(matches!(err, GcForestError::LayerFailed { layer: 3, .. }));
        let partial = err.into_partial().unwrap();
        assert_eq!(partial.n_layers(), 1);
        assert_eq!(partial.predict(&features[..3]).unwrap().len(), 3);
    }

    #[test]
    fn scanning_fit_uses_window_features() {
        let features: Vec<Vec<f64>> = (0..36)
            .map(|i| {
                let class = i % 2;
                (0..8)
                    .map(|j| if class == 1 && (2..5).contains(&j) { 5.0 } else { (j % 3) as f64 * 0.1 })
                    .collect()
            })
            .collect();
        let labels: Vec<usize> = (0..36).map(|i| i % 2).collect();
        let config = GcForestConfig::builder()
            .with_scan_windows(vec![WindowConfig::new(3), WindowConfig::new(5)])
            .with_scan_forest_tree_num(5)
            .with_rf_num(1)
            .with_crf_num(1)
            .with_cascade_forest_tree_num(5)
            .with_max_iteration(2)
            .build()
            .unwrap();
        let fit = config.fit(&features, &labels).unwrap();
        assert!(fit.model.uses_scanning());
        assert_eq!(fit.report.layers[0].input_width, 2 * 2 * 2);
        assert_eq!(fit.model.predict(&features).unwrap().len(), 36);
    }
}
