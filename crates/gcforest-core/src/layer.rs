//! Cascade layers.

use tracing::{debug, instrument};

use crate::cancel::CancellationToken;
use crate::crossval::cross_val_predict;
use crate::error::GcForestError;
use crate::folds::FoldPlan;
use crate::metrics::{accuracy, concat_rows, mean_rows};
use crate::unit::{ForestUnit, ForestUnitSpec};

/// One trained cascade layer: forest units that all saw the same input.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CascadeLayer {
    units: Vec<ForestUnit>,
    input_width: usize,
    n_classes: usize,
}

/// Everything a layer fit produces.
#[derive(Debug)]
pub struct LayerFit {
    /// The layer, holding full-data units for inference.
    pub layer: CascadeLayer,
    /// Out-of-fold unit probabilities concatenated per row (`units x classes` wide).
    pub augmented: Vec<Vec<f64>>,
    /// Out-of-fold probabilities averaged across units.
    pub oof_proba_mean: Vec<Vec<f64>>,
    /// Accuracy of `oof_proba_mean` against the training labels.
    pub oof_accuracy: f64,
}

impl CascadeLayer {
    /// Cross-validate every unit spec on `features` and keep full-data units.
    ///
    /// # Errors
    ///
    /// Propagates unit training errors and [`GcForestError::Cancelled`].
    #[instrument(skip_all, fields(stage = %stage, n_units = specs.len(), input_width = features.first().map_or(0, Vec::len)))]
    pub(crate) fn fit(
        specs: &[ForestUnitSpec],
        features: &[Vec<f64>],
        labels: &[usize],
        plan: &FoldPlan,
        n_classes: usize,
        stage: &str,
        cancel: &CancellationToken,
    ) -> Result<LayerFit, GcForestError> {
        let input_width = features.first().map_or(0, Vec::len);
        let outputs = cross_val_predict(specs, features, labels, plan, n_classes, stage, cancel)?;

        let mut units = Vec::with_capacity(outputs.len());
        let mut blocks = Vec::with_capacity(outputs.len());
        for output in outputs {
            units.push(output.unit);
            blocks.push(output.oof);
        }

        let augmented = concat_rows(&blocks);
        let oof_proba_mean = mean_rows(&blocks);
        let oof_accuracy = accuracy(&oof_proba_mean, labels)?;
        debug!(oof_accuracy, augmented_width = units.len() * n_classes, "layer cross-validated");

        Ok(LayerFit {
            layer: CascadeLayer {
                units,
                input_width,
                n_classes,
            },
            augmented,
            oof_proba_mean,
            oof_accuracy,
        })
    }

    /// Per-unit probability blocks for `rows`, in unit order.
    pub(crate) fn predict_blocks(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<Vec<f64>>>, GcForestError> {
        self.units.iter().map(|u| u.predict_proba(rows)).collect()
    }

    /// Unit probabilities concatenated per row: the input the next layer appends.
    ///
    /// # Errors
    ///
    /// Returns [`GcForestError::FeatureWidthMismatch`] when a row is not `input_width` wide.
    pub fn augment(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, GcForestError> {
        Ok(concat_rows(&self.predict_blocks(rows)?))
    }

    /// Unit probabilities averaged per row.
    ///
    /// # Errors
    ///
    /// Returns [`GcForestError::FeatureWidthMismatch`] when a row is not `input_width` wide.
    pub fn mean_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, GcForestError> {
        Ok(mean_rows(&self.predict_blocks(rows)?))
    }

    /// Return the units in fit order.
    #[must_use]
    pub fn units(&self) -> &[ForestUnit] {
        &self.units
    }

    /// Return the number of units.
    #[must_use]
    pub fn n_units(&self) -> usize {
        self.units.len()
    }

    /// Return the feature width the layer was trained on.
    #[must_use]
    pub fn input_width(&self) -> usize {
        self.input_width
    }

    /// Return the augmented width this layer adds (`units x classes`).
    #[must_use]
    pub fn output_width(&self) -> usize {
        self.units.len() * self.n_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::ForestKind;

    fn three_class() -> (Vec<Vec<f64>>, Vec<usize>) {
        let features = (0..45)
            .map(|i| {
                let class = (i % 3) as f64;
                vec![class * 2.0 + (i % 4) as f64 * 0.1, (i % 5) as f64, class]
            })
            .collect();
        let labels = (0..45).map(|i| i % 3).collect();
        (features, labels)
    }

    #[test]
    fn augmented_width_is_units_times_classes() {
        let (features, labels) = three_class();
        let plan = FoldPlan::stratified(&labels, 3, 5, "test").unwrap();
        for n_units in 1..=3 {
            let specs: Vec<ForestUnitSpec> = (0..n_units)
                .map(|u| {
                    let kind = if u % 2 == 0 {
                        ForestKind::RandomForest
                    } else {
                        ForestKind::CompletelyRandom
                    };
                    ForestUnitSpec::new(kind, 5).with_seed(u as u64)
                })
                .collect();
            let fit = CascadeLayer::fit(
                &specs,
                &features,
                &labels,
                &plan,
                3,
                "test",
                &CancellationToken::new(),
            )
            .unwrap();
            assert_eq!(fit.layer.output_width(), n_units * 3);
            assert!(fit.augmented.iter().all(|r| r.len() == n_units * 3));
            assert_eq!(fit.layer.input_width(), 3);
            assert!(fit.oof_accuracy > 0.8, "oof accuracy {}", fit.oof_accuracy);
        }
    }

    #[test]
    fn same_seed_gives_bit_identical_augmented_features() {
        let (features, labels) = three_class();
        let config = crate::config::GcForestConfig::builder()
            .with_cascade_forest_tree_num(6)
            .with_seed(11)
            .build()
            .unwrap();
        let run = || {
            let plan = FoldPlan::resolve(&labels, config.n_folds, 11, "layer 1").unwrap();
            CascadeLayer::fit(
                &config.cascade_unit_specs(1),
                &features,
                &labels,
                &plan,
                3,
                "layer 1",
                &CancellationToken::new(),
            )
            .unwrap()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.augmented, b.augmented);
        assert_eq!(a.oof_proba_mean, b.oof_proba_mean);
        assert_eq!(a.oof_accuracy, b.oof_accuracy);
        assert_eq!(a.augmented[0].len(), config.units_per_layer() * 3);
    }

    #[test]
    fn augment_and_mean_agree() {
        let (features, labels) = three_class();
        let plan = FoldPlan::stratified(&labels, 3, 5, "test").unwrap();
        let specs = vec![
            ForestUnitSpec::new(ForestKind::RandomForest, 5),
            ForestUnitSpec::new(ForestKind::CompletelyRandom, 5),
        ];
        let fit = CascadeLayer::fit(&specs, &features, &labels, &plan, 3, "test", &CancellationToken::new())
            .unwrap();
        let augmented = fit.layer.augment(&features).unwrap();
        let mean = fit.layer.mean_proba(&features).unwrap();
        for (aug, m) in augmented.iter().zip(&mean) {
            for class in 0..3 {
                let expected = (aug[class] + aug[3 + class]) / 2.0;
                assert!((m[class] - expected).abs() < 1e-12);
            }
        }
    }
}
