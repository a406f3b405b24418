//! Validated, immutable configuration for deep forest training.

use gcforest_rf::MaxFeatures;

use crate::cascade::{GcForestFit, Trainer};
use crate::error::GcForestError;
use crate::seed::{CASCADE_STAGE, SCAN_STAGE, derive_seed};
use crate::unit::{ForestKind, ForestUnitSpec};
use crate::window::WindowConfig;

/// How a flat feature vector is laid out for multi-grained scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DataStyle {
    /// A 1-D sequence; rows may have different lengths.
    Sequence,
    /// A row-major `rows x cols` grid; every row must have `rows * cols` values.
    Image {
        /// Grid height.
        rows: usize,
        /// Grid width.
        cols: usize,
    },
}

/// Immutable deep forest configuration.
///
/// Build with [`GcForestConfig::builder`], which validates every field once.
///
/// # Defaults
///
/// | Parameter                        | Default     |
/// |----------------------------------|-------------|
/// | `scan_windows`                   | `[]`        |
/// | `data_style`                     | `Sequence`  |
/// | `rf_num`                         | 2           |
/// | `crf_num`                        | 2           |
/// | `scan_forest_tree_num`           | 30          |
/// | `cascade_forest_tree_num`        | 100         |
/// | `max_iteration`                  | 10          |
/// | `early_stopping_rounds`          | 2           |
/// | `max_depth`                      | `None`      |
/// | `max_bins`                       | 32          |
/// | `min_info_gain`                  | 0.0         |
/// | `scan_min_instances_per_node`    | 1           |
/// | `cascade_min_instances_per_node` | 1           |
/// | `feature_subset_strategy`        | `Sqrt`      |
/// | `crf_feature_subset_strategy`    | `All`       |
/// | `n_folds`                        | 3           |
/// | `validation_fraction`            | `None`      |
/// | `n_classes`                      | `None`      |
/// | `seed`                           | 42          |
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GcForestConfig {
    pub(crate) scan_windows: Vec<WindowConfig>,
    pub(crate) data_style: DataStyle,
    pub(crate) rf_num: usize,
    pub(crate) crf_num: usize,
    pub(crate) scan_forest_tree_num: usize,
    pub(crate) cascade_forest_tree_num: usize,
    pub(crate) max_iteration: usize,
    pub(crate) early_stopping_rounds: usize,
    pub(crate) max_depth: Option<usize>,
    pub(crate) max_bins: usize,
    pub(crate) min_info_gain: f64,
    pub(crate) scan_min_instances_per_node: usize,
    pub(crate) cascade_min_instances_per_node: usize,
    pub(crate) feature_subset_strategy: MaxFeatures,
    pub(crate) crf_feature_subset_strategy: MaxFeatures,
    pub(crate) n_folds: usize,
    pub(crate) validation_fraction: Option<f64>,
    pub(crate) n_classes: Option<usize>,
    pub(crate) seed: u64,
}

/// Mutable builder for [`GcForestConfig`].
#[derive(Debug, Clone)]
pub struct GcForestConfigBuilder {
    inner: GcForestConfig,
}

impl Default for GcForestConfigBuilder {
    fn default() -> Self {
        Self {
            inner: GcForestConfig {
                scan_windows: Vec::new(),
                data_style: DataStyle::Sequence,
                rf_num: 2,
                crf_num: 2,
                scan_forest_tree_num: 30,
                cascade_forest_tree_num: 100,
                max_iteration: 10,
                early_stopping_rounds: 2,
                max_depth: None,
                max_bins: 32,
                min_info_gain: 0.0,
                scan_min_instances_per_node: 1,
                cascade_min_instances_per_node: 1,
                feature_subset_strategy: MaxFeatures::Sqrt,
                crf_feature_subset_strategy: MaxFeatures::All,
                n_folds: 3,
                validation_fraction: None,
                n_classes: None,
                seed: 42,
            },
        }
    }
}

impl GcForestConfigBuilder {
    /// Set the multi-grained scanning windows. An empty list disables scanning.
    #[must_use]
    pub fn with_scan_windows(mut self, windows: Vec<WindowConfig>) -> Self {
        self.inner.scan_windows = windows;
        self
    }

    /// Set how rows are laid out for scanning.
    #[must_use]
    pub fn with_data_style(mut self, data_style: DataStyle) -> Self {
        self.inner.data_style = data_style;
        self
    }

    /// Set the number of random-forest units per cascade layer.
    #[must_use]
    pub fn with_rf_num(mut self, rf_num: usize) -> Self {
        self.inner.rf_num = rf_num;
        self
    }

    /// Set the number of completely-random-forest units per cascade layer.
    #[must_use]
    pub fn with_crf_num(mut self, crf_num: usize) -> Self {
        self.inner.crf_num = crf_num;
        self
    }

    /// Set the tree count of each scan forest.
    #[must_use]
    pub fn with_scan_forest_tree_num(mut self, n_trees: usize) -> Self {
        self.inner.scan_forest_tree_num = n_trees;
        self
    }

    /// Set the tree count of each cascade forest unit.
    #[must_use]
    pub fn with_cascade_forest_tree_num(mut self, n_trees: usize) -> Self {
        self.inner.cascade_forest_tree_num = n_trees;
        self
    }

    /// Set the maximum number of cascade layers to fit.
    #[must_use]
    pub fn with_max_iteration(mut self, max_iteration: usize) -> Self {
        self.inner.max_iteration = max_iteration;
        self
    }

    /// Set how many layers may follow the best one before growth stops.
    #[must_use]
    pub fn with_early_stopping_rounds(mut self, rounds: usize) -> Self {
        self.inner.early_stopping_rounds = rounds;
        self
    }

    /// Set the maximum tree depth. `None` grows trees until leaves are pure.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.inner.max_depth = max_depth;
        self
    }

    /// Set the number of histogram bins used by random-forest units.
    #[must_use]
    pub fn with_max_bins(mut self, max_bins: usize) -> Self {
        self.inner.max_bins = max_bins;
        self
    }

    /// Set the minimum per-sample impurity decrease for a split.
    #[must_use]
    pub fn with_min_info_gain(mut self, min_info_gain: f64) -> Self {
        self.inner.min_info_gain = min_info_gain;
        self
    }

    /// Set the minimum samples per leaf for scan forests.
    #[must_use]
    pub fn with_scan_min_instances_per_node(mut self, min_instances: usize) -> Self {
        self.inner.scan_min_instances_per_node = min_instances;
        self
    }

    /// Set the minimum samples per leaf for cascade forests.
    #[must_use]
    pub fn with_cascade_min_instances_per_node(mut self, min_instances: usize) -> Self {
        self.inner.cascade_min_instances_per_node = min_instances;
        self
    }

    /// Set the per-split feature subset strategy of random-forest units.
    #[must_use]
    pub fn with_feature_subset_strategy(mut self, strategy: MaxFeatures) -> Self {
        self.inner.feature_subset_strategy = strategy;
        self
    }

    /// Set the feature subset strategy of completely-random-forest units.
    #[must_use]
    pub fn with_crf_feature_subset_strategy(mut self, strategy: MaxFeatures) -> Self {
        self.inner.crf_feature_subset_strategy = strategy;
        self
    }

    /// Set the number of cross-validation folds per layer and scan window.
    #[must_use]
    pub fn with_n_folds(mut self, n_folds: usize) -> Self {
        self.inner.n_folds = n_folds;
        self
    }

    /// Hold out a stratified fraction of the training rows to score layers.
    #[must_use]
    pub fn with_validation_fraction(mut self, fraction: Option<f64>) -> Self {
        self.inner.validation_fraction = fraction;
        self
    }

    /// Fix the class count. `None` derives it as the largest label plus one.
    #[must_use]
    pub fn with_n_classes(mut self, n_classes: Option<usize>) -> Self {
        self.inner.n_classes = n_classes;
        self
    }

    /// Set the master random seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.inner.seed = seed;
        self
    }

    /// Validate every field and freeze the configuration.
    ///
    /// # Errors
    ///
    /// | Variant                                         | When                                       |
    /// |-------------------------------------------------|--------------------------------------------|
    /// | [`GcForestError::InvalidUnitCount`]             | `rf_num + crf_num == 0`                    |
    /// | [`GcForestError::InvalidTreeCount`]             | a tree count is zero                       |
    /// | [`GcForestError::InvalidFoldCount`]             | `n_folds < 2`                              |
    /// | [`GcForestError::InvalidMaxIteration`]          | `max_iteration == 0`                       |
    /// | [`GcForestError::InvalidWindow`]                | a window has zero size or stride           |
    /// | [`GcForestError::InvalidMaxBins`]               | `max_bins < 2`                             |
    /// | [`GcForestError::InvalidMaxDepth`]              | `max_depth == Some(0)`                     |
    /// | [`GcForestError::InvalidMinInstances`]          | a min-instances value is zero              |
    /// | [`GcForestError::InvalidMinInfoGain`]           | `min_info_gain` negative or not finite     |
    /// | [`GcForestError::InvalidFeatureSubset`]         | a fraction outside (0, 1] or a zero count  |
    /// | [`GcForestError::InvalidValidationFraction`]    | fraction outside (0, 1)                    |
    /// | [`GcForestError::InvalidClassCount`]            | `n_classes < 2`                            |
    /// | [`GcForestError::InvalidImageShape`]            | image style with a zero dimension          |
    pub fn build(self) -> Result<GcForestConfig, GcForestError> {
        let c = self.inner;
        if c.rf_num + c.crf_num == 0 {
            return Err(GcForestError::InvalidUnitCount {
                rf_num: c.rf_num,
                crf_num: c.crf_num,
            });
        }
        for (stage, n_trees) in [
            ("scan", c.scan_forest_tree_num),
            ("cascade", c.cascade_forest_tree_num),
        ] {
            if n_trees == 0 {
                return Err(GcForestError::InvalidTreeCount { stage, n_trees });
            }
        }
        if c.n_folds < 2 {
            return Err(GcForestError::InvalidFoldCount { n_folds: c.n_folds });
        }
        if c.max_iteration == 0 {
            return Err(GcForestError::InvalidMaxIteration {
                max_iteration: c.max_iteration,
            });
        }
        if let Some(w) = c.scan_windows.iter().find(|w| w.size == 0 || w.stride == 0) {
            return Err(GcForestError::InvalidWindow {
                size: w.size,
                stride: w.stride,
            });
        }
        if c.max_bins < 2 {
            return Err(GcForestError::InvalidMaxBins { max_bins: c.max_bins });
        }
        if c.max_depth == Some(0) {
            return Err(GcForestError::InvalidMaxDepth);
        }
        for (stage, min_instances) in [
            ("scan", c.scan_min_instances_per_node),
            ("cascade", c.cascade_min_instances_per_node),
        ] {
            if min_instances == 0 {
                return Err(GcForestError::InvalidMinInstances {
                    stage,
                    min_instances,
                });
            }
        }
        if !c.min_info_gain.is_finite() || c.min_info_gain < 0.0 {
            return Err(GcForestError::InvalidMinInfoGain {
                min_info_gain: c.min_info_gain,
            });
        }
        check_subset_strategy("random forest", c.feature_subset_strategy)?;
        check_subset_strategy("completely random forest", c.crf_feature_subset_strategy)?;
        if let Some(fraction) = c.validation_fraction
            && !(fraction > 0.0 && fraction < 1.0)
        {
            return Err(GcForestError::InvalidValidationFraction { fraction });
        }
        if let Some(n_classes) = c.n_classes
            && n_classes < 2
        {
            return Err(GcForestError::InvalidClassCount { n_classes });
        }
        if let DataStyle::Image { rows, cols } = c.data_style
            && (rows == 0 || cols == 0)
        {
            return Err(GcForestError::InvalidImageShape { rows, cols });
        }
        Ok(c)
    }
}

fn check_subset_strategy(stage: &'static str, strategy: MaxFeatures) -> Result<(), GcForestError> {
    let reason = match strategy {
        MaxFeatures::Fraction(f) if !(f > 0.0 && f <= 1.0) => "fraction must be in (0, 1]",
        MaxFeatures::Fixed(0) => "count must be at least 1",
        _ => return Ok(()),
    };
    Err(GcForestError::InvalidFeatureSubset {
        stage,
        strategy: format!("{strategy:?}"),
        reason: reason.to_string(),
    })
}

impl GcForestConfig {
    /// Start a builder populated with the defaults.
    #[must_use]
    pub fn builder() -> GcForestConfigBuilder {
        GcForestConfigBuilder::default()
    }

    /// Return a trainer that can take a validation set or cancellation token.
    #[must_use]
    pub fn trainer(&self) -> Trainer<'_> {
        Trainer::new(self)
    }

    /// Fit a deep forest with default trainer options.
    ///
    /// # Errors
    ///
    /// See [`Trainer::fit`].
    pub fn fit(&self, features: &[Vec<f64>], labels: &[usize]) -> Result<GcForestFit, GcForestError> {
        self.trainer().fit(features, labels)
    }

    // --- Unit specs ---

    /// RF then CRF spec for scan window `window_idx`.
    pub(crate) fn scan_unit_specs(&self, window_idx: usize) -> Vec<ForestUnitSpec> {
        [ForestKind::RandomForest, ForestKind::CompletelyRandom]
            .into_iter()
            .enumerate()
            .map(|(unit_idx, kind)| {
                self.unit_spec(
                    kind,
                    self.scan_forest_tree_num,
                    self.scan_min_instances_per_node,
                    derive_seed(self.seed, &[SCAN_STAGE, window_idx as u64, unit_idx as u64]),
                )
            })
            .collect()
    }

    /// `rf_num` RF specs followed by `crf_num` CRF specs for one-based `layer`.
    pub(crate) fn cascade_unit_specs(&self, layer: usize) -> Vec<ForestUnitSpec> {
        std::iter::repeat_n(ForestKind::RandomForest, self.rf_num)
            .chain(std::iter::repeat_n(ForestKind::CompletelyRandom, self.crf_num))
            .enumerate()
            .map(|(unit_idx, kind)| {
                self.unit_spec(
                    kind,
                    self.cascade_forest_tree_num,
                    self.cascade_min_instances_per_node,
                    derive_seed(self.seed, &[CASCADE_STAGE, layer as u64, unit_idx as u64]),
                )
            })
            .collect()
    }

    fn unit_spec(
        &self,
        kind: ForestKind,
        n_trees: usize,
        min_instances: usize,
        seed: u64,
    ) -> ForestUnitSpec {
        let strategy = match kind {
            ForestKind::RandomForest => self.feature_subset_strategy,
            ForestKind::CompletelyRandom => self.crf_feature_subset_strategy,
        };
        ForestUnitSpec::new(kind, n_trees)
            .with_max_depth(self.max_depth)
            .with_max_bins(self.max_bins)
            .with_min_instances_per_node(min_instances)
            .with_min_info_gain(self.min_info_gain)
            .with_feature_subset(strategy)
            .with_seed(seed)
    }

    // --- Getters ---

    /// Return the scan windows (empty when scanning is off).
    #[must_use]
    pub fn scan_windows(&self) -> &[WindowConfig] {
        &self.scan_windows
    }

    /// Return the scanning data style.
    #[must_use]
    pub fn data_style(&self) -> DataStyle {
        self.data_style
    }

    /// Return the number of random-forest units per layer.
    #[must_use]
    pub fn rf_num(&self) -> usize {
        self.rf_num
    }

    /// Return the number of completely-random-forest units per layer.
    #[must_use]
    pub fn crf_num(&self) -> usize {
        self.crf_num
    }

    /// Return the total number of units per layer.
    #[must_use]
    pub fn units_per_layer(&self) -> usize {
        self.rf_num + self.crf_num
    }

    /// Return the tree count of each scan forest.
    #[must_use]
    pub fn scan_forest_tree_num(&self) -> usize {
        self.scan_forest_tree_num
    }

    /// Return the tree count of each cascade unit.
    #[must_use]
    pub fn cascade_forest_tree_num(&self) -> usize {
        self.cascade_forest_tree_num
    }

    /// Return the maximum number of layers.
    #[must_use]
    pub fn max_iteration(&self) -> usize {
        self.max_iteration
    }

    /// Return the early-stopping patience.
    #[must_use]
    pub fn early_stopping_rounds(&self) -> usize {
        self.early_stopping_rounds
    }

    /// Return the maximum tree depth, if any.
    #[must_use]
    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Return the histogram bin count.
    #[must_use]
    pub fn max_bins(&self) -> usize {
        self.max_bins
    }

    /// Return the minimum per-sample impurity decrease.
    #[must_use]
    pub fn min_info_gain(&self) -> f64 {
        self.min_info_gain
    }

    /// Return the scan forests' minimum leaf size.
    #[must_use]
    pub fn scan_min_instances_per_node(&self) -> usize {
        self.scan_min_instances_per_node
    }

    /// Return the cascade forests' minimum leaf size.
    #[must_use]
    pub fn cascade_min_instances_per_node(&self) -> usize {
        self.cascade_min_instances_per_node
    }

    /// Return the random-forest feature subset strategy.
    #[must_use]
    pub fn feature_subset_strategy(&self) -> MaxFeatures {
        self.feature_subset_strategy
    }

    /// Return the completely-random-forest feature subset strategy.
    #[must_use]
    pub fn crf_feature_subset_strategy(&self) -> MaxFeatures {
        self.crf_feature_subset_strategy
    }

    /// Return the number of cross-validation folds.
    #[must_use]
    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    /// Return the held-out validation fraction, if any.
    #[must_use]
    pub fn validation_fraction(&self) -> Option<f64> {
        self.validation_fraction
    }

    /// Return the fixed class count, if set.
    #[must_use]
    pub fn n_classes(&self) -> Option<usize> {
        self.n_classes
    }

    /// Return the master random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }
}
