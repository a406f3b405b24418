//! Forest units: one random or completely-random forest behind a
//! `fit` / `predict_proba` contract.

use gcforest_rf::{MaxFeatures, RandomForest, RandomForestConfig, SamplingMode, SplitMethod};

use crate::error::GcForestError;
use crate::folds::distinct_count;

/// Which forest flavour a unit trains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ForestKind {
    /// Bootstrap-sampled trees with label-driven histogram splits.
    RandomForest,
    /// Trees whose split feature and threshold are drawn at random.
    CompletelyRandom,
}

impl ForestKind {
    /// `true` when split choice ignores labels.
    #[must_use]
    pub fn randomized(self) -> bool {
        matches!(self, ForestKind::CompletelyRandom)
    }

    /// Short name used in logs and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ForestKind::RandomForest => "rf",
            ForestKind::CompletelyRandom => "crf",
        }
    }
}

/// Untrained unit: forest kind plus tree-trainer parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ForestUnitSpec {
    kind: ForestKind,
    n_trees: usize,
    max_depth: Option<usize>,
    max_bins: usize,
    min_instances_per_node: usize,
    min_info_gain: f64,
    feature_subset: MaxFeatures,
    seed: u64,
}

impl ForestUnitSpec {
    /// Create a spec with `n_trees` trees and trainer defaults.
    #[must_use]
    pub fn new(kind: ForestKind, n_trees: usize) -> Self {
        Self {
            kind,
            n_trees,
            max_depth: None,
            max_bins: 32,
            min_instances_per_node: 1,
            min_info_gain: 0.0,
            feature_subset: match kind {
                ForestKind::RandomForest => MaxFeatures::Sqrt,
                ForestKind::CompletelyRandom => MaxFeatures::All,
            },
            seed: 42,
        }
    }

    /// Set the maximum tree depth.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the histogram bin count (random forests only).
    #[must_use]
    pub fn with_max_bins(mut self, max_bins: usize) -> Self {
        self.max_bins = max_bins;
        self
    }

    /// Set the minimum number of samples per leaf.
    #[must_use]
    pub fn with_min_instances_per_node(mut self, min_instances: usize) -> Self {
        self.min_instances_per_node = min_instances;
        self
    }

    /// Set the minimum per-sample impurity decrease for a split.
    #[must_use]
    pub fn with_min_info_gain(mut self, min_info_gain: f64) -> Self {
        self.min_info_gain = min_info_gain;
        self
    }

    /// Set the per-split feature subset strategy.
    #[must_use]
    pub fn with_feature_subset(mut self, feature_subset: MaxFeatures) -> Self {
        self.feature_subset = feature_subset;
        self
    }

    /// Set the trainer seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Return the forest kind.
    #[must_use]
    pub fn kind(&self) -> ForestKind {
        self.kind
    }

    /// Return the tree count.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    /// Return the feature subset strategy.
    #[must_use]
    pub fn feature_subset(&self) -> MaxFeatures {
        self.feature_subset
    }

    /// Return the trainer seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Same spec with another seed, for sibling fold models.
    #[must_use]
    pub(crate) fn reseeded(&self, seed: u64) -> Self {
        self.clone().with_seed(seed)
    }

    /// Translate into the tree-ensemble trainer's configuration.
    fn trainer_config(&self, n_classes: usize) -> Result<RandomForestConfig, GcForestError> {
        let (split_method, sampling) = match self.kind {
            ForestKind::RandomForest => (
                SplitMethod::Histogram {
                    n_bins: self.max_bins,
                },
                SamplingMode::Bootstrap,
            ),
            ForestKind::CompletelyRandom => (SplitMethod::CompletelyRandom, SamplingMode::FullSample),
        };
        Ok(RandomForestConfig::new(self.n_trees)?
            .with_max_features(self.feature_subset)
            .with_max_depth(self.max_depth)
            .with_min_samples_leaf(self.min_instances_per_node)
            .with_min_samples_split((2 * self.min_instances_per_node).max(2))
            .with_min_info_gain(self.min_info_gain)
            .with_split_method(split_method)
            .with_sampling(sampling)
            .with_n_classes(Some(n_classes))
            .with_seed(self.seed))
    }

    /// Train the unit on the listed rows of `features`.
    ///
    /// # Errors
    ///
    /// | Variant                                     | When                                  |
    /// |---------------------------------------------|---------------------------------------|
    /// | [`GcForestError::DegenerateTrainingSet`]    | `rows` is empty or holds one class    |
    /// | [`GcForestError::Forest`]                   | the tree trainer rejects the data     |
    pub fn fit(
        &self,
        features: &[Vec<f64>],
        labels: &[usize],
        rows: &[usize],
        n_classes: usize,
    ) -> Result<ForestUnit, GcForestError> {
        let n_distinct = distinct_count(rows.iter().map(|&r| labels[r]));
        if n_distinct < 2 {
            return Err(GcForestError::DegenerateTrainingSet {
                stage: format!("{} unit", self.kind.as_str()),
                n_rows: rows.len(),
                n_distinct,
            });
        }
        let forest = self
            .trainer_config(n_classes)?
            .fit_subset(features, labels, rows)?;
        Ok(ForestUnit {
            kind: self.kind,
            n_features: forest.n_features(),
            forest,
        })
    }
}

/// A trained, immutable forest unit.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ForestUnit {
    kind: ForestKind,
    n_features: usize,
    forest: RandomForest,
}

impl ForestUnit {
    /// Class probabilities for every row.
    ///
    /// # Errors
    ///
    /// Returns [`GcForestError::FeatureWidthMismatch`] when a row's width
    /// differs from the training width.
    pub fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, GcForestError> {
        let positions: Vec<usize> = (0..rows.len()).collect();
        self.predict_proba_rows(rows, &positions)
    }

    /// Class probabilities for the listed rows of `features`, in `positions` order.
    ///
    /// # Errors
    ///
    /// Returns [`GcForestError::FeatureWidthMismatch`] when a row's width
    /// differs from the training width.
    pub fn predict_proba_rows(
        &self,
        features: &[Vec<f64>],
        positions: &[usize],
    ) -> Result<Vec<Vec<f64>>, GcForestError> {
        if let Some(&sample_index) = positions
            .iter()
            .find(|&&p| features[p].len() != self.n_features)
        {
            return Err(GcForestError::FeatureWidthMismatch {
                expected: self.n_features,
                got: features[sample_index].len(),
                sample_index,
            });
        }
        Ok(self.forest.predict_proba_rows(features, positions)?)
    }

    /// Return the forest kind.
    #[must_use]
    pub fn kind(&self) -> ForestKind {
        self.kind
    }

    /// Return the training feature width.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Return the number of classes in every probability vector.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.forest.n_classes()
    }

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.forest.n_trees()
    }
}
