use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, instrument};

use crate::{
    RfError,
    histogram::FeatureBins,
    node::{Impurity, Node, NodeIndex},
    split::{NodeSamples, SplitCriterion, SplitMethod, find_split_with_bins},
};

/// Configuration for a single decision tree.
///
/// Construct via [`DecisionTreeConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter           | Default               |
/// |---------------------|-----------------------|
/// | `criterion`         | `Gini`                |
/// | `split_method`      | `Exact`               |
/// | `max_depth`         | `None` (unlimited)    |
/// | `min_samples_split` | 2                     |
/// | `min_samples_leaf`  | 1                     |
/// | `min_info_gain`     | 0.0                   |
/// | `max_features`      | `None` (all features) |
/// | `n_classes`         | `None` (max label + 1)|
/// | `seed`              | 42                    |
#[derive(Debug, Clone)]
pub struct DecisionTreeConfig {
    pub(crate) criterion: SplitCriterion,
    pub(crate) split_method: SplitMethod,
    pub(crate) max_depth: Option<usize>,
    pub(crate) min_samples_split: usize,
    pub(crate) min_samples_leaf: usize,
    pub(crate) min_info_gain: f64,
    pub(crate) max_features: Option<usize>,
    pub(crate) n_classes: Option<usize>,
    pub(crate) seed: u64,
}

impl DecisionTreeConfig {
    /// Create a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            criterion: SplitCriterion::Gini,
            split_method: SplitMethod::Exact,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            min_info_gain: 0.0,
            max_features: None,
            n_classes: None,
            seed: 42,
        }
    }

    /// Set the split quality criterion.
    #[must_use]
    pub fn with_criterion(mut self, criterion: SplitCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Set the split-finding strategy.
    #[must_use]
    pub fn with_split_method(mut self, split_method: SplitMethod) -> Self {
        self.split_method = split_method;
        self
    }

    /// Set the maximum tree depth (root is depth 0). `None` means unlimited.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the minimum number of samples required to attempt a split.
    #[must_use]
    pub fn with_min_samples_split(mut self, min_samples_split: usize) -> Self {
        self.min_samples_split = min_samples_split;
        self
    }

    /// Set the minimum number of samples required in each leaf after a split.
    #[must_use]
    pub fn with_min_samples_leaf(mut self, min_samples_leaf: usize) -> Self {
        self.min_samples_leaf = min_samples_leaf;
        self
    }

    /// Set the minimum per-sample impurity decrease for a split to be kept.
    #[must_use]
    pub fn with_min_info_gain(mut self, min_info_gain: f64) -> Self {
        self.min_info_gain = min_info_gain;
        self
    }

    /// Set the maximum number of features to consider at each split.
    #[must_use]
    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    /// Fix the class count so leaf distributions have a known length.
    #[must_use]
    pub fn with_n_classes(mut self, n_classes: Option<usize>) -> Self {
        self.n_classes = n_classes;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Train a tree on every row of a row-major dataset.
    ///
    /// # Errors
    ///
    /// See [`DecisionTreeConfig::fit_subset`].
    pub fn fit(&self, features: &[Vec<f64>], labels: &[usize]) -> Result<DecisionTree, RfError> {
        let rows: Vec<usize> = (0..features.len()).collect();
        self.fit_subset(features, labels, &rows)
    }

    /// Train a tree on the listed rows. Repeated indices (bootstrap draws) count
    /// once per occurrence.
    ///
    /// # Errors
    ///
    /// | Variant                             | When                                            |
    /// |-------------------------------------|-------------------------------------------------|
    /// | [`RfError::EmptyDataset`]           | `rows` is empty                                 |
    /// | [`RfError::LabelCountMismatch`]     | `labels.len() != features.len()`                |
    /// | [`RfError::RowOutOfBounds`]         | a row index is past the end of `features`       |
    /// | [`RfError::ZeroFeatures`]           | rows have zero feature columns                  |
    /// | [`RfError::FeatureCountMismatch`]   | rows have inconsistent lengths                  |
    /// | [`RfError::NonFiniteValue`]         | any value is NaN or infinite                    |
    /// | [`RfError::LabelOutOfRange`]        | a label is not below the class count            |
    /// | [`RfError::InvalidMaxFeatures`]     | `max_features` resolves outside [1, n_features] |
    /// | [`RfError::InvalidMaxDepth`]        | `max_depth` is `Some(0)`                        |
    /// | [`RfError::InvalidMinSamplesSplit`] | `min_samples_split` < 2                         |
    /// | [`RfError::InvalidMinSamplesLeaf`]  | `min_samples_leaf` < 1                          |
    /// | [`RfError::InvalidMinInfoGain`]     | `min_info_gain` negative or not finite          |
    /// | [`RfError::InvalidBinCount`]        | histogram splitting with fewer than 2 bins      |
    #[instrument(skip_all, fields(n_rows = rows.len()))]
    pub fn fit_subset(
        &self,
        features: &[Vec<f64>],
        labels: &[usize],
        rows: &[usize],
    ) -> Result<DecisionTree, RfError> {
        let n_features = validate_training_rows(features, labels, rows)?;
        self.validate()?;
        let n_classes = resolve_class_count(self.n_classes, labels, rows)?;

        let max_features = self.max_features.unwrap_or(n_features);
        if max_features == 0 || max_features > n_features {
            return Err(RfError::InvalidMaxFeatures {
                max_features,
                n_features,
            });
        }
        Ok(self.grow(features, labels, rows, n_features, n_classes, max_features))
    }

    /// Build the tree on already-validated rows.
    pub(crate) fn grow(
        &self,
        features: &[Vec<f64>],
        labels: &[usize],
        rows: &[usize],
        n_features: usize,
        n_classes: usize,
        max_features: usize,
    ) -> DecisionTree {
        // Gather the selected rows into column-major layout.
        let col_features: Vec<Vec<f64>> = (0..n_features)
            .map(|feat_idx| rows.iter().map(|&r| features[r][feat_idx]).collect())
            .collect();
        let local_labels: Vec<usize> = rows.iter().map(|&r| labels[r]).collect();

        let bins = match self.split_method {
            SplitMethod::Histogram { n_bins } => Some(FeatureBins::build(&col_features, n_bins)),
            _ => None,
        };

        let sample_indices: Vec<usize> = (0..rows.len()).collect();
        let mut builder = TreeBuilder {
            col_features: &col_features,
            labels: &local_labels,
            n_classes,
            config: self,
            max_features,
            bins: bins.as_ref(),
            rng: ChaCha8Rng::seed_from_u64(self.seed),
            arena: Vec::new(),
        };
        builder.build(&sample_indices, 0);

        debug!(n_nodes = builder.arena.len(), n_classes, "decision tree built");

        DecisionTree {
            nodes: builder.arena,
            n_features,
            n_classes,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), RfError> {
        if self.max_depth == Some(0) {
            return Err(RfError::InvalidMaxDepth { max_depth: 0 });
        }
        if self.min_samples_split < 2 {
            return Err(RfError::InvalidMinSamplesSplit {
                min_samples_split: self.min_samples_split,
            });
        }
        if self.min_samples_leaf < 1 {
            return Err(RfError::InvalidMinSamplesLeaf {
                min_samples_leaf: self.min_samples_leaf,
            });
        }
        if !self.min_info_gain.is_finite() || self.min_info_gain < 0.0 {
            return Err(RfError::InvalidMinInfoGain {
                min_info_gain: self.min_info_gain,
            });
        }
        if let SplitMethod::Histogram { n_bins } = self.split_method
            && n_bins < 2
        {
            return Err(RfError::InvalidBinCount { n_bins });
        }
        Ok(())
    }
}

impl Default for DecisionTreeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Check a training subset and return its feature width.
pub(crate) fn validate_training_rows(
    features: &[Vec<f64>],
    labels: &[usize],
    rows: &[usize],
) -> Result<usize, RfError> {
    if labels.len() != features.len() {
        return Err(RfError::LabelCountMismatch {
            n_rows: features.len(),
            n_labels: labels.len(),
        });
    }
    if rows.is_empty() {
        return Err(RfError::EmptyDataset);
    }
    if let Some(&row) = rows.iter().find(|&&r| r >= features.len()) {
        return Err(RfError::RowOutOfBounds {
            row,
            n_rows: features.len(),
        });
    }

    let n_features = features[rows[0]].len();
    if n_features == 0 {
        return Err(RfError::ZeroFeatures);
    }
    for &sample_index in rows {
        let row = &features[sample_index];
        if row.len() != n_features {
            return Err(RfError::FeatureCountMismatch {
                expected: n_features,
                got: row.len(),
                sample_index,
            });
        }
        if let Some(feature_index) = row.iter().position(|v| !v.is_finite()) {
            return Err(RfError::NonFiniteValue {
                sample_index,
                feature_index,
            });
        }
    }
    Ok(n_features)
}

/// Use the fixed class count when given, else the largest label in `rows` plus one.
pub(crate) fn resolve_class_count(
    fixed: Option<usize>,
    labels: &[usize],
    rows: &[usize],
) -> Result<usize, RfError> {
    let n_classes = match fixed {
        Some(0) => return Err(RfError::InvalidClassCount { n_classes: 0 }),
        Some(n) => n,
        None => rows.iter().map(|&r| labels[r]).max().unwrap_or(0) + 1,
    };
    if let Some(&sample_index) = rows.iter().find(|&&r| labels[r] >= n_classes) {
        return Err(RfError::LabelOutOfRange {
            label: labels[sample_index],
            n_classes,
            sample_index,
        });
    }
    Ok(n_classes)
}

/// Recursive arena builder for one tree.
struct TreeBuilder<'a> {
    col_features: &'a [Vec<f64>],
    labels: &'a [usize],
    n_classes: usize,
    config: &'a DecisionTreeConfig,
    max_features: usize,
    bins: Option<&'a FeatureBins>,
    rng: ChaCha8Rng,
    arena: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn push_leaf(&mut self, class_counts: &[usize], impurity: Impurity, n_samples: usize) -> NodeIndex {
        let total = n_samples as f64;
        let distribution = class_counts.iter().map(|&c| c as f64 / total).collect();
        self.arena.push(Node::Leaf {
            distribution,
            impurity,
            n_samples,
        });
        NodeIndex::new(self.arena.len() - 1)
    }

    fn build(&mut self, sample_indices: &[usize], depth: usize) -> NodeIndex {
        let n_samples = sample_indices.len();
        let node = NodeSamples {
            col_features: self.col_features,
            labels: self.labels,
            sample_indices,
            n_classes: self.n_classes,
            criterion: self.config.criterion,
        };
        let class_counts = node.class_counts();
        let impurity = self.config.criterion.impurity(&class_counts, n_samples);

        let depth_exceeded = self.config.max_depth.is_some_and(|max_d| depth >= max_d);
        if n_samples < self.config.min_samples_split || impurity.value() == 0.0 || depth_exceeded {
            return self.push_leaf(&class_counts, impurity, n_samples);
        }

        let split = find_split_with_bins(
            &node,
            self.config.split_method,
            self.bins,
            self.max_features,
            self.config.min_samples_leaf,
            &mut self.rng,
        );
        let min_gain = self.config.min_info_gain;
        let split = match split {
            Some(s) if min_gain == 0.0 || s.impurity_decrease / n_samples as f64 >= min_gain => s,
            _ => return self.push_leaf(&class_counts, impurity, n_samples),
        };

        // Reserve the slot so children get higher indices, then overwrite.
        let node_idx = self.arena.len();
        self.arena.push(Node::Leaf {
            distribution: Vec::new(),
            impurity,
            n_samples,
        });

        let left = self.build(&split.left_indices, depth + 1);
        let right = self.build(&split.right_indices, depth + 1);

        self.arena[node_idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
            impurity,
            n_samples,
            impurity_decrease: split.impurity_decrease,
        };
        NodeIndex::new(node_idx)
    }
}

/// A fitted decision tree stored as a `Vec<Node>` arena rooted at index 0.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DecisionTree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) n_features: usize,
    pub(crate) n_classes: usize,
}

impl DecisionTree {
    /// Predict the class label (argmax of the leaf distribution) for one sample.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] when `sample.len() != n_features`.
    pub fn predict(&self, sample: &[f64]) -> Result<usize, RfError> {
        let proba = self.predict_proba(sample)?;
        Ok(proba
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(idx, _)| idx)
            .unwrap_or(0))
    }

    /// Return the class distribution of the leaf reached by `sample`.
    ///
    /// The slice has length `n_classes` and sums to 1.0.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] when `sample.len() != n_features`.
    pub fn predict_proba(&self, sample: &[f64]) -> Result<&[f64], RfError> {
        if sample.len() != self.n_features {
            return Err(RfError::PredictionFeatureMismatch {
                expected: self.n_features,
                got: sample.len(),
            });
        }
        Ok(self.leaf_distribution(sample))
    }

    /// Leaf distribution without the width check.
    pub(crate) fn leaf_distribution(&self, sample: &[f64]) -> &[f64] {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { distribution, .. } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    idx = if sample[feature.index()] <= *threshold {
                        left.index()
                    } else {
                        right.index()
                    };
                }
            }
        }
    }

    /// Return the total number of nodes in the tree.
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Return the number of leaf nodes.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Return the number of classes in every leaf distribution.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Return the maximum depth of the tree (a lone root leaf has depth 0).
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut max_depth = 0usize;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((node_idx, d)) = stack.pop() {
            match &self.nodes[node_idx] {
                Node::Leaf { .. } => max_depth = max_depth.max(d),
                Node::Split { left, right, .. } => {
                    stack.push((left.index(), d + 1));
                    stack.push((right.index(), d + 1));
                }
            }
        }
        max_depth
    }
}
