//! Configuration builder for forest training.

use std::str::FromStr;

use crate::error::RfError;
use crate::forest::RandomForest;
use crate::split::{SplitCriterion, SplitMethod};

/// Strategy for determining the number of features to consider at each split.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum MaxFeatures {
    /// Square root of total features.
    Sqrt,
    /// Log base 2 of total features.
    Log2,
    /// A fraction of total features (must be in (0.0, 1.0]).
    Fraction(f64),
    /// A fixed count.
    Fixed(usize),
    /// All features (no subsampling).
    All,
}

impl MaxFeatures {
    /// Resolve the strategy to a concrete feature count for `n_features` columns.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidMaxFeatures`] when the count falls outside
    /// `[1, n_features]`.
    pub fn resolve(self, n_features: usize) -> Result<usize, RfError> {
        let resolved = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().ceil() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().ceil().max(1.0) as usize,
            MaxFeatures::Fraction(f) => (n_features as f64 * f).ceil() as usize,
            MaxFeatures::Fixed(n) => n,
            MaxFeatures::All => n_features,
        };
        if resolved == 0 || resolved > n_features {
            return Err(RfError::InvalidMaxFeatures {
                max_features: resolved,
                n_features,
            });
        }
        Ok(resolved)
    }
}

impl FromStr for MaxFeatures {
    type Err = RfError;

    /// Parse `auto`, `sqrt`, `log2`, `onethird`, `all`, a fraction such as
    /// `0.25`, or a whole count such as `4`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || RfError::UnknownMaxFeatures { raw: s.to_string() };
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "sqrt" => Ok(MaxFeatures::Sqrt),
            "log2" => Ok(MaxFeatures::Log2),
            "onethird" => Ok(MaxFeatures::Fraction(1.0 / 3.0)),
            "all" => Ok(MaxFeatures::All),
            other => {
                if let Ok(n) = other.parse::<usize>() {
                    return Ok(MaxFeatures::Fixed(n));
                }
                let f: f64 = other.parse().map_err(|_| unknown())?;
                if f > 0.0 && f <= 1.0 {
                    Ok(MaxFeatures::Fraction(f))
                } else {
                    Err(unknown())
                }
            }
        }
    }
}

/// How each tree draws its training rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SamplingMode {
    /// Draw `n` rows with replacement.
    Bootstrap,
    /// Every tree sees every row once.
    FullSample,
}

/// Configuration for forest training.
///
/// Construct via [`RandomForestConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter           | Default      |
/// |---------------------|--------------|
/// | `max_features`      | `Sqrt`       |
/// | `max_depth`         | `None`       |
/// | `min_samples_split` | 2            |
/// | `min_samples_leaf`  | 1            |
/// | `min_info_gain`     | 0.0          |
/// | `criterion`         | `Gini`       |
/// | `split_method`      | `Exact`      |
/// | `sampling`          | `Bootstrap`  |
/// | `n_classes`         | `None`       |
/// | `seed`              | 42           |
#[derive(Debug, Clone)]
pub struct RandomForestConfig {
    pub(crate) n_trees: usize,
    pub(crate) max_features: MaxFeatures,
    pub(crate) max_depth: Option<usize>,
    pub(crate) min_samples_split: usize,
    pub(crate) min_samples_leaf: usize,
    pub(crate) min_info_gain: f64,
    pub(crate) criterion: SplitCriterion,
    pub(crate) split_method: SplitMethod,
    pub(crate) sampling: SamplingMode,
    pub(crate) n_classes: Option<usize>,
    pub(crate) seed: u64,
}

impl RandomForestConfig {
    /// Create a new config with the given number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn new(n_trees: usize) -> Result<Self, RfError> {
        if n_trees == 0 {
            return Err(RfError::InvalidTreeCount { n_trees });
        }
        Ok(Self {
            n_trees,
            max_features: MaxFeatures::Sqrt,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            min_info_gain: 0.0,
            criterion: SplitCriterion::Gini,
            split_method: SplitMethod::Exact,
            sampling: SamplingMode::Bootstrap,
            n_classes: None,
            seed: 42,
        })
    }

    // --- Setters ---

    /// Set the max features strategy.
    #[must_use]
    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    /// Set the maximum tree depth. `None` means unlimited.
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

    /// Set the minimum per-sample impurity decrease a split must achieve.
    #[must_use]
    pub fn with_min_info_gain(mut self, min_info_gain: f64) -> Self {
        self.min_info_gain = min_info_gain;
        self
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

    /// Set how each tree samples its training rows.
    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingMode) -> Self {
        self.sampling = sampling;
        self
    }

    /// Fix the number of classes. `None` derives it from the largest label seen.
    ///
    /// Fixing it keeps probability vectors the same length when a training
    /// subset happens to miss the highest classes.
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

    // --- Getters ---

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    /// Return the max features strategy.
    #[must_use]
    pub fn max_features(&self) -> MaxFeatures {
        self.max_features
    }

    /// Return the maximum depth limit, if any.
    #[must_use]
    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Return the minimum samples required in each leaf.
    #[must_use]
    pub fn min_samples_leaf(&self) -> usize {
        self.min_samples_leaf
    }

    /// Return the minimum per-sample impurity decrease.
    #[must_use]
    pub fn min_info_gain(&self) -> f64 {
        self.min_info_gain
    }

    /// Return the split-finding strategy.
    #[must_use]
    pub fn split_method(&self) -> SplitMethod {
        self.split_method
    }

    /// Return the row sampling mode.
    #[must_use]
    pub fn sampling(&self) -> SamplingMode {
        self.sampling
    }

    /// Return the fixed class count, if set.
    #[must_use]
    pub fn n_classes(&self) -> Option<usize> {
        self.n_classes
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Train a forest on every row of the provided dataset.
    ///
    /// `features[sample_idx][feature_idx]` is row-major; `labels[sample_idx]`
    /// holds zero-based class labels.
    ///
    /// # Errors
    ///
    /// See [`RandomForestConfig::fit_subset`].
    pub fn fit(&self, features: &[Vec<f64>], labels: &[usize]) -> Result<RandomForest, RfError> {
        let rows: Vec<usize> = (0..features.len()).collect();
        self.fit_subset(features, labels, &rows)
    }

    /// Train a forest on the rows listed in `rows` without copying the dataset.
    ///
    /// # Errors
    ///
    /// | Variant                               | When                                              |
    /// |---------------------------------------|---------------------------------------------------|
    /// | [`RfError::EmptyDataset`]             | `rows` is empty                                   |
    /// | [`RfError::LabelCountMismatch`]       | `labels.len() != features.len()`                  |
    /// | [`RfError::RowOutOfBounds`]           | a row index is past the end of `features`         |
    /// | [`RfError::ZeroFeatures`]             | rows have zero feature columns                    |
    /// | [`RfError::FeatureCountMismatch`]     | rows have inconsistent lengths                    |
    /// | [`RfError::NonFiniteValue`]           | any value is NaN or infinite                      |
    /// | [`RfError::LabelOutOfRange`]          | a label is not below the fixed class count        |
    /// | [`RfError::InvalidMaxFeatures`]       | resolved max_features is outside [1, n_features]  |
    /// | [`RfError::InvalidMinInfoGain`]       | min_info_gain is negative or not finite           |
    pub fn fit_subset(
        &self,
        features: &[Vec<f64>],
        labels: &[usize],
        rows: &[usize],
    ) -> Result<RandomForest, RfError> {
        crate::forest::train(self, features, labels, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_strategies() {
        assert_eq!(MaxFeatures::Sqrt.resolve(16).unwrap(), 4);
        assert_eq!(MaxFeatures::Log2.resolve(16).unwrap(), 4);
        assert_eq!(MaxFeatures::Fraction(0.5).resolve(10).unwrap(), 5);
        assert_eq!(MaxFeatures::All.resolve(7).unwrap(), 7);
        assert_eq!(MaxFeatures::Fixed(1).resolve(7).unwrap(), 1);
    }

    #[test]
    fn resolve_rejects_out_of_range() {
        let err = MaxFeatures::Fixed(9).resolve(3).unwrap_err();
        assert!(matches!(
            err,
            RfError::InvalidMaxFeatures { max_features: 9, n_features: 3 }
        ));
    }

    #[test]
    fn parse_named_strategies() {
        assert_eq!("sqrt".parse::<MaxFeatures>().unwrap(), MaxFeatures::Sqrt);
        assert_eq!("auto".parse::<MaxFeatures>().unwrap(), MaxFeatures::Sqrt);
        assert_eq!("LOG2".parse::<MaxFeatures>().unwrap(), MaxFeatures::Log2);
        assert_eq!("all".parse::<MaxFeatures>().unwrap(), MaxFeatures::All);
        assert_eq!(
            "onethird".parse::<MaxFeatures>().unwrap(),
            MaxFeatures::Fraction(1.0 / 3.0)
        );
    }

    #[test]
    fn parse_numeric_strategies() {
        assert_eq!("3".parse::<MaxFeatures>().unwrap(), MaxFeatures::Fixed(3));
        assert_eq!("0.25".parse::<MaxFeatures>().unwrap(), MaxFeatures::Fraction(0.25));
        assert!("1.5".parse::<MaxFeatures>().is_err());
        assert!("half".parse::<MaxFeatures>().is_err());
    }

    #[test]
    fn invalid_tree_count() {
        assert!(matches!(
            RandomForestConfig::new(0).unwrap_err(),
            RfError::InvalidTreeCount { n_trees: 0 }
        ));
    }
}
