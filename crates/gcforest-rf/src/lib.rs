//! Decision-tree forests for the cascade: train, predict.
//!
//! Provides hand-rolled CART trees with Gini/Entropy criteria and four split
//! strategies (exact, histogram, extra-trees, completely random), bagged into
//! forests trained in parallel via rayon. Forests can be fitted on a row
//! subset of a shared dataset, which is how cross-validation folds avoid
//! copying feature rows.

mod config;
mod error;
mod forest;
mod histogram;
mod node;
mod predict;
mod split;
mod tree;

pub use config::{MaxFeatures, RandomForestConfig, SamplingMode};
pub use error::RfError;
pub use forest::RandomForest;
pub use node::{FeatureIndex, Impurity, Node, NodeIndex};
pub use predict::ClassDistribution;
pub use split::{SplitCriterion, SplitMethod};
pub use tree::{DecisionTree, DecisionTreeConfig};
