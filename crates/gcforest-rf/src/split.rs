use rand::Rng;

use crate::histogram::{FeatureBins, find_histogram_split};
use crate::node::{FeatureIndex, Impurity};

/// Criterion for measuring the quality of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SplitCriterion {
    /// Gini impurity: 1 - Σ(p_i²)
    Gini,
    /// Information entropy: -Σ(p_i · ln(p_i))
    Entropy,
}

impl SplitCriterion {
    /// Compute the impurity of a node from its class counts.
    ///
    /// Returns [`Impurity::new(0.0)`] when `n_samples` is zero.
    #[must_use]
    pub fn impurity(&self, class_counts: &[usize], n_samples: usize) -> Impurity {
        if n_samples == 0 {
            return Impurity::new(0.0);
        }
        let n = n_samples as f64;
        let value = match self {
            SplitCriterion::Gini => {
                let sum_sq: f64 = class_counts
                    .iter()
                    .map(|&c| {
                        let p = c as f64 / n;
                        p * p
                    })
                    .sum();
                1.0 - sum_sq
            }
            SplitCriterion::Entropy => {
                -class_counts
                    .iter()
                    .filter(|&&c| c > 0)
                    .map(|&c| {
                        let p = c as f64 / n;
                        p * p.ln()
                    })
                    .sum::<f64>()
            }
        };
        Impurity::new(value)
    }
}

/// How split candidates are generated at each node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SplitMethod {
    /// Sort every candidate feature and scan all midpoints (CART).
    Exact,
    /// Quantile-binned features, scanning bin boundaries only.
    Histogram {
        /// Number of quantile bins per feature.
        n_bins: usize,
    },
    /// One uniform random threshold per candidate feature, best candidate wins.
    ExtraTrees,
    /// First non-constant feature in random order with a uniform random
    /// threshold. Labels play no part in choosing the split.
    CompletelyRandom,
}

/// Result of finding the split for a node.
#[derive(Debug, Clone)]
pub(crate) struct SplitResult {
    /// Feature used for the split.
    pub(crate) feature: FeatureIndex,
    /// Threshold value: samples with feature <= threshold go left.
    pub(crate) threshold: f64,
    /// Weighted impurity decrease from this split (MDI formula).
    pub(crate) impurity_decrease: f64,
    /// Sample indices going to the left child.
    pub(crate) left_indices: Vec<usize>,
    /// Sample indices going to the right child.
    pub(crate) right_indices: Vec<usize>,
}

/// Node-level context shared by every split finder.
pub(crate) struct NodeSamples<'a> {
    pub(crate) col_features: &'a [Vec<f64>],
    pub(crate) labels: &'a [usize],
    pub(crate) sample_indices: &'a [usize],
    pub(crate) n_classes: usize,
    pub(crate) criterion: SplitCriterion,
}

impl NodeSamples<'_> {
    pub(crate) fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_classes];
        for &si in self.sample_indices {
            counts[self.labels[si]] += 1;
        }
        counts
    }

    /// MDI decrease of a candidate split given the left/right class counts.
    pub(crate) fn decrease(
        &self,
        parent: Impurity,
        left_counts: &[usize],
        n_left: usize,
        right_counts: &[usize],
        n_right: usize,
    ) -> f64 {
        let n_samples = self.sample_indices.len();
        let left = self.criterion.impurity(left_counts, n_left);
        let right = self.criterion.impurity(right_counts, n_right);
        (n_samples as f64) * parent.value()
            - (n_left as f64) * left.value()
            - (n_right as f64) * right.value()
    }

    /// Partition the node's samples by `feature <= threshold`.
    pub(crate) fn partition(&self, feature: FeatureIndex, threshold: f64) -> (Vec<usize>, Vec<usize>) {
        let col = &self.col_features[feature.index()];
        let half = self.sample_indices.len() / 2;
        let mut left = Vec::with_capacity(half);
        let mut right = Vec::with_capacity(half);
        for &si in self.sample_indices {
            if col[si] <= threshold {
                left.push(si);
            } else {
                right.push(si);
            }
        }
        (left, right)
    }

    /// Class counts on each side of `feature <= threshold`.
    fn side_counts(&self, feature: usize, threshold: f64) -> (Vec<usize>, usize, Vec<usize>, usize) {
        let col = &self.col_features[feature];
        let mut left = vec![0usize; self.n_classes];
        let mut right = vec![0usize; self.n_classes];
        let mut n_left = 0usize;
        for &si in self.sample_indices {
            if col[si] <= threshold {
                left[self.labels[si]] += 1;
                n_left += 1;
            } else {
                right[self.labels[si]] += 1;
            }
        }
        let n_right = self.sample_indices.len() - n_left;
        (left, n_left, right, n_right)
    }

    fn value_range(&self, feature: usize) -> (f64, f64) {
        let col = &self.col_features[feature];
        self.sample_indices
            .iter()
            .map(|&si| col[si])
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            })
    }

    fn finish(&self, feature: FeatureIndex, threshold: f64, impurity_decrease: f64) -> SplitResult {
        let (left_indices, right_indices) = self.partition(feature, threshold);
        SplitResult {
            feature,
            threshold,
            impurity_decrease,
            left_indices,
            right_indices,
        }
    }
}

/// Shuffle the first `take` positions of `0..n_features` (partial Fisher-Yates).
pub(crate) fn sample_features(n_features: usize, take: usize, rng: &mut impl Rng) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n_features).collect();
    let take = take.min(n_features);
    for i in 0..take {
        let j = rng.gen_range(i..n_features);
        order.swap(i, j);
    }
    order.truncate(take);
    order
}

/// Dispatch to the configured split finder.
///
/// `bins` must be `Some` when `method` is [`SplitMethod::Histogram`].
pub(crate) fn find_split_with_bins(
    node: &NodeSamples<'_>,
    method: SplitMethod,
    bins: Option<&FeatureBins>,
    max_features: usize,
    min_samples_leaf: usize,
    rng: &mut impl Rng,
) -> Option<SplitResult> {
    if node.sample_indices.is_empty() || node.col_features.is_empty() {
        return None;
    }
    match (method, bins) {
        (SplitMethod::Histogram { .. }, Some(bins)) => {
            find_histogram_split(node, bins, max_features, min_samples_leaf, rng)
        }
        (SplitMethod::ExtraTrees, _) => {
            find_extra_trees_split(node, max_features, min_samples_leaf, rng)
        }
        (SplitMethod::CompletelyRandom, _) => {
            find_completely_random_split(node, max_features, min_samples_leaf, rng)
        }
        _ => find_best_split(node, max_features, min_samples_leaf, rng),
    }
}

/// Find the best split among a random subset of features.
///
/// For each of `max_features` randomly chosen features, sorts the
/// `(value, sample)` pairs and scans left-to-right with incremental
/// class count updates. Returns `None` when no valid split exists
/// (all values identical, or every boundary violates `min_samples_leaf`).
pub(crate) fn find_best_split(
    node: &NodeSamples<'_>,
    max_features: usize,
    min_samples_leaf: usize,
    rng: &mut impl Rng,
) -> Option<SplitResult> {
    let n_samples = node.sample_indices.len();
    let parent_counts = node.class_counts();
    let parent_impurity = node.criterion.impurity(&parent_counts, n_samples);

    let mut best_decrease = f64::NEG_INFINITY;
    let mut best: Option<(FeatureIndex, f64)> = None;

    for feat_idx in sample_features(node.col_features.len(), max_features, rng) {
        let feat_col = &node.col_features[feat_idx];

        let mut sorted: Vec<(f64, usize)> = node
            .sample_indices
            .iter()
            .map(|&si| (feat_col[si], si))
            .collect();
        sorted.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_counts = vec![0usize; node.n_classes];
        let mut right_counts = parent_counts.clone();

        for i in 0..(n_samples - 1) {
            let (val_i, si) = sorted[i];
            let class_i = node.labels[si];
            left_counts[class_i] += 1;
            right_counts[class_i] -= 1;

            let n_left = i + 1;
            let n_right = n_samples - n_left;

            let val_next = sorted[i + 1].0;
            if val_i == val_next {
                continue;
            }
            if n_left < min_samples_leaf || n_right < min_samples_leaf {
                continue;
            }

            let decrease =
                node.decrease(parent_impurity, &left_counts, n_left, &right_counts, n_right);
            if decrease > best_decrease {
                best_decrease = decrease;
                best = Some((FeatureIndex::new(feat_idx), (val_i + val_next) / 2.0));
            }
        }
    }

    let (feature, threshold) = best?;
    Some(node.finish(feature, threshold, best_decrease))
}

/// Extremely randomized split: one uniform threshold per candidate feature,
/// keeping the candidate with the largest impurity decrease.
pub(crate) fn find_extra_trees_split(
    node: &NodeSamples<'_>,
    max_features: usize,
    min_samples_leaf: usize,
    rng: &mut impl Rng,
) -> Option<SplitResult> {
    let parent_counts = node.class_counts();
    let parent_impurity = node
        .criterion
        .impurity(&parent_counts, node.sample_indices.len());

    let mut best_decrease = f64::NEG_INFINITY;
    let mut best: Option<(FeatureIndex, f64)> = None;

    for feat_idx in sample_features(node.col_features.len(), max_features, rng) {
        let (lo, hi) = node.value_range(feat_idx);
        if lo >= hi {
            continue;
        }
        let threshold = rng.gen_range(lo..hi);
        let (left, n_left, right, n_right) = node.side_counts(feat_idx, threshold);
        if n_left < min_samples_leaf || n_right < min_samples_leaf {
            continue;
        }
        let decrease = node.decrease(parent_impurity, &left, n_left, &right, n_right);
        if decrease > best_decrease {
            best_decrease = decrease;
            best = Some((FeatureIndex::new(feat_idx), threshold));
        }
    }

    let (feature, threshold) = best?;
    Some(node.finish(feature, threshold, best_decrease))
}

/// Completely random split: walk up to `max_features` features in random
/// order and split the first non-constant one at a uniform random threshold.
///
/// The impurity decrease is still recorded on the node, but it never
/// influences which feature or threshold is chosen.
pub(crate) fn find_completely_random_split(
    node: &NodeSamples<'_>,
    max_features: usize,
    min_samples_leaf: usize,
    rng: &mut impl Rng,
) -> Option<SplitResult> {
    for feat_idx in sample_features(node.col_features.len(), max_features, rng) {
        let (lo, hi) = node.value_range(feat_idx);
        if lo >= hi {
            continue;
        }
        let threshold = rng.gen_range(lo..hi);
        let (left, n_left, right, n_right) = node.side_counts(feat_idx, threshold);
        if n_left < min_samples_leaf || n_right < min_samples_leaf {
            continue;
        }
        let parent_counts = node.class_counts();
        let parent_impurity = node
            .criterion
            .impurity(&parent_counts, node.sample_indices.len());
        let decrease = node.decrease(parent_impurity, &left, n_left, &right, n_right);
        return Some(node.finish(FeatureIndex::new(feat_idx), threshold, decrease));
    }
    None
}
