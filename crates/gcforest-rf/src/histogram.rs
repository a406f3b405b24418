//! Histogram-based splitting.
//!
//! Quantile bin edges are computed once per tree; each node then bins its
//! samples in O(n) and scans O(B) boundaries instead of sorting.

use rand::Rng;

use crate::node::FeatureIndex;
use crate::split::{NodeSamples, SplitResult, sample_features};

/// Pre-computed quantile bin edges for all features.
#[derive(Debug, Clone)]
pub(crate) struct FeatureBins {
    /// `edges[feat_idx]` is strictly increasing with at most `n_bins - 1` entries.
    /// Values <= `edges[0]` land in bin 0, values in `(edges[i-1], edges[i]]` in bin i.
    edges: Vec<Vec<f64>>,
}

impl FeatureBins {
    /// Build quantile bin edges from column-major features.
    ///
    /// Constant features get no edges and are never split on.
    pub(crate) fn build(col_features: &[Vec<f64>], n_bins: usize) -> Self {
        let edges = col_features
            .iter()
            .map(|col| {
                if col.is_empty() {
                    return Vec::new();
                }
                let mut sorted = col.clone();
                sorted.sort_unstable_by(|a, b| a.total_cmp(b));
                let n = sorted.len();
                let (min, max) = (sorted[0], sorted[n - 1]);
                if min == max {
                    return Vec::new();
                }

                let mut raw: Vec<f64> = (1..n_bins)
                    .map(|k| {
                        let pos = (k as f64 / n_bins as f64) * (n - 1) as f64;
                        let lo = pos.floor() as usize;
                        let hi = (lo + 1).min(n - 1);
                        let frac = pos - lo as f64;
                        sorted[lo] + frac * (sorted[hi] - sorted[lo])
                    })
                    .collect();
                raw.dedup_by(|a, b| *a == *b);
                // An edge at the max would send everything left.
                raw.retain(|&e| e >= min && e < max);
                raw
            })
            .collect();

        Self { edges }
    }

    /// Bin index of `value` for feature `feat_idx`, in `[0, edges.len()]`.
    pub(crate) fn bin_index(&self, feat_idx: usize, value: f64) -> usize {
        self.edges[feat_idx].partition_point(|&e| e < value)
    }

    /// Number of usable bins for a feature (0 when it is constant).
    pub(crate) fn n_bins_for_feature(&self, feat_idx: usize) -> usize {
        match self.edges[feat_idx].len() {
            0 => 0,
            n => n + 1,
        }
    }

    /// Threshold for a split after bin `bin_idx`.
    pub(crate) fn threshold(&self, feat_idx: usize, bin_idx: usize) -> f64 {
        self.edges[feat_idx][bin_idx]
    }
}

/// Find the best split using histogram-based evaluation.
///
/// The returned threshold is the bin edge value, so the same rule
/// `value <= threshold` applies at prediction time.
pub(crate) fn find_histogram_split(
    node: &NodeSamples<'_>,
    bins: &FeatureBins,
    max_features: usize,
    min_samples_leaf: usize,
    rng: &mut impl Rng,
) -> Option<SplitResult> {
    let n_samples = node.sample_indices.len();
    let n_classes = node.n_classes;
    let parent_counts = node.class_counts();
    let parent_impurity = node.criterion.impurity(&parent_counts, n_samples);

    let mut best_decrease = f64::NEG_INFINITY;
    let mut best: Option<(FeatureIndex, f64)> = None;

    for feat_idx in sample_features(node.col_features.len(), max_features, rng) {
        let actual_bins = bins.n_bins_for_feature(feat_idx);
        if actual_bins == 0 {
            continue;
        }

        // bin_counts[bin][class]
        let mut bin_counts = vec![vec![0usize; n_classes]; actual_bins];
        let feat_col = &node.col_features[feat_idx];
        for &si in node.sample_indices {
            let bin = bins.bin_index(feat_idx, feat_col[si]).min(actual_bins - 1);
            bin_counts[bin][node.labels[si]] += 1;
        }

        let mut left_counts = vec![0usize; n_classes];
        let mut right_counts = parent_counts.clone();
        let mut n_left = 0usize;
        let mut n_right = n_samples;

        for (split_bin, bin_cls_counts) in bin_counts.iter().enumerate().take(actual_bins - 1) {
            let bin_total: usize = bin_cls_counts.iter().sum();
            n_left += bin_total;
            n_right -= bin_total;
            for (cls, &cnt) in bin_cls_counts.iter().enumerate() {
                left_counts[cls] += cnt;
                right_counts[cls] -= cnt;
            }

            if n_left == 0 || n_right == 0 {
                continue;
            }
            if n_left < min_samples_leaf || n_right < min_samples_leaf {
                continue;
            }

            let decrease =
                node.decrease(parent_impurity, &left_counts, n_left, &right_counts, n_right);
            if decrease > best_decrease {
                best_decrease = decrease;
                best = Some((FeatureIndex::new(feat_idx), bins.threshold(feat_idx, split_bin)));
            }
        }
    }

    let (feature, threshold) = best?;
    let (left_indices, right_indices) = node.partition(feature, threshold);
    Some(SplitResult {
        feature,
        threshold,
        impurity_decrease: best_decrease,
        left_indices,
        right_indices,
    })
}
