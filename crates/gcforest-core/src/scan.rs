//! Multi-grained scanning.
//!
//! Each window slides over every instance; the sub-instances inherit their
//! parent's label and train one random forest and one completely-random
//! forest per window. A parent's scanned features are the per-class mean of
//! its sub-instance probabilities, RF block then CRF block, window after
//! window in configuration order.

use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use tracing::{debug, info, instrument};

use crate::cancel::CancellationToken;
use crate::config::{DataStyle, GcForestConfig};
use crate::crossval::cross_val_predict;
use crate::error::GcForestError;
use crate::folds::{FoldPlan, distinct_count};
use crate::seed::{SCAN_STAGE, derive_seed};
use crate::unit::ForestUnit;
use crate::window::{InstanceLayout, WindowConfig, extract, placements};

/// Untrained scanner bound to a configuration.
#[derive(Debug, Clone, Copy)]
pub struct MultiGrainScanner<'a> {
    config: &'a GcForestConfig,
}

/// Scan forests for one window: RF first, CRF second.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FittedWindow {
    window: WindowConfig,
    units: Vec<ForestUnit>,
}

impl FittedWindow {
    /// Return the window.
    #[must_use]
    pub fn window(&self) -> WindowConfig {
        self.window
    }

    /// Return the window's forests in output order.
    #[must_use]
    pub fn units(&self) -> &[ForestUnit] {
        &self.units
    }
}

/// Trained scanner that replays the transform at prediction time.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FittedScanner {
    style: DataStyle,
    windows: Vec<FittedWindow>,
    n_classes: usize,
}

impl<'a> MultiGrainScanner<'a> {
    /// Bind a scanner to `config`'s windows, data style, and scan forest parameters.
    #[must_use]
    pub fn new(config: &'a GcForestConfig) -> Self {
        Self { config }
    }

    /// Train the scan forests and return the scanned training features.
    ///
    /// The returned features come from out-of-fold predictions, so no parent
    /// is described by forests that saw its own windows.
    ///
    /// # Errors
    ///
    /// | Variant                                     | When                                         |
    /// |---------------------------------------------|----------------------------------------------|
    /// | [`GcForestError::ImageWidthMismatch`]       | an image row has the wrong number of values  |
    /// | [`GcForestError::WindowTooLarge`]           | a window fits in no instance                 |
    /// | [`GcForestError::DegenerateTrainingSet`]    | instances that fit a window share one class  |
    /// | [`GcForestError::TooFewRows`]               | fewer fitting instances than folds           |
    /// | [`GcForestError::DegenerateFold`]           | folds stay single-class after the retry      |
    /// | [`GcForestError::Cancelled`]                | the token was cancelled                      |
    #[instrument(skip_all, fields(n_windows = self.config.scan_windows.len(), n_rows = features.len()))]
    pub fn fit(
        &self,
        features: &[Vec<f64>],
        labels: &[usize],
        n_classes: usize,
        cancel: &CancellationToken,
    ) -> Result<(FittedScanner, Vec<Vec<f64>>), GcForestError> {
        let config = self.config;
        let layouts = features
            .iter()
            .enumerate()
            .map(|(i, row)| InstanceLayout::for_row(config.data_style, row.len(), i))
            .collect::<Result<Vec<_>, _>>()?;
        let max_extent = layouts.iter().map(InstanceLayout::max_extent).max().unwrap_or(0);
        if let Some(w) = config.scan_windows.iter().find(|w| w.size > max_extent) {
            return Err(GcForestError::WindowTooLarge {
                size: w.size,
                max_extent,
            });
        }

        let block = 2 * n_classes;
        let mut transformed = vec![vec![0.0f64; config.scan_windows.len() * block]; features.len()];
        let mut windows = Vec::with_capacity(config.scan_windows.len());

        for (window_idx, &window) in config.scan_windows.iter().enumerate() {
            cancel.check()?;
            let stage = format!("scan window {}", window.size);

            // Parents the window fits in; the rest keep zero features.
            let parents: Vec<usize> = (0..features.len())
                .filter(|&i| layouts[i].max_extent() >= window.size)
                .collect();
            let parent_labels: Vec<usize> = parents.iter().map(|&i| labels[i]).collect();
            let n_distinct = distinct_count(parent_labels.iter().copied());
            if n_distinct < 2 {
                return Err(GcForestError::DegenerateTrainingSet {
                    stage,
                    n_rows: parents.len(),
                    n_distinct,
                });
            }
            let plan = FoldPlan::resolve(
                &parent_labels,
                config.n_folds,
                derive_seed(config.seed, &[SCAN_STAGE, window_idx as u64, u64::MAX]),
                &stage,
            )?;

            let mut sub_features = Vec::new();
            let mut sub_labels = Vec::new();
            let mut parent_of = Vec::new();
            for (pos, &i) in parents.iter().enumerate() {
                for placement in placements(layouts[i], window) {
                    sub_features.push(extract(&features[i], layouts[i], placement, window.size));
                    sub_labels.push(labels[i]);
                    parent_of.push(pos);
                }
            }
            debug!(
                window = window.size,
                stride = window.stride,
                n_parents = parents.len(),
                n_sub_instances = sub_features.len(),
                "window instances extracted"
            );

            let outputs = cross_val_predict(
                &config.scan_unit_specs(window_idx),
                &sub_features,
                &sub_labels,
                &plan.expand(&parent_of),
                n_classes,
                &stage,
                cancel,
            )?;

            let offset = window_idx * block;
            for (unit_idx, output) in outputs.iter().enumerate() {
                let means = mean_by_parent(&output.oof, &parent_of, parents.len(), n_classes);
                for (pos, mean) in means.into_iter().enumerate() {
                    let start = offset + unit_idx * n_classes;
                    transformed[parents[pos]][start..start + n_classes].copy_from_slice(&mean);
                }
            }
            windows.push(FittedWindow {
                window,
                units: outputs.into_iter().map(|o| o.unit).collect(),
            });
            info!(window = window.size, n_parents = parents.len(), "scan window fitted");
        }

        Ok((
            FittedScanner {
                style: config.data_style,
                windows,
                n_classes,
            },
            transformed,
        ))
    }
}

/// Per-class mean of child probabilities grouped by parent position.
fn mean_by_parent(
    child_proba: &[Vec<f64>],
    parent_of: &[usize],
    n_parents: usize,
    n_classes: usize,
) -> Vec<Vec<f64>> {
    let mut sums = vec![vec![0.0f64; n_classes]; n_parents];
    let mut counts = vec![0usize; n_parents];
    for (proba, &parent) in child_proba.iter().zip(parent_of) {
        for (slot, p) in sums[parent].iter_mut().zip(proba) {
            *slot += p;
        }
        counts[parent] += 1;
    }
    for (sum, &count) in sums.iter_mut().zip(&counts) {
        if count > 0 {
            sum.iter_mut().for_each(|v| *v /= count as f64);
        }
    }
    sums
}

impl FittedScanner {
    /// Scan rows with the trained forests.
    ///
    /// Rows too small for a window get zeros in that window's block.
    ///
    /// # Errors
    ///
    /// Returns [`GcForestError::ImageWidthMismatch`] for image rows of the wrong size.
    #[instrument(skip_all, fields(n_rows = rows.len()))]
    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, GcForestError> {
        rows.par_iter()
            .enumerate()
            .map(|(i, row)| self.transform_row(row, i))
            .collect()
    }

    fn transform_row(&self, row: &[f64], sample_index: usize) -> Result<Vec<f64>, GcForestError> {
        let layout = InstanceLayout::for_row(self.style, row.len(), sample_index)?;
        let mut out = vec![0.0f64; self.output_width()];
        for (window_idx, fitted) in self.windows.iter().enumerate() {
            let subs: Vec<Vec<f64>> = placements(layout, fitted.window)
                .into_iter()
                .map(|p| extract(row, layout, p, fitted.window.size))
                .collect();
            if subs.is_empty() {
                continue;
            }
            let parent_of = vec![0usize; subs.len()];
            for (unit_idx, unit) in fitted.units.iter().enumerate() {
                let proba = unit.predict_proba(&subs)?;
                let mean = mean_by_parent(&proba, &parent_of, 1, self.n_classes);
                let start = (window_idx * fitted.units.len() + unit_idx) * self.n_classes;
                out[start..start + self.n_classes].copy_from_slice(&mean[0]);
            }
        }
        Ok(out)
    }

    /// Width of a scanned row: windows x 2 forests x classes.
    #[must_use]
    pub fn output_width(&self) -> usize {
        self.windows.iter().map(|w| w.units.len()).sum::<usize>() * self.n_classes
    }

    /// Return the fitted windows in configuration order.
    #[must_use]
    pub fn windows(&self) -> &[FittedWindow] {
        &self.windows
    }

    /// Return the data style rows are interpreted with.
    #[must_use]
    pub fn style(&self) -> DataStyle {
        self.style
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Class 1 sequences carry a bump somewhere along their length.
    fn bump_sequences(n: usize, len: usize) -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut features = Vec::with_capacity(n);
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let class = i % 2;
            let mut row: Vec<f64> = (0..len).map(|j| ((i * 7 + j * 3) % 5) as f64 * 0.05).collect();
            if class == 1 {
                let at = i % (len - 2);
                row[at] += 2.0;
                row[at + 1] += 2.0;
            }
            features.push(row);
            labels.push(class);
        }
        (features, labels)
    }

    fn config(windows: Vec<WindowConfig>) -> GcForestConfig {
        GcForestConfig::builder()
            .with_scan_windows(windows)
            .with_scan_forest_tree_num(8)
            .build()
            .unwrap()
    }

    #[test]
    fn output_width_is_windows_times_two_times_classes() {
        let (features, labels) = bump_sequences(24, 10);
        let config = config(vec![WindowConfig::new(3), WindowConfig::new(5)]);
        let (scanner, transformed) = MultiGrainScanner::new(&config)
            .fit(&features, &labels, 2, &CancellationToken::new())
            .unwrap();
        assert_eq!(scanner.output_width(), 2 * 2 * 2);
        assert!(transformed.iter().all(|r| r.len() == 8));

        let replayed = scanner.transform(&features).unwrap();
        for row in &replayed {
            // Each 2-wide block is a mean of probability vectors.
            for block in row.chunks(2) {
                assert!((block.iter().sum::<f64>() - 1.0).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn short_instances_get_zero_blocks() {
        let (mut features, labels) = bump_sequences(24, 10);
        features[0].truncate(3);
        let config = config(vec![WindowConfig::new(4)]);
        let (scanner, transformed) = MultiGrainScanner::new(&config)
            .fit(&features, &labels, 2, &CancellationToken::new())
            .unwrap();
        assert!(transformed[0].iter().all(|&v| v == 0.0));
        assert!(transformed[1].iter().any(|&v| v > 0.0));
        let replayed = scanner.transform(&[vec![0.1, 0.2]]).unwrap();
        assert_eq!(replayed[0], vec![0.0; 4]);
    }

    #[test]
    fn window_larger_than_every_instance_is_configuration_error() {
        let (features, labels) = bump_sequences(12, 6);
        let config = config(vec![WindowConfig::new(7)]);
        let err = MultiGrainScanner::new(&config)
            .fit(&features, &labels, 2, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, GcForestError::WindowTooLarge { size: 7, max_extent: 6 }));
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn image_rows_scan_square_windows() {
        // 4x4 images: class 1 has a bright 2x2 patch.
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for i in 0..20 {
            let class = i % 2;
            let mut grid = vec![0.1 * (i % 3) as f64; 16];
            if class == 1 {
                let (r, c) = ((i / 2) % 3, (i / 3) % 3);
                for (dr, dc) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                    grid[(r + dr) * 4 + c + dc] = 1.0;
                }
            }
            features.push(grid);
            labels.push(class);
        }
        let config = GcForestConfig::builder()
            .with_data_style(DataStyle::Image { rows: 4, cols: 4 })
            .with_scan_windows(vec![WindowConfig::new(2)])
            .with_scan_forest_tree_num(8)
            .build()
            .unwrap();
        let (scanner, transformed) = MultiGrainScanner::new(&config)
            .fit(&features, &labels, 2, &CancellationToken::new())
            .unwrap();
        assert_eq!(transformed[0].len(), 4);
        assert_eq!(scanner.windows()[0].units()[0].n_features(), 4);
    }

    #[test]
    fn averaged_windows_track_a_full_instance_forest() {
        // Window as wide as the instance: one placement, so the scan RF block
        // equals a forest trained on whole instances up to fold noise.
        let (features, labels) = bump_sequences(30, 8);
        let config = config(vec![WindowConfig::new(8)]);
        let (scanner, _) = MultiGrainScanner::new(&config)
            .fit(&features, &labels, 2, &CancellationToken::new())
            .unwrap();
        let scanned = scanner.transform(&features).unwrap();
        let correct = scanned
            .iter()
            .zip(&labels)
            .filter(|&(row, &l)| crate::metrics::argmax(&row[..2]) == l)
            .count();
        assert!(correct as f64 / labels.len() as f64 > 0.9);
    }

    #[test]
    fn image_width_mismatch_is_configuration_error() {
        let config = GcForestConfig::builder()
            .with_data_style(DataStyle::Image { rows: 2, cols: 2 })
            .with_scan_windows(vec![WindowConfig::new(2)])
            .build()
            .unwrap();
        let err = MultiGrainScanner::new(&config)
            .fit(&[vec![0.0; 4], vec![0.0; 5]], &[0, 1], 2, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, GcForestError::ImageWidthMismatch { sample_index: 1, .. }));
    }
}
