//! The fitted deep forest.

use std::borrow::Cow;

use tracing::instrument;

use crate::error::GcForestError;
use crate::layer::CascadeLayer;
use crate::metrics::{argmax, concat_rows, mean_rows};
use crate::scan::FittedScanner;

/// Raw input shape accepted at prediction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum InputShape {
    /// Every row has exactly `width` values.
    Fixed {
        /// Required row width.
        width: usize,
    },
    /// Ragged sequences scanned by windows; lengths seen at fit time.
    Ragged {
        /// Shortest training sequence.
        min_len: usize,
        /// Longest training sequence.
        max_len: usize,
    },
}

impl InputShape {
    /// Describe the training rows: fixed when all widths agree.
    pub(crate) fn of_rows(rows: &[Vec<f64>]) -> Self {
        let min_len = rows.iter().map(Vec::len).min().unwrap_or(0);
        let max_len = rows.iter().map(Vec::len).max().unwrap_or(0);
        if min_len == max_len {
            InputShape::Fixed { width: min_len }
        } else {
            InputShape::Ragged { min_len, max_len }
        }
    }

    /// Check every row against this shape.
    ///
    /// # Errors
    ///
    /// | Variant                                         | When                            |
    /// |-------------------------------------------------|---------------------------------|
    /// | [`GcForestError::FeatureWidthMismatch`]         | a row is not `width` wide       |
    /// | [`GcForestError::SequenceLengthOutOfRange`]     | a ragged row is out of range    |
    pub fn check(&self, rows: &[Vec<f64>]) -> Result<(), GcForestError> {
        for (sample_index, row) in rows.iter().enumerate() {
            let got = row.len();
            match *self {
                InputShape::Fixed { width } if got != width => {
                    return Err(GcForestError::FeatureWidthMismatch {
                        expected: width,
                        got,
                        sample_index,
                    });
                }
                InputShape::Ragged { min_len, max_len } if got < min_len || got > max_len => {
                    return Err(GcForestError::SequenceLengthOutOfRange {
                        min_len,
                        max_len,
                        got,
                        sample_index,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// A trained deep forest: optional scan forests plus the retained cascade layers.
///
/// Read-only: prediction never changes the model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GcForestModel {
    pub(crate) scanner: Option<FittedScanner>,
    pub(crate) layers: Vec<CascadeLayer>,
    pub(crate) n_classes: usize,
    pub(crate) input_shape: InputShape,
}

impl GcForestModel {
    /// Class probabilities of the last retained layer, averaged over its units.
    ///
    /// # Errors
    ///
    /// | Variant                                         | When                                  |
    /// |-------------------------------------------------|---------------------------------------|
    /// | [`GcForestError::FeatureWidthMismatch`]         | a row width differs from training     |
    /// | [`GcForestError::SequenceLengthOutOfRange`]     | a ragged row is out of range          |
    /// | [`GcForestError::ImageWidthMismatch`]           | an image row has the wrong size       |
    #[instrument(skip_all, fields(n_rows = rows.len(), n_layers = self.layers.len()))]
    pub fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, GcForestError> {
        self.input_shape.check(rows)?;
        let base: Cow<'_, [Vec<f64>]> = match &self.scanner {
            Some(scanner) => Cow::Owned(scanner.transform(rows)?),
            None => Cow::Borrowed(rows),
        };

        let mut augmented: Option<Vec<Vec<f64>>> = None;
        let mut last_mean = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            let input = layer_input(&base, augmented.as_deref());
            let blocks = layer.predict_blocks(&input)?;
            if i + 1 == self.layers.len() {
                last_mean = mean_rows(&blocks);
            } else {
                augmented = Some(concat_rows(&blocks));
            }
        }
        Ok(last_mean)
    }

    /// Predicted class (argmax of [`GcForestModel::predict_proba`], lowest class on ties).
    ///
    /// # Errors
    ///
    /// See [`GcForestModel::predict_proba`].
    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<usize>, GcForestError> {
        Ok(self.predict_proba(rows)?.iter().map(|p| argmax(p)).collect())
    }

    /// Return the number of retained cascade layers.
    #[must_use]
    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// Return the number of classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Return the raw input shape recorded at fit time.
    #[must_use]
    pub fn input_shape(&self) -> InputShape {
        self.input_shape
    }

    /// Return `true` when inputs pass through multi-grained scanning.
    #[must_use]
    pub fn uses_scanning(&self) -> bool {
        self.scanner.is_some()
    }

    /// Return the retained layers in order.
    #[must_use]
    pub fn layers(&self) -> &[CascadeLayer] {
        &self.layers
    }

    /// Return the scan forests, if scanning was used.
    #[must_use]
    pub fn scanner(&self) -> Option<&FittedScanner> {
        self.scanner.as_ref()
    }
}

/// Base features followed by the previous layer's augmented block.
pub(crate) fn layer_input<'a>(
    base: &'a [Vec<f64>],
    augmented: Option<&[Vec<f64>]>,
) -> Cow<'a, [Vec<f64>]> {
    match augmented {
        None => Cow::Borrowed(base),
        Some(aug) => Cow::Owned(
            base.iter()
                .zip(aug)
                .map(|(b, a)| {
                    let mut row = Vec::with_capacity(b.len() + a.len());
                    row.extend_from_slice(b);
                    row.extend_from_slice(a);
                    row
                })
                .collect(),
        ),
    }
}
