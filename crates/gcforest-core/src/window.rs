//! Sliding-window placement and extraction over 1-D and 2-D instances.

use crate::config::DataStyle;
use crate::error::GcForestError;

/// One multi-grained scanning window.
///
/// For image data the window is `size x size` and moves by `stride` along both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WindowConfig {
    pub(crate) size: usize,
    pub(crate) stride: usize,
}

impl WindowConfig {
    /// Create a window of `size` with stride 1.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self { size, stride: 1 }
    }

    /// Set the step between consecutive placements.
    #[must_use]
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// Return the window size.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Return the window stride.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of values in one extracted window for `style`.
    #[must_use]
    pub fn width(&self, style: DataStyle) -> usize {
        match style {
            DataStyle::Sequence => self.size,
            DataStyle::Image { .. } => self.size * self.size,
        }
    }
}

/// Shape of a single instance as seen by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceLayout {
    /// A sequence of `len` values.
    Sequence {
        /// Sequence length.
        len: usize,
    },
    /// A row-major grid.
    Image {
        /// Grid height.
        rows: usize,
        /// Grid width.
        cols: usize,
    },
}

/// Top-left corner of one window placement (`row` is 0 for sequences).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Grid row of the window's first value.
    pub row: usize,
    /// Sequence offset or grid column of the window's first value.
    pub col: usize,
}

impl InstanceLayout {
    /// Interpret a row of `width` values under `style`.
    ///
    /// # Errors
    ///
    /// Returns [`GcForestError::ImageWidthMismatch`] when an image row does not
    /// hold exactly `rows * cols` values.
    pub fn for_row(style: DataStyle, width: usize, sample_index: usize) -> Result<Self, GcForestError> {
        match style {
            DataStyle::Sequence => Ok(InstanceLayout::Sequence { len: width }),
            DataStyle::Image { rows, cols } => {
                if rows * cols != width {
                    return Err(GcForestError::ImageWidthMismatch {
                        rows,
                        cols,
                        width,
                        sample_index,
                    });
                }
                Ok(InstanceLayout::Image { rows, cols })
            }
        }
    }

    /// Largest window size that fits: the length, or the smaller grid side.
    #[must_use]
    pub fn max_extent(&self) -> usize {
        match *self {
            InstanceLayout::Sequence { len } => len,
            InstanceLayout::Image { rows, cols } => rows.min(cols),
        }
    }
}

fn positions(extent: usize, window: WindowConfig) -> impl Iterator<Item = usize> {
    let count = if extent >= window.size {
        (extent - window.size) / window.stride + 1
    } else {
        0
    };
    (0..count).map(move |i| i * window.stride)
}

/// Every valid placement of `window` over `layout`, in row-major order.
///
/// Empty when the window does not fit.
#[must_use]
pub fn placements(layout: InstanceLayout, window: WindowConfig) -> Vec<Placement> {
    match layout {
        InstanceLayout::Sequence { len } => positions(len, window)
            .map(|col| Placement { row: 0, col })
            .collect(),
        InstanceLayout::Image { rows, cols } => positions(rows, window)
            .flat_map(|row| positions(cols, window).map(move |col| Placement { row, col }))
            .collect(),
    }
}

/// Copy the values covered by a window of `size` at `placement`.
#[must_use]
pub fn extract(row: &[f64], layout: InstanceLayout, placement: Placement, size: usize) -> Vec<f64> {
    match layout {
        InstanceLayout::Sequence { .. } => row[placement.col..placement.col + size].to_vec(),
        InstanceLayout::Image { cols, .. } => {
            let mut out = Vec::with_capacity(size * size);
            for r in placement.row..placement.row + size {
                let start = r * cols + placement.col;
                out.extend_from_slice(&row[start..start + size]);
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_of_ten_with_window_four_has_seven_placements() {
        let layout = InstanceLayout::Sequence { len: 10 };
        let places = placements(layout, WindowConfig::new(4));
        assert_eq!(places.len(), 7);
        assert_eq!(places[0], Placement { row: 0, col: 0 });
        assert_eq!(places[6], Placement { row: 0, col: 6 });
    }

    #[test]
    fn stride_skips_positions() {
        let layout = InstanceLayout::Sequence { len: 10 };
        let cols: Vec<usize> = placements(layout, WindowConfig::new(4).with_stride(3))
            .iter()
            .map(|p| p.col)
            .collect();
        assert_eq!(cols, vec![0, 3, 6]);
    }

    #[test]
    fn window_larger_than_instance_has_no_placements() {
        let layout = InstanceLayout::Sequence { len: 3 };
        assert!(placements(layout, WindowConfig::new(4)).is_empty());
    }

    #[test]
    fn image_placements_are_row_major() {
        let layout = InstanceLayout::Image { rows: 3, cols: 4 };
        let places = placements(layout, WindowConfig::new(2));
        assert_eq!(places.len(), 2 * 3);
        assert_eq!(places[3], Placement { row: 1, col: 0 });
    }

    #[test]
    fn extract_sequence_and_image() {
        let seq: Vec<f64> = (0..10).map(f64::from).collect();
        let layout = InstanceLayout::Sequence { len: 10 };
        assert_eq!(
            extract(&seq, layout, Placement { row: 0, col: 2 }, 3),
            vec![2.0, 3.0, 4.0]
        );

        // 3x3 grid holding 0..9.
        let grid: Vec<f64> = (0..9).map(f64::from).collect();
        let layout = InstanceLayout::Image { rows: 3, cols: 3 };
        assert_eq!(
            extract(&grid, layout, Placement { row: 1, col: 1 }, 2),
            vec![4.0, 5.0, 7.0, 8.0]
        );
    }

    #[test]
    fn image_layout_checks_width() {
        let style = DataStyle::Image { rows: 2, cols: 3 };
        assert!(InstanceLayout::for_row(style, 6, 0).is_ok());
        let err = InstanceLayout::for_row(style, 5, 4).unwrap_err();
        assert!(matches!(
            err,
            GcForestError::ImageWidthMismatch { width: 5, sample_index: 4, .. }
        ));
    }
}
