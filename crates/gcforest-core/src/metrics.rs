//! Probability aggregation and accuracy scoring.

use crate::error::GcForestError;

/// Index of the largest probability; the lowest index wins ties.
#[must_use]
pub fn argmax(probs: &[f64]) -> usize {
    probs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

/// Row-wise arithmetic mean of several equally shaped probability blocks.
///
/// `blocks[unit][row]` is one unit's probability vector for `row`; the result
/// has one averaged vector per row.
#[must_use]
pub fn mean_rows(blocks: &[Vec<Vec<f64>>]) -> Vec<Vec<f64>> {
    let Some(first) = blocks.first() else {
        return Vec::new();
    };
    let scale = 1.0 / blocks.len() as f64;
    (0..first.len())
        .map(|row| {
            let mut mean = vec![0.0f64; first[row].len()];
            for block in blocks {
                for (slot, p) in mean.iter_mut().zip(&block[row]) {
                    *slot += p;
                }
            }
            mean.iter_mut().for_each(|v| *v *= scale);
            mean
        })
        .collect()
}

/// `blocks[unit][row]` concatenated into one vector per row, unit order.
pub(crate) fn concat_rows(blocks: &[Vec<Vec<f64>>]) -> Vec<Vec<f64>> {
    let n_rows = blocks.first().map_or(0, Vec::len);
    (0..n_rows)
        .map(|row| blocks.iter().flat_map(|b| b[row].iter().copied()).collect())
        .collect()
}

/// Fraction of rows whose argmax matches the label.
///
/// # Errors
///
/// Returns [`GcForestError::EmptyValidationSet`] when there are no rows, and
/// [`GcForestError::LabelCountMismatch`] when the lengths differ.
pub fn accuracy(probas: &[Vec<f64>], labels: &[usize]) -> Result<f64, GcForestError> {
    if probas.len() != labels.len() {
        return Err(GcForestError::LabelCountMismatch {
            n_rows: probas.len(),
            n_labels: labels.len(),
        });
    }
    if labels.is_empty() {
        return Err(GcForestError::EmptyValidationSet);
    }
    let correct = probas
        .iter()
        .zip(labels)
        .filter(|&(p, &l)| argmax(p) == l)
        .count();
    Ok(correct as f64 / labels.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_tie_prefers_lowest_class() {
        assert_eq!(argmax(&[0.25, 0.5, 0.25]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
    }

    #[test]
    fn mean_rows_averages_per_class() {
        let blocks = vec![
            vec![vec![1.0, 0.0], vec![0.5, 0.5]],
            vec![vec![0.0, 1.0], vec![0.5, 0.5]],
        ];
        let mean = mean_rows(&blocks);
        assert_eq!(mean, vec![vec![0.5, 0.5], vec![0.5, 0.5]]);
    }

    #[test]
    fn concat_rows_keeps_unit_order() {
        let blocks = vec![vec![vec![0.1, 0.9]], vec![vec![0.7, 0.3]]];
        assert_eq!(concat_rows(&blocks), vec![vec![0.1, 0.9, 0.7, 0.3]]);
    }

    #[test]
    fn accuracy_counts_argmax_hits() {
        let probas = vec![vec![0.9, 0.1], vec![0.2, 0.8], vec![0.6, 0.4]];
        let acc = accuracy(&probas, &[0, 1, 1]).unwrap();
        assert!((acc - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn accuracy_on_empty_set_is_configuration_error() {
        let err = accuracy(&[], &[]).unwrap_err();
        assert!(matches!(err, GcForestError::EmptyValidationSet));
    }
}
