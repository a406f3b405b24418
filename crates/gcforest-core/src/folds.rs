//! Fold-index arrays for cross-validation and the validation hold-out.
//!
//! Folds are plain `Vec<usize>` assignments over row positions; training
//! subsets are index lists into the shared feature matrix, never copies.

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::warn;

use crate::error::GcForestError;

/// Fold assignment for every row position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldPlan {
    assignments: Vec<usize>,
    n_folds: usize,
}

impl FoldPlan {
    /// Stratified assignment: shuffle each class, then deal rows round-robin
    /// across folds, continuing the rotation from one class to the next so
    /// fold sizes differ by at most one.
    ///
    /// # Errors
    ///
    /// Returns [`GcForestError::TooFewRows`] when there are fewer rows than folds.
    pub fn stratified(
        labels: &[usize],
        n_folds: usize,
        seed: u64,
        stage: &str,
    ) -> Result<Self, GcForestError> {
        check_row_count(labels.len(), n_folds, stage)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let n_classes = labels.iter().max().map_or(0, |&m| m + 1);
        let mut class_indices: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
        for (i, &label) in labels.iter().enumerate() {
            class_indices[label].push(i);
        }

        let mut assignments = vec![0usize; labels.len()];
        let mut next = 0usize;
        for indices in &mut class_indices {
            indices.shuffle(&mut rng);
            for &idx in indices.iter() {
                assignments[idx] = next % n_folds;
                next += 1;
            }
        }
        Ok(Self {
            assignments,
            n_folds,
        })
    }

    /// Label-blind assignment from a shuffled permutation of row positions.
    ///
    /// # Errors
    ///
    /// Returns [`GcForestError::TooFewRows`] when there are fewer rows than folds.
    pub fn shuffled(n_rows: usize, n_folds: usize, seed: u64, stage: &str) -> Result<Self, GcForestError> {
        check_row_count(n_rows, n_folds, stage)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..n_rows).collect();
        order.shuffle(&mut rng);
        let mut assignments = vec![0usize; n_rows];
        for (j, &idx) in order.iter().enumerate() {
            assignments[idx] = j % n_folds;
        }
        Ok(Self {
            assignments,
            n_folds,
        })
    }

    /// Stratified plan, re-dealt once with a shuffled plan when a fold's
    /// training complement is single-class.
    ///
    /// The stratified plan only degenerates when classes have a single row.
    /// With two classes and a singleton the retry cannot help: the fold
    /// holding the singleton always leaves one class behind.
    ///
    /// # Errors
    ///
    /// | Variant                             | When                                    |
    /// |-------------------------------------|-----------------------------------------|
    /// | [`GcForestError::TooFewRows`]       | fewer rows than folds                   |
    /// | [`GcForestError::DegenerateFold`]   | the reshuffled plan is still degenerate |
    pub fn resolve(labels: &[usize], n_folds: usize, seed: u64, stage: &str) -> Result<Self, GcForestError> {
        let plan = Self::stratified(labels, n_folds, seed, stage)?;
        let Some((fold, n_distinct)) = plan.degenerate_fold(labels) else {
            return Ok(plan);
        };
        warn!(stage, fold, n_distinct, "degenerate fold, retrying with a reshuffled split");

        let retry = Self::shuffled(labels.len(), n_folds, seed.wrapping_add(1), stage)?;
        match retry.degenerate_fold(labels) {
            None => Ok(retry),
            Some((fold, n_distinct)) => Err(GcForestError::DegenerateFold {
                stage: stage.to_string(),
                fold,
                n_distinct,
            }),
        }
    }

    /// First fold whose training complement holds fewer than two classes.
    #[must_use]
    pub fn degenerate_fold(&self, labels: &[usize]) -> Option<(usize, usize)> {
        (0..self.n_folds).find_map(|fold| {
            let n_distinct = distinct_count(
                self.assignments
                    .iter()
                    .zip(labels)
                    .filter(|&(&f, _)| f != fold)
                    .map(|(_, &l)| l),
            );
            (n_distinct < 2).then_some((fold, n_distinct))
        })
    }

    /// Row positions outside `fold` (the training complement).
    #[must_use]
    pub fn train_positions(&self, fold: usize) -> Vec<usize> {
        self.positions(|f| f != fold)
    }

    /// Row positions inside `fold` (the held-out rows).
    #[must_use]
    pub fn test_positions(&self, fold: usize) -> Vec<usize> {
        self.positions(|f| f == fold)
    }

    fn positions(&self, keep: impl Fn(usize) -> bool) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter(|&(_, &f)| keep(f))
            .map(|(i, _)| i)
            .collect()
    }

    /// Carry each parent's fold over to its children; `parent_of[child]` is the
    /// parent position.
    #[must_use]
    pub fn expand(&self, parent_of: &[usize]) -> Self {
        Self {
            assignments: parent_of.iter().map(|&p| self.assignments[p]).collect(),
            n_folds: self.n_folds,
        }
    }

    /// Return the number of folds.
    #[must_use]
    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    /// Return the number of row positions covered.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.assignments.len()
    }
}

fn check_row_count(n_rows: usize, n_folds: usize, stage: &str) -> Result<(), GcForestError> {
    if n_rows < n_folds {
        return Err(GcForestError::TooFewRows {
            stage: stage.to_string(),
            n_rows,
            n_folds,
        });
    }
    Ok(())
}

/// Number of distinct labels in `labels`.
pub(crate) fn distinct_count(labels: impl Iterator<Item = usize>) -> usize {
    let mut seen: Vec<usize> = labels.collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}

/// Split row positions into `(train, holdout)`, taking about `fraction` of
/// every class for the hold-out while leaving at least one row of each class
/// in training.
///
/// # Errors
///
/// Returns [`GcForestError::EmptyValidationSet`] when no row can be held out.
pub fn stratified_holdout(
    labels: &[usize],
    fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>), GcForestError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let n_classes = labels.iter().max().map_or(0, |&m| m + 1);
    let mut class_indices: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
    for (i, &label) in labels.iter().enumerate() {
        class_indices[label].push(i);
    }

    let mut train = Vec::with_capacity(labels.len());
    let mut holdout = Vec::new();
    for indices in &mut class_indices {
        if indices.is_empty() {
            continue;
        }
        indices.shuffle(&mut rng);
        let take = ((indices.len() as f64 * fraction).round() as usize).min(indices.len() - 1);
        holdout.extend_from_slice(&indices[..take]);
        train.extend_from_slice(&indices[take..]);
    }
    if holdout.is_empty() {
        return Err(GcForestError::EmptyValidationSet);
    }
    train.sort_unstable();
    holdout.sort_unstable();
    Ok((train, holdout))
}
