//! Forest inference: per-sample distributions and dense probability rows.

use rayon::prelude::*;

use crate::error::RfError;
use crate::forest::RandomForest;

/// Averaged class probabilities for one sample.
///
/// Always `n_classes` long and sums to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDistribution {
    probs: Vec<f64>,
}

impl ClassDistribution {
    pub(crate) fn new(probs: Vec<f64>) -> Self {
        Self { probs }
    }

    /// Most probable class; ties go to the lowest class index.
    #[must_use]
    pub fn predicted_class(&self) -> usize {
        let mut best = 0;
        for (class, &p) in self.probs.iter().enumerate() {
            if p > self.probs[best] {
                best = class;
            }
        }
        best
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.probs
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<f64> {
        self.probs
    }
}

impl RandomForest {
    /// Predict the class of one sample.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] when `sample.len() != n_features`.
    pub fn predict(&self, sample: &[f64]) -> Result<usize, RfError> {
        Ok(self.predict_proba(sample)?.predicted_class())
    }

    /// Mean of the leaf distributions the sample reaches in every tree.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] when `sample.len() != n_features`.
    pub fn predict_proba(&self, sample: &[f64]) -> Result<ClassDistribution, RfError> {
        self.check_width(sample)?;
        Ok(ClassDistribution::new(self.mean_leaf_distribution(sample)))
    }

    /// Predict classes for a batch in parallel.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] if any sample has the wrong feature count.
    pub fn predict_batch(&self, features: &[Vec<f64>]) -> Result<Vec<usize>, RfError> {
        features.par_iter().map(|sample| self.predict(sample)).collect()
    }

    /// Probability distributions for a batch in parallel.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] if any sample has the wrong feature count.
    pub fn predict_proba_batch(&self, features: &[Vec<f64>]) -> Result<Vec<ClassDistribution>, RfError> {
        features.par_iter().map(|sample| self.predict_proba(sample)).collect()
    }

    /// Probability rows for `features[p]` for each `p` in `positions`, in that order.
    ///
    /// This is the shape cross-validation needs: a held-out fold is an index
    /// list into the shared training rows.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] if any listed row has the wrong feature count.
    pub fn predict_proba_rows(&self, features: &[Vec<f64>], positions: &[usize]) -> Result<Vec<Vec<f64>>, RfError> {
        for &p in positions {
            self.check_width(&features[p])?;
        }
        Ok(positions
            .par_iter()
            .map(|&p| self.mean_leaf_distribution(&features[p]))
            .collect())
    }

    fn check_width(&self, sample: &[f64]) -> Result<(), RfError> {
        if sample.len() == self.n_features {
            Ok(())
        } else {
            Err(RfError::PredictionFeatureMismatch {
                expected: self.n_features,
                got: sample.len(),
            })
        }
    }

    fn mean_leaf_distribution(&self, sample: &[f64]) -> Vec<f64> {
        let mut mean = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (slot, p) in mean.iter_mut().zip(tree.leaf_distribution(sample)) {
                *slot += p;
            }
        }
        let n = self.trees.len() as f64;
        mean.iter_mut().for_each(|v| *v /= n);
        mean
    }

    /// Return the training feature width.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Return the number of classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Return the number of trees in the ensemble.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}
