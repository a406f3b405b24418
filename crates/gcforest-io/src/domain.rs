//! Domain types for gcforest-io.

use crate::IoError;

/// A validated experiment name for output file naming.
///
/// Must match `[a-zA-Z0-9_-]+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentName(String);

impl ExperimentName {
    /// Parse and validate an experiment name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidExperimentName`] if the name is empty or
    /// contains characters outside `[a-zA-Z0-9_-]`.
    pub fn new(name: String) -> Result<Self, IoError> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(IoError::InvalidExperimentName { name });
        }
        Ok(Self(name))
    }

    /// Return the experiment name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExperimentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Feature rows read from CSV, with their class labels when the file had them.
///
/// Produced by [`LabeledCsvReader`](crate::LabeledCsvReader). `features[i]`
/// and `labels[i]` describe the same sample.
#[derive(Debug, Clone)]
pub struct LabeledDataset {
    feature_names: Vec<String>,
    features: Vec<Vec<f64>>,
    labels: Option<Vec<usize>>,
}

impl LabeledDataset {
    pub(crate) fn new(feature_names: Vec<String>, features: Vec<Vec<f64>>, labels: Option<Vec<usize>>) -> Self {
        Self {
            feature_names,
            features,
            labels,
        }
    }

    /// Return the feature column names.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Return the feature matrix (row-major).
    #[must_use]
    pub fn features(&self) -> &[Vec<f64>] {
        &self.features
    }

    /// Return the labels, if the file had a label column.
    #[must_use]
    pub fn labels(&self) -> Option<&[usize]> {
        self.labels.as_deref()
    }

    /// Return the number of samples.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.features.len()
    }

    /// Return the number of feature columns.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Split into features and labels.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Vec<f64>>, Option<Vec<usize>>) {
        (self.features, self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn experiment_name_valid() {
        let name = ExperimentName::new("my-experiment_01".to_string());
        assert!(name.is_ok());
        assert_eq!(name.unwrap().as_str(), "my-experiment_01");
    }

    #[test]
    fn experiment_name_rejects_empty() {
        let name = ExperimentName::new(String::new());
        assert!(matches!(name, Err(IoError::InvalidExperimentName { .. })));
    }

    #[test]
    fn experiment_name_rejects_special_chars() {
        let name = ExperimentName::new("my experiment!".to_string());
        assert!(matches!(name, Err(IoError::InvalidExperimentName { .. })));
    }

    #[test]
    fn dataset_parts_line_up() {
        let ds = LabeledDataset::new(
            vec!["a".into(), "b".into()],
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            Some(vec![0, 1]),
        );
        assert_eq!(ds.n_samples(), 2);
        assert_eq!(ds.n_features(), 2);
        assert_eq!(ds.labels(), Some(&[0, 1][..]));
        let (features, labels) = ds.into_parts();
        assert_eq!(features[1], vec![3.0, 4.0]);
        assert_eq!(labels, Some(vec![0, 1]));
    }
}
