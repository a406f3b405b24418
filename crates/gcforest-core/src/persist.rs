//! Model persistence via bincode.

use std::path::Path;

use tracing::{debug, info, instrument};

use crate::error::GcForestError;
use crate::model::GcForestModel;

/// Current binary format version.
const FORMAT_VERSION: u32 = 1;

/// Versioned envelope for the serialized model.
#[derive(serde::Serialize, serde::Deserialize)]
struct ModelEnvelope {
    /// Format version for compatibility checking.
    format_version: u32,
    /// Number of retained cascade layers.
    n_layers: usize,
    /// Number of classes.
    n_classes: usize,
    /// The serialized model.
    model: GcForestModel,
}

impl GcForestModel {
    /// Save the model to a binary file.
    ///
    /// The scan forests and every retained layer are written, so the loaded
    /// model predicts without retraining.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`GcForestError::SerializeModel`] | bincode encoding failed |
    /// | [`GcForestError::WriteModel`] | file write failed |
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), GcForestError> {
        let path = path.as_ref();

        let envelope = ModelEnvelope {
            format_version: FORMAT_VERSION,
            n_layers: self.layers.len(),
            n_classes: self.n_classes,
            model: self.clone(),
        };

        let bytes =
            bincode::serialize(&envelope).map_err(|e| GcForestError::SerializeModel { source: e })?;

        std::fs::write(path, &bytes).map_err(|e| GcForestError::WriteModel {
            path: path.to_path_buf(),
            source: e,
        })?;

        info!(
            size_bytes = bytes.len(),
            n_layers = self.layers.len(),
            uses_scanning = self.scanner.is_some(),
            "model saved"
        );

        Ok(())
    }

    /// Load a model from a binary file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`GcForestError::ReadModel`] | file read failed |
    /// | [`GcForestError::DeserializeModel`] | bincode decoding failed |
    /// | [`GcForestError::IncompatibleModelVersion`] | format version mismatch |
    #[instrument(fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GcForestError> {
        let path = path.as_ref();

        let bytes = std::fs::read(path).map_err(|e| GcForestError::ReadModel {
            path: path.to_path_buf(),
            source: e,
        })?;

        let envelope: ModelEnvelope =
            bincode::deserialize(&bytes).map_err(|e| GcForestError::DeserializeModel {
                path: path.to_path_buf(),
                source: e,
            })?;

        if envelope.format_version != FORMAT_VERSION {
            return Err(GcForestError::IncompatibleModelVersion {
                expected: FORMAT_VERSION,
                found: envelope.format_version,
                path: path.to_path_buf(),
            });
        }

        debug!(
            n_layers = envelope.n_layers,
            n_classes = envelope.n_classes,
            "model loaded"
        );

        Ok(envelope.model)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::GcForestConfig;
    use crate::error::ErrorKind;

    fn train_small_model() -> GcForestModel {
        let features: Vec<Vec<f64>> = (0..30)
            .map(|i| {
                let class = (i % 2) as f64;
                vec![class * 5.0 + (i % 4) as f64 * 0.2, (i % 3) as f64]
            })
            .collect();
        let labels: Vec<usize> = (0..30).map(|i| i % 2).collect();
        GcForestConfig::builder()
            .with_rf_num(1)
            .with_crf_num(1)
            .with_cascade_forest_tree_num(5)
            .with_max_iteration(2)
            .build()
            .unwrap()
            .fit(&features, &labels)
            .unwrap()
            .model
    }

    #[test]
    fn round_trip_identical_predictions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.bin");
        let model = train_small_model();
        model.save(&path).unwrap();
        let loaded = GcForestModel::load(&path).unwrap();

        let rows = vec![vec![0.1, 1.0], vec![5.2, 2.0]];
        assert_eq!(model.predict_proba(&rows).unwrap(), loaded.predict_proba(&rows).unwrap());
        assert_eq!(loaded.n_layers(), model.n_layers());
        assert_eq!(loaded.input_shape(), model.input_shape());
    }

    #[test]
    fn version_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.bin");
        let envelope = ModelEnvelope {
            format_version: FORMAT_VERSION + 1,
            n_layers: 0,
            n_classes: 2,
            model: train_small_model(),
        };
        std::fs::write(&path, bincode::serialize(&envelope).unwrap()).unwrap();
        let err = GcForestModel::load(&path).unwrap_err();
        assert!(matches!(err, GcForestError::IncompatibleModelVersion { found: 2, .. }));
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = GcForestModel::load("/nonexistent/gcforest/model.bin").unwrap_err();
        assert!(matches!(err, GcForestError::ReadModel { .. }));
    }

    #[test]
    fn garbage_bytes_fail_to_deserialize() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.bin");
        std::fs::write(&path, b"not a model").unwrap();
        assert!(matches!(
            GcForestModel::load(&path),
            Err(GcForestError::DeserializeModel { .. })
        ));
    }
}
