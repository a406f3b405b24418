//! JSON result writer for growth reports and predictions.

use std::fs;
use std::path::{Path, PathBuf};

use gcforest_core::{GcForestConfig, GrowthOutcome, GrowthReport, LayerReport, argmax};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::IoError;
use crate::domain::ExperimentName;

/// Writes training reports and predictions to JSON files.
///
/// Creates the output directory on construction if it does not exist.
/// Output files are named `{experiment}_report.json`,
/// `{experiment}_predictions.json`, and `{experiment}_model.bin`.
pub struct ResultWriter {
    output_dir: PathBuf,
    experiment: ExperimentName,
}

impl ResultWriter {
    /// Create a new writer targeting the given directory and experiment name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::OutputDirCreate`] if the directory cannot be created.
    #[instrument(skip_all, fields(dir = %output_dir.display(), experiment = %experiment))]
    pub fn new(output_dir: &Path, experiment: ExperimentName) -> Result<Self, IoError> {
        fs::create_dir_all(output_dir).map_err(|e| IoError::OutputDirCreate {
            path: output_dir.to_path_buf(),
            source: e,
        })?;
        debug!("output directory ready");
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            experiment,
        })
    }

    /// Write the growth report and the configuration that produced it to
    /// `{experiment}_report.json`. Returns the path written.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::SerializeJson`] | the report could not be encoded |
    /// | [`IoError::WriteFile`] | the file could not be written |
    #[instrument(skip_all)]
    pub fn write_report(
        &self,
        config: &GcForestConfig,
        report: &GrowthReport,
        n_samples: usize,
        n_features: usize,
    ) -> Result<PathBuf, IoError> {
        let path = self.file_path("report.json");
        let artifact = ReportArtifact {
            experiment: self.experiment.as_str(),
            n_samples,
            n_features,
            outcome: report.outcome,
            best_layer: report.best_layer,
            retained_layers: report.retained_layers,
            layers: &report.layers,
            config,
        };
        write_json(&path, &artifact)?;
        info!(path = %path.display(), "growth report written");
        Ok(path)
    }

    /// Write per-row predictions to `{experiment}_predictions.json`.
    ///
    /// Each row lists its predicted class and its `top_k` most probable
    /// classes. When `labels` are given, each row also carries its true
    /// label and the file records overall accuracy. Returns the path written.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::SerializeJson`] | the predictions could not be encoded |
    /// | [`IoError::WriteFile`] | the file could not be written |
    #[instrument(skip_all, fields(n_rows = probas.len(), top_k = top_k))]
    pub fn write_predictions(
        &self,
        probas: &[Vec<f64>],
        top_k: usize,
        labels: Option<&[usize]>,
    ) -> Result<PathBuf, IoError> {
        let path = self.file_path("predictions.json");

        let predictions: Vec<PredictionEntry> = probas
            .iter()
            .enumerate()
            .map(|(row, proba)| PredictionEntry {
                row,
                predicted_class: argmax(proba),
                label: labels.and_then(|l| l.get(row).copied()),
                top_k: top_classes(proba, top_k),
            })
            .collect();

        let accuracy = labels.filter(|l| !l.is_empty()).map(|l| {
            let correct = predictions
                .iter()
                .filter(|p| p.label == Some(p.predicted_class))
                .count();
            correct as f64 / l.len() as f64
        });

        let artifact = PredictArtifact {
            experiment: self.experiment.as_str(),
            n_rows: probas.len(),
            accuracy,
            predictions,
        };
        write_json(&path, &artifact)?;
        info!(path = %path.display(), ?accuracy, "predictions written");
        Ok(path)
    }

    /// Return the path where the model binary should be saved.
    ///
    /// Does not write anything; just computes `{output_dir}/{experiment}_model.bin`.
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.file_path("model.bin")
    }

    fn file_path(&self, suffix: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{suffix}", self.experiment.as_str()))
    }
}

/// Classes ordered by descending probability, lowest index first on ties.
fn top_classes(proba: &[f64], k: usize) -> Vec<PredictionClass> {
    let mut order: Vec<usize> = (0..proba.len()).collect();
    order.sort_by(|&a, &b| proba[b].total_cmp(&proba[a]).then(a.cmp(&b)));
    order
        .into_iter()
        .take(k)
        .map(|class| PredictionClass {
            class,
            probability: proba[class],
        })
        .collect()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), IoError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| IoError::SerializeJson {
        path: path.to_path_buf(),
        source: e,
    })?;
    fs::write(path, &json).map_err(|e| IoError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

// --- Shadow structs for JSON serialization ---

#[derive(Serialize)]
struct ReportArtifact<'a> {
    experiment: &'a str,
    n_samples: usize,
    n_features: usize,
    outcome: GrowthOutcome,
    best_layer: usize,
    retained_layers: usize,
    layers: &'a [LayerReport],
    config: &'a GcForestConfig,
}

#[derive(Serialize)]
struct PredictArtifact<'a> {
    experiment: &'a str,
    n_rows: usize,
    accuracy: Option<f64>,
    predictions: Vec<PredictionEntry>,
}

#[derive(Serialize)]
struct PredictionEntry {
    row: usize,
    predicted_class: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<usize>,
    top_k: Vec<PredictionClass>,
}

#[derive(Serialize)]
struct PredictionClass {
    class: usize,
    probability: f64,
}
