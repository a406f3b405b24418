use std::path::PathBuf;

use gcforest_rf::RfError;

use crate::model::GcForestModel;

/// Broad category of a [`GcForestError`], for callers that only need to
/// decide whether to fix their input, retry, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or contradictory hyperparameters, or data that cannot satisfy them.
    Configuration,
    /// Feature width mismatch between fit and predict.
    Shape,
    /// A training stage could not produce a model.
    Training,
    /// Training was aborted through a cancellation token.
    Cancelled,
    /// Saving or loading a model failed.
    Persistence,
}

/// Errors from scanning, cascade growth, prediction, and persistence.
#[derive(Debug, thiserror::Error)]
pub enum GcForestError {
    // --- Configuration ---
    /// Returned when a cascade layer would have no forest units.
    #[error("a cascade layer needs at least one forest unit, got rf_num={rf_num}, crf_num={crf_num}")]
    InvalidUnitCount {
        /// Random-forest units per layer.
        rf_num: usize,
        /// Completely-random-forest units per layer.
        crf_num: usize,
    },

    /// Returned when a forest tree count is zero.
    #[error("{stage} forests need at least 1 tree, got {n_trees}")]
    InvalidTreeCount {
        /// Which stage the tree count belongs to (`scan` or `cascade`).
        stage: &'static str,
        /// The invalid tree count.
        n_trees: usize,
    },

    /// Returned when fewer than two cross-validation folds are configured.
    #[error("n_folds must be at least 2, got {n_folds}")]
    InvalidFoldCount {
        /// The invalid fold count.
        n_folds: usize,
    },

    /// Returned when max_iteration is zero.
    #[error("max_iteration must be at least 1, got {max_iteration}")]
    InvalidMaxIteration {
        /// The invalid max_iteration.
        max_iteration: usize,
    },

    /// Returned when a scan window has zero size or zero stride.
    #[error("scan window needs size >= 1 and stride >= 1, got size={size}, stride={stride}")]
    InvalidWindow {
        /// Window size.
        size: usize,
        /// Window stride.
        stride: usize,
    },

    /// Returned when max_bins is below 2.
    #[error("max_bins must be at least 2, got {max_bins}")]
    InvalidMaxBins {
        /// The invalid bin count.
        max_bins: usize,
    },

    /// Returned when max_depth is `Some(0)`.
    #[error("max_depth must be at least 1 when set")]
    InvalidMaxDepth,

    /// Returned when a min-instances-per-node value is zero.
    #[error("{stage} min_instances_per_node must be at least 1, got {min_instances}")]
    InvalidMinInstances {
        /// Which stage the value belongs to (`scan` or `cascade`).
        stage: &'static str,
        /// The invalid value.
        min_instances: usize,
    },

    /// Returned when min_info_gain is negative or not finite.
    #[error("min_info_gain must be a finite value >= 0.0, got {min_info_gain}")]
    InvalidMinInfoGain {
        /// The invalid value.
        min_info_gain: f64,
    },

    /// Returned when a feature-subset strategy can never resolve to a valid count.
    #[error("{stage} feature subset strategy {strategy} is invalid: {reason}")]
    InvalidFeatureSubset {
        /// Which forest flavour uses the strategy.
        stage: &'static str,
        /// The strategy, debug-formatted.
        strategy: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Returned when validation_fraction is outside (0, 1).
    #[error("validation_fraction must be in (0, 1), got {fraction}")]
    InvalidValidationFraction {
        /// The invalid fraction.
        fraction: f64,
    },

    /// Returned when the fixed class count is below 2.
    #[error("n_classes must be at least 2, got {n_classes}")]
    InvalidClassCount {
        /// The invalid class count.
        n_classes: usize,
    },

    /// Returned when an image data style has a zero dimension.
    #[error("image data style needs rows >= 1 and cols >= 1, got {rows}x{cols}")]
    InvalidImageShape {
        /// Image rows.
        rows: usize,
        /// Image columns.
        cols: usize,
    },

    /// Returned when a scan window does not fit inside any training instance.
    #[error("scan window of size {size} is larger than every instance (largest extent {max_extent})")]
    WindowTooLarge {
        /// Window size.
        size: usize,
        /// Largest instance extent seen (length, or the smaller image side).
        max_extent: usize,
    },

    /// Returned when an image row does not have `rows * cols` values.
    #[error("sample {sample_index} has {width} values, image style expects {rows}x{cols}")]
    ImageWidthMismatch {
        /// Image rows.
        rows: usize,
        /// Image columns.
        cols: usize,
        /// Actual row width.
        width: usize,
        /// Offending sample.
        sample_index: usize,
    },

    /// Returned when the training set has zero rows.
    #[error("training dataset has zero samples")]
    EmptyDataset,

    /// Returned when a row has no feature values.
    #[error("sample {sample_index} has zero feature values")]
    ZeroFeatures {
        /// Offending sample.
        sample_index: usize,
    },

    /// Returned when labels do not line up with feature rows.
    #[error("got {n_labels} labels for {n_rows} feature rows")]
    LabelCountMismatch {
        /// Number of feature rows.
        n_rows: usize,
        /// Number of labels.
        n_labels: usize,
    },

    /// Returned when a label is not below the class count.
    #[error("label {label} at sample {sample_index} is out of range for {n_classes} classes")]
    LabelOutOfRange {
        /// The offending label.
        label: usize,
        /// The class count.
        n_classes: usize,
        /// Offending sample.
        sample_index: usize,
    },

    /// Returned when the training labels contain fewer than two distinct classes.
    #[error("training labels contain {n_distinct} distinct class(es), need at least 2")]
    TooFewClasses {
        /// Number of distinct labels present.
        n_distinct: usize,
    },

    /// Returned when there are fewer rows than cross-validation folds.
    #[error("{stage} has {n_rows} rows, fewer than n_folds={n_folds}")]
    TooFewRows {
        /// Which stage ran out of rows.
        stage: String,
        /// Available rows.
        n_rows: usize,
        /// Configured folds.
        n_folds: usize,
    },

    /// Returned when a feature value is NaN or infinite.
    #[error("non-finite value at sample {sample_index}, feature {feature_index}")]
    NonFiniteValue {
        /// Offending sample.
        sample_index: usize,
        /// Offending feature.
        feature_index: usize,
    },

    /// Returned when accuracy would be computed over zero rows.
    #[error("validation set is empty")]
    EmptyValidationSet,

    // --- Shape ---
    /// Returned when a row's width differs from the width recorded at fit time.
    #[error("sample {sample_index} has {got} features, expected {expected}")]
    FeatureWidthMismatch {
        /// Expected width.
        expected: usize,
        /// Actual width.
        got: usize,
        /// Offending sample.
        sample_index: usize,
    },

    /// Returned when a ragged sequence is outside the length range seen at fit time.
    #[error("sample {sample_index} has length {got}, expected between {min_len} and {max_len}")]
    SequenceLengthOutOfRange {
        /// Shortest training sequence.
        min_len: usize,
        /// Longest training sequence.
        max_len: usize,
        /// Actual length.
        got: usize,
        /// Offending sample.
        sample_index: usize,
    },

    // --- Training ---
    /// Returned when a training set holds fewer than two classes.
    #[error("{stage}: training set of {n_rows} rows has {n_distinct} distinct class(es)")]
    DegenerateTrainingSet {
        /// Stage being trained.
        stage: String,
        /// Rows in the training set.
        n_rows: usize,
        /// Distinct labels present.
        n_distinct: usize,
    },

    /// Returned when a fold's training complement stays single-class after the retry.
    #[error("{stage}: fold {fold} leaves a training set with {n_distinct} distinct class(es) after reshuffling")]
    DegenerateFold {
        /// Stage being trained.
        stage: String,
        /// The degenerate fold.
        fold: usize,
        /// Distinct labels in the fold's training complement.
        n_distinct: usize,
    },

    /// Wraps an error from the tree-ensemble trainer.
    #[error("forest training failed: {0}")]
    Forest(#[from] RfError),

    /// Returned when fitting a cascade layer fails. Carries the model made of
    /// the layers completed before it, when there are any. Its kind is the
    /// kind of `source`.
    #[error("cascade layer {layer} failed: {source}")]
    LayerFailed {
        /// One-based index of the failed layer.
        layer: usize,
        /// The underlying failure.
        source: Box<GcForestError>,
        /// Usable model built from the layers completed before the failure.
        partial: Option<Box<GcForestModel>>,
    },

    // --- Cancelled ---
    /// Returned when training is cancelled through a [`crate::CancellationToken`].
    #[error("training cancelled after {completed_layers} completed layer(s)")]
    Cancelled {
        /// Layers completed before cancellation.
        completed_layers: usize,
        /// Usable model built from the completed layers, when there are any.
        partial: Option<Box<GcForestModel>>,
    },

    // --- Persistence ---
    /// Returned when bincode serialization fails.
    #[error("failed to serialize model: {source}")]
    SerializeModel {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when writing the model file fails.
    #[error("failed to write model to {path}: {source}")]
    WriteModel {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when reading the model file fails.
    #[error("failed to read model from {path}: {source}")]
    ReadModel {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when bincode deserialization fails.
    #[error("failed to deserialize model from {path}: {source}")]
    DeserializeModel {
        /// The file path.
        path: PathBuf,
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when the model file was written by an incompatible format version.
    #[error("incompatible model version in {path}: expected {expected}, found {found}")]
    IncompatibleModelVersion {
        /// The expected format version.
        expected: u32,
        /// The version found in the file.
        found: u32,
        /// The file path.
        path: PathBuf,
    },
}

impl GcForestError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            GcForestError::InvalidUnitCount { .. }
            | GcForestError::InvalidTreeCount { .. }
            | GcForestError::InvalidFoldCount { .. }
            | GcForestError::InvalidMaxIteration { .. }
            | GcForestError::InvalidWindow { .. }
            | GcForestError::InvalidMaxBins { .. }
            | GcForestError::InvalidMaxDepth
            | GcForestError::InvalidMinInstances { .. }
            | GcForestError::InvalidMinInfoGain { .. }
            | GcForestError::InvalidFeatureSubset { .. }
            | GcForestError::InvalidValidationFraction { .. }
            | GcForestError::InvalidClassCount { .. }
            | GcForestError::InvalidImageShape { .. }
            | GcForestError::WindowTooLarge { .. }
            | GcForestError::ImageWidthMismatch { .. }
            | GcForestError::EmptyDataset
            | GcForestError::ZeroFeatures { .. }
            | GcForestError::LabelCountMismatch { .. }
            | GcForestError::LabelOutOfRange { .. }
            | GcForestError::TooFewClasses { .. }
            | GcForestError::TooFewRows { .. }
            | GcForestError::NonFiniteValue { .. }
            | GcForestError::EmptyValidationSet => ErrorKind::Configuration,
            GcForestError::FeatureWidthMismatch { .. }
            | GcForestError::SequenceLengthOutOfRange { .. } => ErrorKind::Shape,
            GcForestError::DegenerateTrainingSet { .. }
            | GcForestError::DegenerateFold { .. }
            | GcForestError::Forest(_) => ErrorKind::Training,
            GcForestError::LayerFailed { source, .. } => source.kind(),
            GcForestError::Cancelled { .. } => ErrorKind::Cancelled,
            GcForestError::SerializeModel { .. }
            | GcForestError::WriteModel { .. }
            | GcForestError::ReadModel { .. }
            | GcForestError::DeserializeModel { .. }
            | GcForestError::IncompatibleModelVersion { .. } => ErrorKind::Persistence,
        }
    }

    /// Take the partially trained model out of a [`GcForestError::LayerFailed`]
    /// or [`GcForestError::Cancelled`] error.
    #[must_use]
    pub fn into_partial(self) -> Option<GcForestModel> {
        match self {
            GcForestError::LayerFailed { partial, .. } | GcForestError::Cancelled { partial, .. } => {
                partial.map(|m| *m)
            }
            _ => None,
        }
    }
}
