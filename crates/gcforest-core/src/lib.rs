//! Deep forest classification: multi-grained scanning and cascade forests.
//!
//! A cascade stacks layers of random and completely-random forests. Each
//! layer is cross-validated so the class probabilities it appends to the
//! next layer's input are out-of-fold, and growth stops once the layer score
//! stops improving; the model keeps the best-scoring prefix. Optional
//! sliding-window scanning turns sequences or images into per-window class
//! probability features before the cascade.

mod cancel;
mod cascade;
mod config;
mod crossval;
mod error;
mod folds;
mod growth;
mod layer;
mod metrics;
mod model;
mod persist;
mod scan;
mod seed;
mod unit;
mod window;

pub use cancel::CancellationToken;
pub use cascade::{GcForestFit, GrowthReport, LayerReport, Trainer};
pub use config::{DataStyle, GcForestConfig, GcForestConfigBuilder};
pub use error::{ErrorKind, GcForestError};
pub use folds::{FoldPlan, stratified_holdout};
pub use gcforest_rf::MaxFeatures;
pub use growth::{EarlyStopping, GrowthDecision, GrowthOutcome};
pub use layer::{CascadeLayer, LayerFit};
pub use metrics::{accuracy, argmax, mean_rows};
pub use model::{GcForestModel, InputShape};
pub use scan::{FittedScanner, FittedWindow, MultiGrainScanner};
pub use unit::{ForestKind, ForestUnit, ForestUnitSpec};
pub use window::{InstanceLayout, Placement, WindowConfig, extract, placements};
