//! CSV loading, validation, and JSON result writing for the gcforest pipeline.

mod domain;
mod error;
mod reader;
mod writer;

pub use domain::{ExperimentName, LabeledDataset};
pub use error::IoError;
pub use reader::LabeledCsvReader;
pub use writer::ResultWriter;
