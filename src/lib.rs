//! Synheart Nudge - Phone usage intervention classifier
//!
//! Nudge trains a binary classifier that decides whether a phone usage
//! intervention is warranted, through a deterministic pipeline: CSV loading →
//! feature derivation → stratified split → preprocessing → calibrated
//! gradient boosting → native (JSON) and ONNX export.
//!
//! ## Modules
//!
//! - **Training**: `train_from_csv` runs the whole flow from a `TrainConfig`
//! - **Inference**: `InterventionPipeline` scores feature frames in-process
//! - **Export**: `export_onnx` encodes a fitted pipeline for on-device runtimes

pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod split;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::{OnnxOptions, TrainConfig};
pub use error::TrainError;
pub use export::export_onnx;
pub use pipeline::{train_from_csv, InterventionPipeline, ModelMetadata, TrainingReport};
pub use types::{FeatureFrame, UsageTable};

/// Nudge version embedded in exported models
pub const NUDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for exported models
pub const PRODUCER_NAME: &str = "synheart-nudge";
