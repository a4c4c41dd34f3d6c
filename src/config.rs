//! Training configuration
//!
//! Every field has a default matching the reference training run, so an empty
//! JSON object (`{}`) is a complete configuration.

use crate::error::TrainError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default training data file
pub const DEFAULT_INPUT: &str = "Realistic_Phone_Usage_Dataset__2000_Rows_.csv";

/// Default native model output path
pub const DEFAULT_MODEL_OUT: &str = "phone_usage_model.json";

/// Default ONNX output path
pub const DEFAULT_ONNX_OUT: &str = "phone_usage_model.onnx";

/// Top-level configuration for a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// CSV file with one row per 15-minute usage window
    pub input: PathBuf,
    /// Where the native (JSON) pipeline document is written
    pub model_out: PathBuf,
    /// Where the ONNX graph is written (`None` skips the export)
    pub onnx_out: Option<PathBuf>,
    pub dataset: DatasetConfig,
    pub features: FeatureConfig,
    pub split: SplitConfig,
    pub booster: BoosterParams,
    pub calibration: CalibrationParams,
    pub onnx: OnnxOptions,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            model_out: PathBuf::from(DEFAULT_MODEL_OUT),
            onnx_out: Some(PathBuf::from(DEFAULT_ONNX_OUT)),
            dataset: DatasetConfig::default(),
            features: FeatureConfig::default(),
            split: SplitConfig::default(),
            booster: BoosterParams::default(),
            calibration: CalibrationParams::default(),
            onnx: OnnxOptions::default(),
        }
    }
}

impl TrainConfig {
    /// Parse a configuration from JSON, filling unspecified fields with defaults
    pub fn from_json(json: &str) -> Result<Self, TrainError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_json_file(path: &Path) -> Result<Self, TrainError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check value ranges that would otherwise fail deep inside training
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.split.test_size <= 0.0 || self.split.test_size >= 1.0 || self.split.test_size.is_nan() {
            return Err(TrainError::ConfigError(format!(
                "split.test_size must be in (0, 1), got {}",
                self.split.test_size
            )));
        }
        if self.features.zero_guard == 0.0 || !self.features.zero_guard.is_finite() {
            return Err(TrainError::ConfigError(
                "features.zero_guard must be a finite non-zero number".to_string(),
            ));
        }
        if self.booster.n_estimators == 0 {
            return Err(TrainError::ConfigError(
                "booster.n_estimators must be at least 1".to_string(),
            ));
        }
        if self.booster.learning_rate <= 0.0 || !self.booster.learning_rate.is_finite() {
            return Err(TrainError::ConfigError(format!(
                "booster.learning_rate must be positive, got {}",
                self.booster.learning_rate
            )));
        }
        if self.booster.max_depth == 0 {
            return Err(TrainError::ConfigError(
                "booster.max_depth must be at least 1".to_string(),
            ));
        }
        if self.booster.min_samples_leaf == 0 || self.booster.min_samples_split < 2 {
            return Err(TrainError::ConfigError(
                "booster.min_samples_leaf must be >= 1 and min_samples_split >= 2".to_string(),
            ));
        }
        if self.calibration.folds < 2 {
            return Err(TrainError::ConfigError(format!(
                "calibration.folds must be at least 2, got {}",
                self.calibration.folds
            )));
        }
        Ok(())
    }
}

/// Column roles in the input table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Column parsed as a timestamp
    pub datetime_column: String,
    /// Binary target column
    pub target_column: String,
    /// The single one-hot encoded column
    pub categorical_column: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            datetime_column: "datetime".to_string(),
            target_column: "intervene".to_string(),
            categorical_column: "top_app_category".to_string(),
        }
    }
}

/// Source columns for the derived rate features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Usage duration used as the rate denominator
    pub usage_column: String,
    pub unlocks_column: String,
    pub switches_column: String,
    pub scroll_column: String,
    /// Substituted for a denominator that is exactly zero
    pub zero_guard: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            usage_column: "recent_15min_usage".to_string(),
            unlocks_column: "unlocks_15min".to_string(),
            switches_column: "app_switches_15min".to_string(),
            scroll_column: "scroll_length".to_string(),
            zero_guard: 0.1,
        }
    }
}

/// Held-out split parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Fraction of rows held out for the accuracy check
    pub test_size: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            seed: 42,
        }
    }
}

/// Gradient boosting hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoosterParams {
    /// Number of boosting stages
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Seed for the per-node feature permutation
    pub seed: u64,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

/// Sigmoid calibration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    /// Number of stratified cross-validation folds
    pub folds: usize,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self { folds: 5 }
    }
}

/// ONNX export options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnnxOptions {
    /// Opset for the default (`ai.onnx`) domain
    pub target_opset: i64,
    /// Opset for the `ai.onnx.ml` domain
    pub ml_opset: i64,
    pub graph_name: String,
}

impl Default for OnnxOptions {
    fn default() -> Self {
        Self {
            target_opset: 15,
            ml_opset: 1,
            graph_name: "phone_usage_pipeline".to_string(),
        }
    }
}
