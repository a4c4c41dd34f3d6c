//! Pipeline orchestration
//!
//! This module provides the public API for Synheart Nudge. It defines the
//! fitted `InterventionPipeline` (preprocessing + calibrated booster) and runs
//! the full training flow from CSV to the native and ONNX artifacts.

use crate::config::{BoosterParams, CalibrationParams, TrainConfig};
use crate::dataset::load_csv;
use crate::error::TrainError;
use crate::export::write_onnx;
use crate::features::FeatureDeriver;
use crate::model::CalibratedClassifier;
use crate::preprocess::Preprocessor;
use crate::split::train_test_split;
use crate::types::{positive_rate, FeatureFrame, UsageTable};
use crate::{NUDGE_VERSION, PRODUCER_NAME};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Version of the native model document layout
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Provenance and shape of a fitted pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub format_version: u32,
    pub producer: String,
    pub producer_version: String,
    pub model_id: String,
    pub trained_at: DateTime<Utc>,
    pub numeric_features: Vec<String>,
    pub categorical_feature: String,
    /// Class labels in probability column order
    pub classes: Vec<u8>,
    pub train_rows: usize,
    /// Rows held out for the accuracy check (0 when fitted directly)
    pub test_rows: usize,
    pub positive_rate: f64,
    pub test_accuracy: Option<f64>,
}

/// Fitted preprocessing + calibrated gradient boosting pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionPipeline {
    pub metadata: ModelMetadata,
    pub preprocessor: Preprocessor,
    pub classifier: CalibratedClassifier,
}

impl InterventionPipeline {
    /// Fit preprocessing and the calibrated classifier on one frame
    pub fn fit(
        frame: &FeatureFrame,
        labels: &[u8],
        booster: &BoosterParams,
        calibration: &CalibrationParams,
    ) -> Result<Self, TrainError> {
        if frame.n_rows() != labels.len() {
            return Err(TrainError::ShapeMismatch(format!(
                "{} rows but {} labels",
                frame.n_rows(),
                labels.len()
            )));
        }

        let preprocessor = Preprocessor::fit(frame)?;
        let x = preprocessor.transform(frame)?;
        let classifier = CalibratedClassifier::fit(&x, labels, booster, calibration)?;

        let metadata = ModelMetadata {
            format_version: MODEL_FORMAT_VERSION,
            producer: PRODUCER_NAME.to_string(),
            producer_version: NUDGE_VERSION.to_string(),
            model_id: Uuid::new_v4().to_string(),
            trained_at: Utc::now(),
            numeric_features: preprocessor.numeric_features.clone(),
            categorical_feature: preprocessor.categorical_feature.clone(),
            classes: vec![0, 1],
            train_rows: frame.n_rows(),
            test_rows: 0,
            positive_rate: positive_rate(labels),
            test_accuracy: None,
        };

        Ok(Self {
            metadata,
            preprocessor,
            classifier,
        })
    }

    /// `[p(0), p(1)]` per row
    pub fn predict_proba(&self, frame: &FeatureFrame) -> Result<Vec<[f64; 2]>, TrainError> {
        let x = self.preprocessor.transform(frame)?;
        Ok(self.classifier.predict_proba(&x))
    }

    /// Most probable class per row; an exact tie resolves to 0
    pub fn predict(&self, frame: &FeatureFrame) -> Result<Vec<u8>, TrainError> {
        Ok(self
            .predict_proba(frame)?
            .iter()
            .map(|p| u8::from(p[1] > p[0]))
            .collect())
    }

    /// Accuracy of `predict` against the labels
    pub fn score(&self, frame: &FeatureFrame, labels: &[u8]) -> Result<f64, TrainError> {
        if frame.n_rows() != labels.len() {
            return Err(TrainError::ShapeMismatch(format!(
                "{} rows but {} labels",
                frame.n_rows(),
                labels.len()
            )));
        }
        if labels.is_empty() {
            return Err(TrainError::InsufficientData(
                "cannot score zero rows".to_string(),
            ));
        }
        let predicted = self.predict(frame)?;
        let correct = predicted.iter().zip(labels).filter(|(p, y)| p == y).count();
        Ok(correct as f64 / labels.len() as f64)
    }

    /// Structural checks for a loaded document
    pub fn validate(&self) -> Result<(), TrainError> {
        self.classifier
            .validate()
            .map_err(TrainError::NotFitted)?;
        let width = self.preprocessor.output_width();
        let expected = self.classifier.folds[0].booster.n_features;
        if width != expected {
            return Err(TrainError::ShapeMismatch(format!(
                "preprocessor emits {} columns but the classifier expects {}",
                width, expected
            )));
        }
        self.preprocessor
            .scaler
            .validate(self.preprocessor.numeric_features.len())
            .map_err(TrainError::ShapeMismatch)?;
        self.preprocessor
            .encoder
            .validate()
            .map_err(TrainError::ShapeMismatch)?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, TrainError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, TrainError> {
        let pipeline: Self = serde_json::from_str(json)?;
        pipeline.validate()?;
        Ok(pipeline)
    }

    /// Write the native model document
    pub fn save_json(&self, path: &Path) -> Result<(), TrainError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read and validate a native model document
    pub fn load_json(path: &Path) -> Result<Self, TrainError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// Summary of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model_id: String,
    pub rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub positive_rate: f64,
    pub numeric_features: Vec<String>,
    pub categorical_feature: String,
    pub categories: Vec<String>,
    pub test_accuracy: f64,
    pub model_path: PathBuf,
    pub onnx_path: Option<PathBuf>,
}

/// Derive features, split, fit, and score on an in-memory table.
///
/// The returned pipeline's metadata carries the held-out accuracy.
pub fn train_table(
    mut table: UsageTable,
    config: &TrainConfig,
) -> Result<InterventionPipeline, TrainError> {
    config.validate()?;

    FeatureDeriver::derive(&mut table, &config.dataset, &config.features)?;
    let (frame, labels) = FeatureFrame::from_table(&table, &config.dataset)?;
    info!(
        rows = frame.n_rows(),
        numeric_features = frame.n_numeric(),
        positive_rate = positive_rate(&labels),
        "derived features"
    );

    let split = train_test_split(&labels, config.split.test_size, config.split.seed)?;
    let train_frame = frame.select(&split.train);
    let test_frame = frame.select(&split.test);
    let train_labels: Vec<u8> = split.train.iter().map(|&i| labels[i]).collect();
    let test_labels: Vec<u8> = split.test.iter().map(|&i| labels[i]).collect();
    info!(
        train_rows = split.train.len(),
        test_rows = split.test.len(),
        "split dataset"
    );

    let mut pipeline = InterventionPipeline::fit(
        &train_frame,
        &train_labels,
        &config.booster,
        &config.calibration,
    )?;
    info!(
        folds = pipeline.classifier.folds.len(),
        stages = config.booster.n_estimators,
        "fitted calibrated booster"
    );

    let accuracy = pipeline.score(&test_frame, &test_labels)?;
    pipeline.metadata.test_rows = test_labels.len();
    pipeline.metadata.test_accuracy = Some(accuracy);
    info!(accuracy, "scored held-out rows");

    Ok(pipeline)
}

/// Run the full training flow described by the config and write both artifacts
pub fn train_from_csv(config: &TrainConfig) -> Result<TrainingReport, TrainError> {
    config.validate()?;

    let table = load_csv(&config.input, &config.dataset)?;
    let rows = table.n_rows();
    let pipeline = train_table(table, config)?;

    pipeline.save_json(&config.model_out)?;
    info!(path = %config.model_out.display(), "saved native model");

    if let Some(onnx_path) = &config.onnx_out {
        write_onnx(&pipeline, &config.onnx, onnx_path)?;
        info!(path = %onnx_path.display(), "exported ONNX model");
    }

    let metadata = &pipeline.metadata;
    Ok(TrainingReport {
        model_id: metadata.model_id.clone(),
        rows,
        train_rows: metadata.train_rows,
        test_rows: metadata.test_rows,
        positive_rate: metadata.positive_rate,
        numeric_features: metadata.numeric_features.clone(),
        categorical_feature: metadata.categorical_feature.clone(),
        categories: pipeline.preprocessor.encoder.categories.clone(),
        test_accuracy: metadata.test_accuracy.unwrap_or_default(),
        model_path: config.model_out.clone(),
        onnx_path: config.onnx_out.clone(),
    })
}
