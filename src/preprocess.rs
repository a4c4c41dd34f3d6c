//! Preprocessing transformer
//!
//! Standardizes the numeric block and one-hot encodes the categorical column.
//! The transformed row is the scaled numeric values followed by the indicator
//! vector.

use crate::error::TrainError;
use crate::types::FeatureFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Per-column standardization with training mean and population deviation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    /// Divisor per column; a constant column keeps 1.0
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit on row-major data with `n_features` columns
    pub fn fit(rows: &[Vec<f64>], n_features: usize) -> Result<Self, TrainError> {
        if rows.is_empty() {
            return Err(TrainError::InsufficientData(
                "cannot fit scaler on zero rows".to_string(),
            ));
        }
        let n = rows.len() as f64;

        let mut mean = vec![0.0; n_features];
        for row in rows {
            for (acc, v) in mean.iter_mut().zip(row) {
                *acc += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut variance = vec![0.0; n_features];
        for row in rows {
            for ((acc, v), m) in variance.iter_mut().zip(row).zip(&mean) {
                *acc += (v - m).powi(2);
            }
        }

        let scale = variance
            .into_iter()
            .map(|var| {
                let std = (var / n).sqrt();
                if std == 0.0 || !std.is_finite() {
                    1.0
                } else {
                    std
                }
            })
            .collect();

        Ok(Self { mean, scale })
    }

    /// Statistics must cover `n_features` columns with finite, positive scales
    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.mean.len() != n_features || self.scale.len() != n_features {
            return Err(format!(
                "scaler has {} means and {} scales for {} features",
                self.mean.len(),
                self.scale.len(),
                n_features
            ));
        }
        if let Some(idx) = self.scale.iter().position(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(format!("scale {} is {}", idx, self.scale[idx]));
        }
        Ok(())
    }

    pub fn transform_row(&self, row: &[f64], out: &mut Vec<f64>) {
        out.extend(
            row.iter()
                .zip(self.mean.iter().zip(&self.scale))
                .map(|(v, (m, s))| (v - m) / s),
        );
    }
}

/// One-hot encoder over the sorted distinct training values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    pub categories: Vec<String>,
}

impl OneHotEncoder {
    pub fn fit(values: &[String]) -> Self {
        let categories: BTreeSet<&String> = values.iter().collect();
        Self {
            categories: categories.into_iter().cloned().collect(),
        }
    }

    /// Categories must be strictly ascending for the lookup in `transform_value`
    pub fn validate(&self) -> Result<(), String> {
        match self.categories.windows(2).position(|w| w[0] >= w[1]) {
            Some(idx) => Err(format!(
                "categories are not sorted and distinct at '{}', '{}'",
                self.categories[idx],
                self.categories[idx + 1]
            )),
            None => Ok(()),
        }
    }

    /// Append the indicator vector; an unseen value yields all zeros
    pub fn transform_value(&self, value: &str, out: &mut Vec<f64>) {
        let hit = self
            .categories
            .binary_search_by(|c| c.as_str().cmp(value))
            .ok();
        out.extend((0..self.categories.len()).map(|i| if Some(i) == hit { 1.0 } else { 0.0 }));
    }
}

/// Column transformer: scaled numeric block followed by the one-hot block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    pub numeric_features: Vec<String>,
    pub categorical_feature: String,
    pub scaler: StandardScaler,
    pub encoder: OneHotEncoder,
}

impl Preprocessor {
    pub fn fit(frame: &FeatureFrame) -> Result<Self, TrainError> {
        let scaler = StandardScaler::fit(&frame.numeric, frame.n_numeric())?;
        let encoder = OneHotEncoder::fit(&frame.categories);
        Ok(Self {
            numeric_features: frame.numeric_names.clone(),
            categorical_feature: frame.categorical_name.clone(),
            scaler,
            encoder,
        })
    }

    /// Width of a transformed row
    pub fn output_width(&self) -> usize {
        self.numeric_features.len() + self.encoder.categories.len()
    }

    /// Names of the transformed columns
    pub fn output_names(&self) -> Vec<String> {
        self.numeric_features
            .iter()
            .cloned()
            .chain(
                self.encoder
                    .categories
                    .iter()
                    .map(|c| format!("{}_{}", self.categorical_feature, c)),
            )
            .collect()
    }

    /// Transform a frame whose numeric columns match the fitted ones
    pub fn transform(&self, frame: &FeatureFrame) -> Result<Vec<Vec<f64>>, TrainError> {
        if frame.numeric_names != self.numeric_features {
            return Err(TrainError::ShapeMismatch(format!(
                "expected numeric features {:?}, got {:?}",
                self.numeric_features, frame.numeric_names
            )));
        }

        let width = self.output_width();
        Ok(frame
            .numeric
            .iter()
            .zip(&frame.categories)
            .map(|(numeric, category)| {
                let mut row = Vec::with_capacity(width);
                self.scaler.transform_row(numeric, &mut row);
                self.encoder.transform_value(category, &mut row);
                row
            })
            .collect())
    }
}
