//! Core data types for Synheart Nudge
//!
//! `UsageTable` is the column-oriented table produced by the CSV loader and
//! extended by the feature deriver. `FeatureFrame` is the row-oriented model
//! input: the numeric feature block plus the single categorical column.

use crate::config::DatasetConfig;
use crate::error::TrainError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Values of a single table column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<f64>),
    Text(Vec<String>),
    Timestamp(Vec<NaiveDateTime>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short type name used in error messages and schema output
    pub fn kind(&self) -> &'static str {
        match self {
            ColumnData::Numeric(_) => "numeric",
            ColumnData::Text(_) => "text",
            ColumnData::Timestamp(_) => "timestamp",
        }
    }
}

/// A named column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn text(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Text(values),
        }
    }

    pub fn timestamp(name: impl Into<String>, values: Vec<NaiveDateTime>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Timestamp(values),
        }
    }
}

/// Column-oriented table of usage windows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageTable {
    columns: Vec<Column>,
    n_rows: usize,
}

impl UsageTable {
    /// Build a table, checking that all columns have the same length
    pub fn from_columns(columns: Vec<Column>) -> Result<Self, TrainError> {
        let n_rows = columns.first().map(|c| c.data.len()).unwrap_or(0);
        for column in &columns {
            if column.data.len() != n_rows {
                return Err(TrainError::ShapeMismatch(format!(
                    "column '{}' has {} rows, expected {}",
                    column.name,
                    column.data.len(),
                    n_rows
                )));
            }
        }
        Ok(Self { columns, n_rows })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Numeric values of a column, or an error naming the problem
    pub fn numeric(&self, name: &str) -> Result<&[f64], TrainError> {
        match self.column(name).map(|c| &c.data) {
            Some(ColumnData::Numeric(values)) => Ok(values),
            Some(other) => Err(TrainError::NumericParseError(format!(
                "column '{}' is {}, expected numeric",
                name,
                other.kind()
            ))),
            None => Err(TrainError::MissingColumn(name.to_string())),
        }
    }

    /// Timestamp values of a column
    pub fn timestamps(&self, name: &str) -> Result<&[NaiveDateTime], TrainError> {
        match self.column(name).map(|c| &c.data) {
            Some(ColumnData::Timestamp(values)) => Ok(values),
            Some(other) => Err(TrainError::DateParseError(format!(
                "column '{}' is {}, expected timestamp",
                name,
                other.kind()
            ))),
            None => Err(TrainError::MissingColumn(name.to_string())),
        }
    }

    /// Insert a column, replacing an existing column of the same name in place
    pub fn set_column(&mut self, column: Column) -> Result<(), TrainError> {
        if !self.columns.is_empty() && column.data.len() != self.n_rows {
            return Err(TrainError::ShapeMismatch(format!(
                "column '{}' has {} rows, expected {}",
                column.name,
                column.data.len(),
                self.n_rows
            )));
        }
        if self.columns.is_empty() {
            self.n_rows = column.data.len();
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(())
    }
}

/// Model input: numeric feature block and the categorical column, row-aligned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    /// Names of the numeric features, in column order
    pub numeric_names: Vec<String>,
    /// Row-major numeric values, `numeric[row][feature]`
    pub numeric: Vec<Vec<f64>>,
    /// Name of the categorical feature
    pub categorical_name: String,
    /// Categorical value per row
    pub categories: Vec<String>,
}

impl FeatureFrame {
    /// Build a frame, checking row and column counts
    pub fn new(
        numeric_names: Vec<String>,
        numeric: Vec<Vec<f64>>,
        categorical_name: String,
        categories: Vec<String>,
    ) -> Result<Self, TrainError> {
        if numeric.len() != categories.len() {
            return Err(TrainError::ShapeMismatch(format!(
                "{} numeric rows but {} categorical values",
                numeric.len(),
                categories.len()
            )));
        }
        if let Some((idx, row)) = numeric
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != numeric_names.len())
        {
            return Err(TrainError::ShapeMismatch(format!(
                "row {} has {} numeric values, expected {}",
                idx,
                row.len(),
                numeric_names.len()
            )));
        }
        Ok(Self {
            numeric_names,
            numeric,
            categorical_name,
            categories,
        })
    }

    /// Split a table into model inputs and binary labels.
    ///
    /// Numeric columns other than the target become features; the timestamp
    /// and any text column other than the categorical one are dropped.
    pub fn from_table(
        table: &UsageTable,
        dataset: &DatasetConfig,
    ) -> Result<(Self, Vec<u8>), TrainError> {
        let labels = parse_labels(table, &dataset.target_column)?;

        let categorical = table
            .column(&dataset.categorical_column)
            .ok_or_else(|| TrainError::MissingColumn(dataset.categorical_column.clone()))?;
        let categories: Vec<String> = match &categorical.data {
            ColumnData::Text(values) => values.clone(),
            ColumnData::Numeric(values) => values.iter().map(|v| format_number(*v)).collect(),
            ColumnData::Timestamp(_) => {
                return Err(TrainError::ShapeMismatch(format!(
                    "categorical column '{}' cannot be a timestamp",
                    dataset.categorical_column
                )))
            }
        };

        let feature_columns: Vec<(&str, &[f64])> = table
            .columns()
            .iter()
            .filter(|c| c.name != dataset.target_column && c.name != dataset.categorical_column)
            .filter_map(|c| match &c.data {
                ColumnData::Numeric(values) => Some((c.name.as_str(), values.as_slice())),
                _ => None,
            })
            .collect();

        if feature_columns.is_empty() {
            return Err(TrainError::InsufficientData(
                "no numeric feature columns".to_string(),
            ));
        }

        let numeric_names = feature_columns
            .iter()
            .map(|(name, _)| name.to_string())
            .collect();
        let numeric = (0..table.n_rows())
            .map(|row| feature_columns.iter().map(|(_, values)| values[row]).collect())
            .collect();

        let frame = Self::new(
            numeric_names,
            numeric,
            dataset.categorical_column.clone(),
            categories,
        )?;
        Ok((frame, labels))
    }

    pub fn n_rows(&self) -> usize {
        self.numeric.len()
    }

    pub fn n_numeric(&self) -> usize {
        self.numeric_names.len()
    }

    /// Rows at the given indices, in the given order
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            numeric_names: self.numeric_names.clone(),
            numeric: indices.iter().map(|&i| self.numeric[i].clone()).collect(),
            categorical_name: self.categorical_name.clone(),
            categories: indices.iter().map(|&i| self.categories[i].clone()).collect(),
        }
    }
}

/// Read the binary target as 0/1; accepts `0`/`1` numbers and `true`/`false` text
fn parse_labels(table: &UsageTable, target: &str) -> Result<Vec<u8>, TrainError> {
    let column = table
        .column(target)
        .ok_or_else(|| TrainError::MissingColumn(target.to_string()))?;

    match &column.data {
        ColumnData::Numeric(values) => values
            .iter()
            .enumerate()
            .map(|(row, &v)| {
                if v == 0.0 {
                    Ok(0)
                } else if v == 1.0 {
                    Ok(1)
                } else {
                    Err(TrainError::InvalidTarget(format!(
                        "row {}: '{}' = {} is not 0 or 1",
                        row, target, v
                    )))
                }
            })
            .collect(),
        ColumnData::Text(values) => values
            .iter()
            .enumerate()
            .map(|(row, v)| match v.trim().to_ascii_lowercase().as_str() {
                "false" => Ok(0),
                "true" => Ok(1),
                other => Err(TrainError::InvalidTarget(format!(
                    "row {}: '{}' = '{}' is not a binary label",
                    row, target, other
                ))),
            })
            .collect(),
        ColumnData::Timestamp(_) => Err(TrainError::InvalidTarget(format!(
            "target column '{}' is a timestamp",
            target
        ))),
    }
}

/// Render an integral float without a trailing `.0`
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Share of positive labels
pub fn positive_rate(labels: &[u8]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    labels.iter().filter(|&&y| y == 1).count() as f64 / labels.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn ts(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn make_table() -> UsageTable {
        UsageTable::from_columns(vec![
            Column::timestamp("datetime", vec![ts(8), ts(9), ts(10)]),
            Column::numeric("unlocks_15min", vec![3.0, 5.0, 1.0]),
            Column::text(
                "top_app_category",
                vec!["social".into(), "games".into(), "social".into()],
            ),
            Column::text("user_note", vec!["a".into(), "b".into(), "c".into()]),
            Column::numeric("intervene", vec![0.0, 1.0, 0.0]),
            Column::numeric("hour", vec![8.0, 9.0, 10.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_from_columns_rejects_ragged() {
        let result = UsageTable::from_columns(vec![
            Column::numeric("a", vec![1.0, 2.0]),
            Column::numeric("b", vec![1.0]),
        ]);
        assert!(matches!(result, Err(TrainError::ShapeMismatch(_))));
    }

    #[test]
    fn test_set_column_replaces_in_place() {
        let mut table = make_table();
        table
            .set_column(Column::numeric("unlocks_15min", vec![0.0, 0.0, 0.0]))
            .unwrap();

        assert_eq!(table.columns().len(), 6);
        assert_eq!(table.column_names()[1], "unlocks_15min");
        assert_eq!(table.numeric("unlocks_15min").unwrap(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_typed_accessors() {
        let table = make_table();
        assert!(table.numeric("unlocks_15min").is_ok());
        assert!(matches!(
            table.numeric("top_app_category"),
            Err(TrainError::NumericParseError(_))
        ));
        assert!(matches!(
            table.numeric("missing"),
            Err(TrainError::MissingColumn(_))
        ));
        assert_eq!(table.timestamps("datetime").unwrap().len(), 3);
    }

    #[test]
    fn test_frame_from_table_selects_numeric_features() {
        let table = make_table();
        let (frame, labels) = FeatureFrame::from_table(&table, &DatasetConfig::default()).unwrap();

        assert_eq!(frame.numeric_names, vec!["unlocks_15min", "hour"]);
        assert_eq!(frame.numeric[1], vec![5.0, 9.0]);
        assert_eq!(frame.categories, vec!["social", "games", "social"]);
        assert_eq!(labels, vec![0, 1, 0]);
    }

    #[test]
    fn test_boolean_text_labels() {
        let mut table = make_table();
        table
            .set_column(Column::text(
                "intervene",
                vec!["False".into(), "True".into(), "false".into()],
            ))
            .unwrap();
        let (_, labels) = FeatureFrame::from_table(&table, &DatasetConfig::default()).unwrap();
        assert_eq!(labels, vec![0, 1, 0]);
    }

    #[test]
    fn test_non_binary_target_rejected() {
        let mut table = make_table();
        table
            .set_column(Column::numeric("intervene", vec![0.0, 2.0, 1.0]))
            .unwrap();
        let result = FeatureFrame::from_table(&table, &DatasetConfig::default());
        assert!(matches!(result, Err(TrainError::InvalidTarget(_))));
    }

    #[test]
    fn test_select_rows() {
        let table = make_table();
        let (frame, _) = FeatureFrame::from_table(&table, &DatasetConfig::default()).unwrap();
        let subset = frame.select(&[2, 0]);

        assert_eq!(subset.n_rows(), 2);
        assert_eq!(subset.numeric[0], vec![1.0, 10.0]);
        assert_eq!(subset.categories, vec!["social", "social"]);
    }

    #[test]
    fn test_new_frame_shape_checks() {
        let result = FeatureFrame::new(
            vec!["a".into(), "b".into()],
            vec![vec![1.0]],
            "cat".into(),
            vec!["x".into()],
        );
        assert!(matches!(result, Err(TrainError::ShapeMismatch(_))));
    }

    #[test]
    fn test_positive_rate() {
        assert_eq!(positive_rate(&[0, 1, 1, 0]), 0.5);
        assert_eq!(positive_rate(&[]), 0.0);
    }
}
