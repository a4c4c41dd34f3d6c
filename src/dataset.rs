//! CSV dataset loader
//!
//! Reads the usage-window CSV into a `UsageTable`. The configured datetime
//! column is parsed as a timestamp; every other column is numeric when all of
//! its cells parse as numbers and text otherwise.

use crate::config::DatasetConfig;
use crate::error::TrainError;
use crate::types::{Column, UsageTable};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Timestamp layouts accepted besides RFC 3339
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Load a CSV file from disk
pub fn load_csv(path: &Path, dataset: &DatasetConfig) -> Result<UsageTable, TrainError> {
    let file = File::open(path)?;
    let table = read_csv(file, dataset)?;
    info!(
        path = %path.display(),
        rows = table.n_rows(),
        columns = table.columns().len(),
        "loaded training table"
    );
    Ok(table)
}

/// Read CSV data from any reader
pub fn read_csv<R: Read>(reader: R, dataset: &DatasetConfig) -> Result<UsageTable, TrainError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
    if !headers.iter().any(|h| h == &dataset.datetime_column) {
        return Err(TrainError::MissingColumn(dataset.datetime_column.clone()));
    }

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in csv_reader.records() {
        let record = record?;
        for (idx, field) in record.iter().enumerate() {
            cells[idx].push(field.to_string());
        }
    }

    if cells.first().map_or(true, Vec::is_empty) {
        return Err(TrainError::InsufficientData(
            "CSV contains no data rows".to_string(),
        ));
    }

    let columns = headers
        .into_iter()
        .zip(cells)
        .map(|(name, values)| {
            if name == dataset.datetime_column {
                parse_timestamp_column(name, &values)
            } else {
                infer_column(name, values)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    UsageTable::from_columns(columns)
}

/// Parse a single timestamp cell; offsets are resolved to the record's local wall clock
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, TrainError> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.naive_local());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt);
        }
    }

    Err(TrainError::DateParseError(format!(
        "unrecognized timestamp '{}'",
        value
    )))
}

fn parse_timestamp_column(name: String, values: &[String]) -> Result<Column, TrainError> {
    let parsed = values
        .iter()
        .enumerate()
        .map(|(row, v)| {
            parse_timestamp(v).map_err(|e| match e {
                TrainError::DateParseError(msg) => {
                    TrainError::DateParseError(format!("column '{}', row {}: {}", name, row, msg))
                }
                other => other,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Column::timestamp(name, parsed))
}

/// Numeric when every non-empty cell parses; a numeric column may not have gaps
fn infer_column(name: String, values: Vec<String>) -> Result<Column, TrainError> {
    let mut numbers = Vec::with_capacity(values.len());
    let mut first_gap = None;

    for (row, value) in values.iter().enumerate() {
        if value.is_empty() {
            first_gap.get_or_insert(row);
            continue;
        }
        match value.parse::<f64>() {
            Ok(number) => numbers.push(number),
            Err(_) => {
                debug!(column = %name, row, "non-numeric cell, treating column as text");
                return Ok(Column::text(name, values));
            }
        }
    }

    match first_gap {
        None => Ok(Column::numeric(name, numbers)),
        Some(_) if numbers.is_empty() => Ok(Column::text(name, values)),
        Some(row) => Err(TrainError::NumericParseError(format!(
            "column '{}' has an empty cell at row {}",
            name, row
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnData;
    use chrono::{Datelike, Timelike};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE_CSV: &str = "\
datetime,unlocks_15min,app_switches_15min,scroll_length,recent_15min_usage,top_app_category,intervene
2024-01-15 08:15:00,4,10,1200.5,6.0,social,0
2024-01-15 23:45:00,12,30,5400,14.5,video,1
2024-01-16 12:00:00,0,0,0,0,productivity,0
";

    #[test]
    fn test_read_csv_infers_column_types() {
        let table = read_csv(SAMPLE_CSV.as_bytes(), &DatasetConfig::default()).unwrap();

        assert_eq!(table.n_rows(), 3);
        assert_eq!(
            table.column_names(),
            vec![
                "datetime",
                "unlocks_15min",
                "app_switches_15min",
                "scroll_length",
                "recent_15min_usage",
                "top_app_category",
                "intervene"
            ]
        );
        assert_eq!(table.numeric("scroll_length").unwrap(), &[1200.5, 5400.0, 0.0]);
        assert!(matches!(
            table.column("top_app_category").unwrap().data,
            ColumnData::Text(_)
        ));

        let timestamps = table.timestamps("datetime").unwrap();
        assert_eq!(timestamps[1].hour(), 23);
        assert_eq!(timestamps[2].day(), 16);
    }

    #[test]
    fn test_missing_datetime_column() {
        let csv = "a,b\n1,2\n";
        let result = read_csv(csv.as_bytes(), &DatasetConfig::default());
        assert!(matches!(result, Err(TrainError::MissingColumn(c)) if c == "datetime"));
    }

    #[test]
    fn test_malformed_timestamp() {
        let csv = "datetime,x\nyesterday,1\n";
        let result = read_csv(csv.as_bytes(), &DatasetConfig::default());
        assert!(matches!(result, Err(TrainError::DateParseError(_))));
    }

    #[test]
    fn test_header_only_is_insufficient() {
        let csv = "datetime,x\n";
        let result = read_csv(csv.as_bytes(), &DatasetConfig::default());
        assert!(matches!(result, Err(TrainError::InsufficientData(_))));
    }

    #[test]
    fn test_ragged_rows_are_errors() {
        let csv = "datetime,x\n2024-01-15 08:00:00,1,extra\n";
        let result = read_csv(csv.as_bytes(), &DatasetConfig::default());
        assert!(matches!(result, Err(TrainError::CsvError(_))));
    }

    #[test]
    fn test_numeric_gap_is_error() {
        let csv = "datetime,x\n2024-01-15 08:00:00,1\n2024-01-15 09:00:00,\n";
        let result = read_csv(csv.as_bytes(), &DatasetConfig::default());
        assert!(matches!(result, Err(TrainError::NumericParseError(_))));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let cases = [
            ("2024-01-15 08:15:00", 8, 15),
            ("2024-01-15T08:15:00", 8, 15),
            ("2024-01-15 08:15:00.250", 8, 15),
            ("2024-01-15 08:15", 8, 15),
            ("2024-01-15T08:15:00+02:00", 8, 15),
            ("01/15/2024 08:15", 8, 15),
            ("2024-01-15", 0, 0),
        ];
        for (input, hour, minute) in cases {
            let dt = parse_timestamp(input).unwrap();
            assert_eq!((dt.hour(), dt.minute()), (hour, minute), "input {input}");
            assert_eq!(dt.day(), 15, "input {input}");
        }
    }

    #[test]
    fn test_load_csv_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CSV.as_bytes()).unwrap();

        let table = load_csv(file.path(), &DatasetConfig::default()).unwrap();
        assert_eq!(table.n_rows(), 3);
    }

    #[test]
    fn test_load_csv_missing_file() {
        let result = load_csv(Path::new("/nonexistent/usage.csv"), &DatasetConfig::default());
        assert!(matches!(result, Err(TrainError::IoError(_))));
    }
}
