//! Feature derivation
//!
//! Adds calendar features from the timestamp and per-window rate features
//! (unlocks, app switches, scroll length) normalized by recent usage.

use crate::config::{DatasetConfig, FeatureConfig};
use crate::error::TrainError;
use crate::types::{Column, UsageTable};
use chrono::{Datelike, Timelike};
use tracing::debug;

/// Names of the derived columns, in the order they are appended
pub const DERIVED_FEATURES: [&str; 5] = [
    "hour",
    "dayofweek",
    "unlock_rate",
    "switch_rate",
    "scroll_rate",
];

/// Feature deriver for usage tables
pub struct FeatureDeriver;

impl FeatureDeriver {
    /// Append the derived feature columns to the table
    pub fn derive(
        table: &mut UsageTable,
        dataset: &DatasetConfig,
        features: &FeatureConfig,
    ) -> Result<(), TrainError> {
        let timestamps = table.timestamps(&dataset.datetime_column)?;
        let hour: Vec<f64> = timestamps.iter().map(|t| t.hour() as f64).collect();
        let dayofweek: Vec<f64> = timestamps
            .iter()
            .map(|t| t.weekday().num_days_from_monday() as f64)
            .collect();

        let usage = table.numeric(&features.usage_column)?;
        let unlock_rate = compute_rates(
            table.numeric(&features.unlocks_column)?,
            usage,
            features.zero_guard,
        );
        let switch_rate = compute_rates(
            table.numeric(&features.switches_column)?,
            usage,
            features.zero_guard,
        );
        let scroll_rate = compute_rates(
            table.numeric(&features.scroll_column)?,
            usage,
            features.zero_guard,
        );

        let zero_usage = usage.iter().filter(|&&u| u == 0.0).count();
        if zero_usage > 0 {
            debug!(rows = zero_usage, "guarded zero usage denominators");
        }

        let [hour_name, day_name, unlock_name, switch_name, scroll_name] = DERIVED_FEATURES;
        table.set_column(Column::numeric(hour_name, hour))?;
        table.set_column(Column::numeric(day_name, dayofweek))?;
        table.set_column(Column::numeric(unlock_name, unlock_rate))?;
        table.set_column(Column::numeric(switch_name, switch_rate))?;
        table.set_column(Column::numeric(scroll_name, scroll_rate))?;
        Ok(())
    }
}

/// Elementwise `numerator / guarded(denominator)`
fn compute_rates(numerator: &[f64], denominator: &[f64], zero_guard: f64) -> Vec<f64> {
    numerator
        .iter()
        .zip(denominator)
        .map(|(n, &d)| n / guard_denominator(d, zero_guard))
        .collect()
}

/// Replace an exact zero; negative or tiny non-zero values pass through
fn guard_denominator(value: f64, zero_guard: f64) -> f64 {
    if value == 0.0 {
        zero_guard
    } else {
        value
    }
}
