//! Synthetic usage data shared by the pipeline and export tests

use crate::config::{BoosterParams, TrainConfig};

const CATEGORIES: [&str; 4] = ["games", "productivity", "social", "video"];

/// Deterministic usage CSV where heavy unlocking and late hours drive `intervene`
pub fn synthetic_csv(rows: usize) -> String {
    let mut csv = String::from(
        "datetime,unlocks_15min,app_switches_15min,scroll_length,recent_15min_usage,\
         battery_level,top_app_category,intervene\n",
    );
    for i in 0..rows {
        let day = 1 + (i / 24) % 28;
        let hour = (i * 5) % 24;
        let unlocks = (i * 7) % 15;
        let switches = (i * 3) % 20;
        let scroll = ((i * 37) % 50) as f64 * 25.0;
        let usage = if i % 11 == 0 { 0.0 } else { ((i * 13) % 15) as f64 };
        let battery = 20 + (i * 17) % 80;
        let category = CATEGORIES[i % CATEGORIES.len()];
        let score = unlocks as f64 / 14.0 + if hour >= 22 || hour < 5 { 0.6 } else { 0.0 };
        let intervene = u8::from(score > 0.75 || (i % 17 == 0));
        csv.push_str(&format!(
            "2024-02-{:02} {:02}:{:02}:00,{},{},{},{},{},{},{}\n",
            day,
            hour,
            (i * 15) % 60,
            unlocks,
            switches,
            scroll,
            usage,
            battery,
            category,
            intervene
        ));
    }
    csv
}

/// Default config with a small booster so tests stay fast
pub fn fast_config() -> TrainConfig {
    TrainConfig {
        booster: BoosterParams {
            n_estimators: 15,
            ..BoosterParams::default()
        },
        ..TrainConfig::default()
    }
}
