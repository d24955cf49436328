//! Directory layout and weather options.
//!
//! Stored as an optional JSON file; every field has a default so a partial
//! file is fine:
//! ```json
//! {
//!   "model_dir": "models",
//!   "weather": { "location": "london", "timeout_secs": 5 }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::Task;

pub const WEATHER_API_KEY_ENV: &str = "VISUAL_CROSSING_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    /// Trained artifacts, metrics, strategy and hourly averages.
    pub model_dir: PathBuf,
    /// Station cluster and weektype tables.
    pub processed_dir: PathBuf,
    /// Per-task training feature tables.
    pub data_dir: PathBuf,
    pub weather: WeatherSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherSettings {
    pub base_url: String,
    pub location: String,
    pub timeout_secs: u64,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            processed_dir: PathBuf::from("processed_data"),
            data_dir: PathBuf::from("data_for_model"),
            weather: WeatherSettings::default(),
        }
    }
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            base_url: "https://weather.visualcrossing.com/VisualCrossingWebServices/rest/services/timeline"
                .to_string(),
            location: "london".to_string(),
            timeout_secs: 5,
        }
    }
}

impl WeatherSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ForecastSettings {
    /// Loads settings from a JSON file at `path`, or returns the defaults when
    /// no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        let settings = serde_json::from_str(&content)
            .with_context(|| format!("parsing settings file {}", path.display()))?;
        Ok(settings)
    }

    pub fn stations_path(&self) -> PathBuf {
        self.processed_dir.join("station_with_clusters.csv")
    }

    pub fn weektype_path(&self) -> PathBuf {
        self.processed_dir.join("station_weektype_label.csv")
    }

    pub fn hourly_counts_path(&self, task: Task) -> PathBuf {
        self.processed_dir.join(format!("hourly_{task}_count.csv"))
    }

    pub fn features_path(&self, task: Task) -> PathBuf {
        self.data_dir.join(format!("{task}_features_2.csv"))
    }

    pub fn averages_path(&self, task: Task) -> PathBuf {
        self.model_dir.join(format!("avg_hourly_{task}_by_station.csv"))
    }

    pub fn strategy_path(&self) -> PathBuf {
        self.model_dir.join("strategy_by_station.json")
    }
}
