use serde::Serialize;
use thiserror::Error;

use super::calendar::Calendar;
use super::diurnal::SyntheticDynamics;
use crate::types::Task;
use crate::weather::WeatherRecord;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeatureError {
    #[error("Feature '{0}' is not produced for this task")]
    MissingColumn(String),
}

/// One request's model input. Column names carry the task, e.g.
/// `pickup_count_lag_1h` or `cluster_hourly_avg_dropoff`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub task: Task,
    pub calendar: Calendar,
    pub latitude: f64,
    pub longitude: f64,
    pub cluster_hourly_avg: f64,
    pub dynamics: SyntheticDynamics,
    pub weather: WeatherRecord,
}

fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

impl FeatureRow {
    /// Every column in canonical order. Artifacts with no recorded order are
    /// fed in this order.
    pub fn columns(&self) -> Vec<(String, f64)> {
        let t = self.task.as_str();
        let c = &self.calendar;
        let d = &self.dynamics;
        let w = &self.weather;
        vec![
            ("cloudcover".to_string(), w.cloudcover),
            (format!("cluster_hourly_avg_{t}"), self.cluster_hourly_avg),
            ("dayofweek".to_string(), c.dayofweek as f64),
            ("hour".to_string(), c.hour as f64),
            ("humidity".to_string(), w.humidity),
            ("is_peak_hour".to_string(), flag(c.is_peak_hour)),
            ("is_weekend".to_string(), flag(c.is_weekend)),
            ("latitude".to_string(), self.latitude),
            ("longitude".to_string(), self.longitude),
            ("month".to_string(), c.month as f64),
            (format!("{t}_count_cumsum_day"), d.cumsum_day),
            (format!("{t}_count_lag_1h"), d.lag_1h),
            (format!("{t}_count_rolling_3h_mean"), d.rolling_3h_mean),
            (format!("{t}_count_rolling_6h_std"), d.rolling_6h_std),
            ("precip".to_string(), w.precip),
            ("temp".to_string(), w.temp),
            ("windspeed".to_string(), w.windspeed),
        ]
    }

    /// Values reordered to `order`. Names must match exactly.
    pub fn select(&self, order: &[String]) -> Result<Vec<f64>, FeatureError> {
        let columns = self.columns();
        order
            .iter()
            .map(|name| {
                columns
                    .iter()
                    .find_map(|(n, v)| (n == name).then_some(*v))
                    .ok_or_else(|| FeatureError::MissingColumn(name.clone()))
            })
            .collect()
    }
}
