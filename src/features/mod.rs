//! Feature vectors for requests that carry only a station, a timestamp and a
//! task.

pub mod calendar;
pub mod diurnal;
pub mod row;

pub use calendar::{Calendar, parse_timestamp};
pub use diurnal::{Curve, SyntheticDynamics};
pub use row::{FeatureError, FeatureRow};

use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::debug;

use crate::reference::{LookupError, ReferenceData};
use crate::types::Task;
use crate::weather::{WeatherRecord, WeatherService};

pub struct FeatureBuilder {
    refs: Arc<ReferenceData>,
    weather: WeatherService,
}

impl FeatureBuilder {
    pub fn new(refs: Arc<ReferenceData>, weather: WeatherService) -> Self {
        Self { refs, weather }
    }

    /// Fetches weather for `at`, then synthesizes the row.
    ///
    /// # Errors
    ///
    /// [`LookupError::UnknownStation`] if the station has no coordinates.
    /// Weather problems never surface here.
    pub async fn build_features(
        &self,
        station: &str,
        at: NaiveDateTime,
        task: Task,
    ) -> Result<FeatureRow, LookupError> {
        if self.refs.stations.get(station).is_none() {
            return Err(LookupError::UnknownStation(station.to_string()));
        }
        let weather = self.weather.weather_at(at).await;
        synthesize(&self.refs, station, at, task, weather)
    }
}

/// The deterministic part of [`FeatureBuilder::build_features`].
pub fn synthesize(
    refs: &ReferenceData,
    station: &str,
    at: NaiveDateTime,
    task: Task,
    weather: WeatherRecord,
) -> Result<FeatureRow, LookupError> {
    let info = refs
        .stations
        .get(station)
        .ok_or_else(|| LookupError::UnknownStation(station.to_string()))?;

    let calendar = Calendar::from_timestamp(at);
    let weektype = refs.weektype(station);
    let factor = Curve::select(weektype, calendar.is_weekend).factor(calendar.hour);
    let cluster_mean = refs
        .hourly_average(station, calendar.hour, task)
        .unwrap_or(0.0);
    let dynamics = SyntheticDynamics::from_mean(cluster_mean, calendar.hour, factor);

    debug!(
        station,
        task = %task,
        hour = calendar.hour,
        weektype = weektype.as_str(),
        factor,
        cluster_mean,
        "Features synthesized"
    );

    Ok(FeatureRow {
        task,
        calendar,
        latitude: info.latitude,
        longitude: info.longitude,
        cluster_hourly_avg: cluster_mean,
        dynamics,
        weather,
    })
}
