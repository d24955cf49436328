//! Visual Crossing timeline API client.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Timelike};
use serde::Deserialize;

use super::error::WeatherError;
use super::http::{HttpClient, fetch_json};
use super::{WeatherLookup, WeatherRecord};

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    #[serde(default)]
    days: Vec<TimelineDay>,
}

#[derive(Debug, Deserialize)]
struct TimelineDay {
    #[serde(default)]
    hours: Vec<HourObservation>,
}

/// Any field may be absent or null in the API response.
#[derive(Debug, Default, Deserialize)]
struct HourObservation {
    temp: Option<f64>,
    humidity: Option<f64>,
    precip: Option<f64>,
    windspeed: Option<f64>,
    cloudcover: Option<f64>,
}

impl HourObservation {
    fn into_record(self) -> WeatherRecord {
        let fallback = WeatherRecord::default();
        WeatherRecord {
            temp: self.temp.unwrap_or(fallback.temp),
            humidity: self.humidity.unwrap_or(fallback.humidity),
            precip: self.precip.unwrap_or(fallback.precip),
            windspeed: self.windspeed.unwrap_or(fallback.windspeed),
            cloudcover: self.cloudcover.unwrap_or(fallback.cloudcover),
        }
    }
}

pub struct VisualCrossing<C> {
    client: C,
    base_url: String,
    location: String,
}

impl<C: HttpClient> VisualCrossing<C> {
    /// `client` is expected to carry the API key already (see
    /// [`UrlParam`](super::http::UrlParam)).
    pub fn new(client: C, base_url: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            location: location.into(),
        }
    }

    fn url_for(&self, at: NaiveDateTime) -> String {
        format!(
            "{}/{}/{}?unitGroup=metric&include=hours",
            self.base_url.trim_end_matches('/'),
            self.location,
            at.format("%Y-%m-%dT%H:00:00")
        )
    }
}

#[async_trait]
impl<C: HttpClient> WeatherLookup for VisualCrossing<C> {
    #[tracing::instrument(skip(self), fields(location = %self.location))]
    async fn hourly(&self, at: NaiveDateTime) -> Result<WeatherRecord, WeatherError> {
        let body: TimelineResponse = fetch_json(&self.client, &self.url_for(at)).await?;
        observation_for_hour(body, at.hour())
    }
}

fn observation_for_hour(body: TimelineResponse, hour: u32) -> Result<WeatherRecord, WeatherError> {
    body.days
        .into_iter()
        .next()
        .and_then(|day| day.hours.into_iter().nth(hour as usize))
        .map(HourObservation::into_record)
        .ok_or(WeatherError::MissingHour(hour))
}
