//! Weather lookup for the request timestamp.
//!
//! [`WeatherLookup`] is the collaborator contract. [`WeatherService`] wraps
//! any lookup with a timeout and falls back to [`WeatherRecord::default`], so
//! a slow or failing weather call never fails a prediction.

pub mod error;
pub mod http;
pub mod visual_crossing;

pub use error::WeatherError;
pub use http::{BasicClient, HttpClient, UrlParam};
pub use visual_crossing::VisualCrossing;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::WeatherSettings;

/// Hourly weather fields consumed by the feature builder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub temp: f64,
    pub humidity: f64,
    pub precip: f64,
    pub windspeed: f64,
    pub cloudcover: f64,
}

/// Neutral London conditions used whenever the lookup fails.
impl Default for WeatherRecord {
    fn default() -> Self {
        Self {
            temp: 12.0,
            humidity: 70.0,
            precip: 0.0,
            windspeed: 10.0,
            cloudcover: 80.0,
        }
    }
}

#[async_trait]
pub trait WeatherLookup: Send + Sync {
    async fn hourly(&self, at: NaiveDateTime) -> Result<WeatherRecord, WeatherError>;
}

/// Lookup used when no API key is configured.
pub struct NeutralWeather;

#[async_trait]
impl WeatherLookup for NeutralWeather {
    async fn hourly(&self, _at: NaiveDateTime) -> Result<WeatherRecord, WeatherError> {
        Ok(WeatherRecord::default())
    }
}

#[derive(Clone)]
pub struct WeatherService {
    lookup: Arc<dyn WeatherLookup>,
    timeout: Duration,
}

impl WeatherService {
    pub fn new(lookup: Arc<dyn WeatherLookup>, timeout: Duration) -> Self {
        Self { lookup, timeout }
    }

    pub fn neutral() -> Self {
        Self::new(Arc::new(NeutralWeather), Duration::from_secs(1))
    }

    /// Visual Crossing with `api_key` as the `key` query parameter, or
    /// neutral weather when no key is given.
    pub fn from_settings(settings: &WeatherSettings, api_key: Option<String>) -> Result<Self, WeatherError> {
        let Some(key) = api_key.filter(|k| !k.trim().is_empty()) else {
            info!("No weather API key configured, using neutral weather");
            return Ok(Self::new(Arc::new(NeutralWeather), settings.timeout()));
        };
        let client = UrlParam::new(BasicClient::new(settings.timeout())?, "key", key);
        let lookup = VisualCrossing::new(client, settings.base_url.as_str(), settings.location.as_str());
        info!(location = %settings.location, "Using Visual Crossing weather");
        Ok(Self::new(Arc::new(lookup), settings.timeout()))
    }

    /// Never fails: errors and timeouts both yield the default record.
    pub async fn weather_at(&self, at: NaiveDateTime) -> WeatherRecord {
        match tokio::time::timeout(self.timeout, self.lookup.hourly(at)).await {
            Ok(Ok(record)) => {
                debug!(at = %at, "Weather fetched");
                record
            }
            Ok(Err(e)) => {
                warn!(at = %at, error = %e, "Weather lookup failed, using defaults");
                WeatherRecord::default()
            }
            Err(_) => {
                warn!(at = %at, error = %WeatherError::Timeout(self.timeout), "Weather lookup failed, using defaults");
                WeatherRecord::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    struct Failing;

    #[async_trait]
    impl WeatherLookup for Failing {
        async fn hourly(&self, at: NaiveDateTime) -> Result<WeatherRecord, WeatherError> {
            use chrono::Timelike;
            Err(WeatherError::MissingHour(at.hour()))
        }
    }

    struct Slow;

    #[async_trait]
    impl WeatherLookup for Slow {
        async fn hourly(&self, _at: NaiveDateTime) -> Result<WeatherRecord, WeatherError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(WeatherRecord {
                temp: 30.0,
                ..Default::default()
            })
        }
    }

    struct Fixed(WeatherRecord);

    #[async_trait]
    impl WeatherLookup for Fixed {
        async fn hourly(&self, _at: NaiveDateTime) -> Result<WeatherRecord, WeatherError> {
            Ok(self.0)
        }
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_defaults() {
        let service = WeatherService::new(Arc::new(Failing), Duration::from_secs(1));
        assert_eq!(service.weather_at(noon()).await, WeatherRecord::default());
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_defaults() {
        let service = WeatherService::new(Arc::new(Slow), Duration::from_millis(50));
        assert_eq!(service.weather_at(noon()).await, WeatherRecord::default());
    }

    #[tokio::test]
    async fn test_success_passes_record_through() {
        let record = WeatherRecord {
            temp: 21.5,
            humidity: 40.0,
            precip: 1.2,
            windspeed: 7.0,
            cloudcover: 15.0,
        };
        let service = WeatherService::new(Arc::new(Fixed(record)), Duration::from_secs(1));
        assert_eq!(service.weather_at(noon()).await, record);
    }

    #[test]
    fn test_default_record_matches_neutral_conditions() {
        let record = WeatherRecord::default();
        assert_eq!(record.temp, 12.0);
        assert_eq!(record.humidity, 70.0);
        assert_eq!(record.precip, 0.0);
        assert_eq!(record.windspeed, 10.0);
        assert_eq!(record.cloudcover, 80.0);
    }

    #[tokio::test]
    async fn test_blank_key_uses_neutral_weather() {
        let settings = WeatherSettings::default();
        let service = WeatherService::from_settings(&settings, Some("  ".to_string())).unwrap();
        assert_eq!(service.weather_at(noon()).await, WeatherRecord::default());
        assert!(WeatherService::from_settings(&settings, None).is_ok());
    }
}
