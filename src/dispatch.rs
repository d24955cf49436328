//! Request-time routing: strategy lookup, artifact invocation and the
//! historical-average fallback.
//!
//! [`Dispatcher::predict`] never fails. Every problem is reported through
//! [`Prediction::failure`] with a zero count.

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::artifacts::{ArtifactError, ArtifactKey, ArtifactStore, TrainingUnit};
use crate::config::ForecastSettings;
use crate::features::{FeatureBuilder, FeatureRow};
use crate::reference::{LookupError, ReferenceData, Station};
use crate::strategy::StrategyTable;
use crate::types::{Task, Tier};
use crate::weather::{WeatherRecord, WeatherService};

/// Where a request is sent once its tier is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Global,
    Cluster(i64),
    Station(String),
    Average,
}

impl Route {
    pub fn resolve(tier: Tier, station: &Station) -> Self {
        match tier {
            Tier::Global => Route::Global,
            Tier::Cluster => Route::Cluster(station.cluster_id),
            Tier::Station => Route::Station(station.name.clone()),
            Tier::Average => Route::Average,
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            Route::Global => Tier::Global,
            Route::Cluster(_) => Tier::Cluster,
            Route::Station(_) => Tier::Station,
            Route::Average => Tier::Average,
        }
    }

    /// The artifact behind a model route; `None` for the average.
    pub fn artifact_key(&self, task: Task) -> Option<ArtifactKey> {
        let unit = match self {
            Route::Global => TrainingUnit::Global,
            Route::Cluster(id) => TrainingUnit::Cluster(*id),
            Route::Station(name) => TrainingUnit::Station(name.clone()),
            Route::Average => return None,
        };
        Some(ArtifactKey::new(task, unit))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    UnknownStation,
    AverageMissing,
    MissingModel,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub station: String,
    pub timestamp: NaiveDateTime,
    pub task: Task,
    pub predicted_count: u32,
    /// `None` only when the station is unknown.
    pub tier_used: Option<Tier>,
    pub failure: Option<FailureReason>,
    pub weather: WeatherRecord,
}

impl Prediction {
    fn empty(station: &str, timestamp: NaiveDateTime, task: Task) -> Self {
        Self {
            station: station.to_string(),
            timestamp,
            task,
            predicted_count: 0,
            tier_used: None,
            failure: None,
            weather: WeatherRecord::default(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }

    /// Short status shown next to the count, e.g. `cluster`,
    /// `average (default)` or `station (missing model)`.
    pub fn indicator(&self) -> String {
        let tier = self.tier_used.map_or("unknown", |t| t.as_str());
        match &self.failure {
            None => tier.to_string(),
            Some(FailureReason::UnknownStation) => "unknown station".to_string(),
            Some(FailureReason::AverageMissing) => format!("{tier} (default)"),
            Some(FailureReason::MissingModel) => format!("{tier} (missing model)"),
            Some(FailureReason::Error(cause)) => format!("{tier} (error: {cause})"),
        }
    }

    /// Flat form for CSV history files.
    pub fn to_record(&self) -> PredictionRecord {
        PredictionRecord {
            station: self.station.clone(),
            timestamp: self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            task: self.task,
            predicted_count: self.predicted_count,
            tier_used: self.tier_used.map(|t| t.to_string()).unwrap_or_default(),
            indicator: self.indicator(),
            temp: self.weather.temp,
            humidity: self.weather.humidity,
            precip: self.weather.precip,
            windspeed: self.weather.windspeed,
            cloudcover: self.weather.cloudcover,
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} at {}: {} [{}]",
            self.station,
            self.task,
            self.timestamp.format("%Y-%m-%d %H:%M"),
            self.predicted_count,
            self.indicator()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    pub station: String,
    pub timestamp: String,
    pub task: Task,
    pub predicted_count: u32,
    pub tier_used: String,
    pub indicator: String,
    pub temp: f64,
    pub humidity: f64,
    pub precip: f64,
    pub windspeed: f64,
    pub cloudcover: f64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Hour {0} is outside 0..=23")]
    InvalidHour(u32),
}

/// One prediction request as it arrives from the CLI or a batch file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub station_name: String,
    pub date: NaiveDate,
    pub hour: u32,
    pub task: Task,
}

impl PredictionRequest {
    pub fn timestamp(&self) -> Result<NaiveDateTime, RequestError> {
        self.date
            .and_hms_opt(self.hour, 0, 0)
            .ok_or(RequestError::InvalidHour(self.hour))
    }
}

fn to_count(value: f64) -> u32 {
    value.ceil().max(0.0) as u32
}

/// Renders an error with its source chain.
fn cause(err: impl Into<anyhow::Error>) -> String {
    format!("{:#}", err.into())
}

pub struct Dispatcher {
    refs: Arc<ReferenceData>,
    strategy: Arc<StrategyTable>,
    store: Arc<ArtifactStore>,
    features: FeatureBuilder,
}

impl Dispatcher {
    pub fn new(
        refs: Arc<ReferenceData>,
        strategy: Arc<StrategyTable>,
        store: Arc<ArtifactStore>,
        weather: WeatherService,
    ) -> Self {
        let features = FeatureBuilder::new(Arc::clone(&refs), weather);
        Self {
            refs,
            strategy,
            store,
            features,
        }
    }

    /// Loads reference data and the strategy from the configured
    /// directories. A missing strategy file routes everything to the
    /// average.
    pub fn from_settings(settings: &ForecastSettings, weather: WeatherService) -> Result<Self> {
        let refs = ReferenceData::load(settings).context("loading reference data")?;

        let strategy_path = settings.strategy_path();
        let strategy = if strategy_path.exists() {
            StrategyTable::load(&strategy_path)?
        } else {
            warn!(path = %strategy_path.display(), "Strategy not found, every station uses the average");
            StrategyTable::default()
        };

        Ok(Self::new(
            Arc::new(refs),
            Arc::new(strategy),
            Arc::new(ArtifactStore::new(&settings.model_dir)),
            weather,
        ))
    }

    pub async fn serve(&self, req: &PredictionRequest) -> Result<Prediction, RequestError> {
        let at = req.timestamp()?;
        Ok(self.predict(&req.station_name, at, req.task).await)
    }

    #[tracing::instrument(skip(self, task), fields(task = %task))]
    pub async fn predict(&self, station: &str, at: NaiveDateTime, task: Task) -> Prediction {
        let mut result = Prediction::empty(station, at, task);

        let Some(info) = self.refs.stations.get(station) else {
            warn!("Unknown station");
            result.failure = Some(FailureReason::UnknownStation);
            return result;
        };

        let row = match self.features.build_features(station, at, task).await {
            Ok(row) => row,
            Err(LookupError::UnknownStation(_)) => {
                result.failure = Some(FailureReason::UnknownStation);
                return result;
            }
        };
        result.weather = row.weather;

        let route = Route::resolve(self.strategy.get(station, task), info);
        result.tier_used = Some(route.tier());

        match self.invoke(&route, &row, station, task).await {
            Ok(value) => {
                result.predicted_count = to_count(value);
                debug!(tier = %route.tier(), value, count = result.predicted_count, "Prediction served");
            }
            Err(reason) => {
                warn!(tier = %route.tier(), reason = ?reason, "Prediction degraded");
                result.failure = Some(reason);
            }
        }
        result
    }

    async fn invoke(&self, route: &Route, row: &FeatureRow, station: &str, task: Task) -> Result<f64, FailureReason> {
        let Some(key) = route.artifact_key(task) else {
            return self
                .refs
                .hourly_average(station, row.calendar.hour, task)
                .ok_or(FailureReason::AverageMissing);
        };

        let artifact = self.store.load(&key).await.map_err(|e| match e {
            ArtifactError::Missing(_) => FailureReason::MissingModel,
            other => FailureReason::Error(cause(other)),
        })?;

        let values = match &artifact.feature_order {
            Some(order) => row
                .select(order)
                .map_err(|e| FailureReason::Error(cause(e)))?,
            None => row.columns().into_iter().map(|(_, v)| v).collect(),
        };

        artifact
            .model
            .predict_checked(&values)
            .map_err(|e| FailureReason::Error(cause(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::HourlyAverages;
    use crate::strategy::StationStrategy;
    use crate::training::regressors::{Regressor, RidgeRegressor, TrainedModel};
    use crate::types::Weektype;

    const MONDAY_8AM: &str = "2025-06-02 08:00";

    fn at(raw: &str) -> NaiveDateTime {
        crate::features::parse_timestamp(raw).unwrap()
    }

    fn refs() -> ReferenceData {
        let mut data = ReferenceData::default();
        data.stations.insert(Station {
            name: "Hyde Park Corner".to_string(),
            cluster_id: 3,
            latitude: 51.5027,
            longitude: -0.1527,
            weektype: Some(Weektype::Weekday),
        });
        data.pickup_averages = HourlyAverages::from_observations(vec![("Hyde Park Corner", 8, 12.2)]);
        data.dropoff_averages = HourlyAverages::from_observations(vec![("Hyde Park Corner", 9, -3.0)]);
        data
    }

    fn dispatcher(dir: &std::path::Path, pickup: Tier, dropoff: Tier) -> Dispatcher {
        let mut strategy = StrategyTable::default();
        strategy.insert("Hyde Park Corner", StationStrategy { pickup, dropoff });
        Dispatcher::new(
            Arc::new(refs()),
            Arc::new(strategy),
            Arc::new(ArtifactStore::new(dir)),
            WeatherService::neutral(),
        )
    }

    /// Ridge model on `hour` alone: predicts roughly `2 * hour`.
    fn hour_model() -> TrainedModel {
        let x: Vec<Vec<f64>> = (0..24).map(|h| vec![h as f64]).collect();
        let y: Vec<f64> = (0..24).map(|h| 2.0 * h as f64).collect();
        let mut model = TrainedModel::Ridge(RidgeRegressor {
            lambda: 1e-9,
            ..Default::default()
        });
        model.fit(&x, &y).unwrap();
        model
    }

    #[tokio::test]
    async fn test_unknown_station_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path(), Tier::Global, Tier::Global);
        let p = d.predict("Atlantis", at(MONDAY_8AM), Task::Pickup).await;

        assert_eq!(p.predicted_count, 0);
        assert_eq!(p.failure, Some(FailureReason::UnknownStation));
        assert_eq!(p.tier_used, None);
        assert_eq!(p.weather, WeatherRecord::default());
        assert_eq!(p.indicator(), "unknown station");
    }

    #[tokio::test]
    async fn test_average_rounds_up() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path(), Tier::Average, Tier::Average);
        let p = d.predict("Hyde Park Corner", at(MONDAY_8AM), Task::Pickup).await;

        assert_eq!(p.predicted_count, 13);
        assert!(p.is_ok());
        assert_eq!(p.indicator(), "average");
    }

    #[tokio::test]
    async fn test_negative_average_floors_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path(), Tier::Average, Tier::Average);
        let p = d.predict("Hyde Park Corner", at("2025-06-02 09:00"), Task::Dropoff).await;
        assert_eq!(p.predicted_count, 0);
        assert!(p.is_ok());
    }

    #[tokio::test]
    async fn test_absent_average_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path(), Tier::Average, Tier::Average);
        let p = d.predict("Hyde Park Corner", at("2025-06-02 15:00"), Task::Pickup).await;
        assert_eq!(p.failure, Some(FailureReason::AverageMissing));
        assert_eq!(p.indicator(), "average (default)");
    }

    #[tokio::test]
    async fn test_missing_model_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path(), Tier::Station, Tier::Average);
        let p = d.predict("Hyde Park Corner", at(MONDAY_8AM), Task::Pickup).await;

        assert_eq!(p.predicted_count, 0);
        assert_eq!(p.tier_used, Some(Tier::Station));
        assert_eq!(p.indicator(), "station (missing model)");
    }

    #[tokio::test]
    async fn test_model_is_invoked_in_recorded_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = ArtifactKey::new(Task::Pickup, TrainingUnit::Cluster(3));
        store.save(&key, &hour_model(), &["hour".to_string()]).unwrap();

        let d = dispatcher(dir.path(), Tier::Cluster, Tier::Average);
        let p = d.predict("Hyde Park Corner", at("2025-06-02 17:00"), Task::Pickup).await;

        assert!(p.is_ok(), "{}", p.indicator());
        assert_eq!(p.tier_used, Some(Tier::Cluster));
        // 2 * 17 = 34 up to ridge rounding, then ceil
        assert!((34..=35).contains(&p.predicted_count));
    }

    #[tokio::test]
    async fn test_unknown_feature_name_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = ArtifactKey::new(Task::Pickup, TrainingUnit::Global);
        store.save(&key, &hour_model(), &["hour_of_day".to_string()]).unwrap();

        let d = dispatcher(dir.path(), Tier::Global, Tier::Average);
        let p = d.predict("Hyde Park Corner", at(MONDAY_8AM), Task::Pickup).await;

        assert_eq!(p.predicted_count, 0);
        assert!(matches!(p.failure, Some(FailureReason::Error(ref msg)) if msg.contains("hour_of_day")));
        assert!(p.indicator().starts_with("global (error: "));
    }

    #[tokio::test]
    async fn test_corrupt_artifact_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = ArtifactKey::new(Task::Pickup, TrainingUnit::Station("Hyde Park Corner".into()));
        std::fs::create_dir_all(dir.path().join("station")).unwrap();
        std::fs::write(store.model_path(&key), "{\"algorithm\": \"ridge\"").unwrap();

        let d = dispatcher(dir.path(), Tier::Station, Tier::Average);
        let p = d.predict("Hyde Park Corner", at(MONDAY_8AM), Task::Pickup).await;
        assert!(matches!(p.failure, Some(FailureReason::Error(_))));
        assert_eq!(p.predicted_count, 0);
    }

    #[tokio::test]
    async fn test_self_linked_tree_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("global")).unwrap();
        std::fs::write(
            dir.path().join("global/pickup_model.json"),
            r#"{"algorithm": "gbdt", "n_rounds": 1, "learning_rate": 0.1, "max_depth": 3,
                "min_samples_leaf": 3, "max_bins": 32, "base_score": 0.0, "n_features": 1,
                "trees": [{"nodes": [{"kind": "split", "feature": 0, "threshold": 100.0, "left": 0, "right": 0}]}]}"#,
        )
        .unwrap();

        let d = dispatcher(dir.path(), Tier::Global, Tier::Average);
        let p = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            d.predict("Hyde Park Corner", at(MONDAY_8AM), Task::Pickup),
        )
        .await
        .unwrap();

        assert_eq!(p.predicted_count, 0);
        assert_eq!(p.tier_used, Some(Tier::Global));
        assert!(matches!(p.failure, Some(FailureReason::Error(ref msg)) if msg.contains("node 0 links to node 0")));
    }

    #[tokio::test]
    async fn test_unordered_artifact_uses_canonical_columns() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = ArtifactKey::new(Task::Pickup, TrainingUnit::Global);
        // width 1 against 17 canonical columns
        store.save(&key, &hour_model(), &[]).unwrap();
        std::fs::remove_file(store.order_path(&key)).unwrap();

        let d = dispatcher(dir.path(), Tier::Global, Tier::Average);
        let p = d.predict("Hyde Park Corner", at(MONDAY_8AM), Task::Pickup).await;
        assert!(matches!(p.failure, Some(FailureReason::Error(ref msg)) if msg.contains("17")));
    }

    #[tokio::test]
    async fn test_serve_validates_hour() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path(), Tier::Average, Tier::Average);
        let mut req = PredictionRequest {
            station_name: "Hyde Park Corner".into(),
            date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            hour: 8,
            task: Task::Pickup,
        };
        assert_eq!(d.serve(&req).await.unwrap().predicted_count, 13);

        req.hour = 24;
        assert_eq!(d.serve(&req).await, Err(RequestError::InvalidHour(24)));
    }

    #[test]
    fn test_record_flattens_weather() {
        let mut p = Prediction::empty("A", at(MONDAY_8AM), Task::Dropoff);
        p.tier_used = Some(Tier::Cluster);
        p.failure = Some(FailureReason::MissingModel);
        let record = p.to_record();
        assert_eq!(record.timestamp, "2025-06-02 08:00:00");
        assert_eq!(record.tier_used, "cluster");
        assert_eq!(record.indicator, "cluster (missing model)");
        assert_eq!(record.cloudcover, 80.0);
    }
}
