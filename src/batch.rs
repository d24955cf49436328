//! Batch serving: a CSV of requests answered with bounded concurrency.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{Instrument, error, info, warn};

use crate::dispatch::{Dispatcher, Prediction, PredictionRequest};

/// Reads `station_name,date,hour,task` rows. Rows that do not parse are
/// logged and skipped.
pub fn read_requests(path: &Path) -> Result<Vec<PredictionRequest>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut requests = vec![];
    for (line, result) in rdr.deserialize::<PredictionRequest>().enumerate() {
        match result {
            Ok(request) => requests.push(request),
            Err(e) => warn!(line = line + 2, error = %e, "Skipping malformed request"),
        }
    }
    Ok(requests)
}

/// Serves every request with at most `concurrency` in flight. Predictions
/// come back in request order; requests with an invalid hour are dropped.
pub async fn serve_batch(
    dispatcher: Arc<Dispatcher>,
    requests: Vec<PredictionRequest>,
    concurrency: usize,
) -> Vec<Prediction> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = Vec::with_capacity(requests.len());

    for request in requests {
        let sem = semaphore.clone();
        let dispatcher = dispatcher.clone();
        let request_span = tracing::info_span!(
            "serve_request",
            station = %request.station_name,
            date = %request.date,
            hour = request.hour,
        );

        let task = tokio::spawn(
            async move {
                let Ok(_permit) = sem.acquire().await else {
                    return None;
                };
                match dispatcher.serve(&request).await {
                    Ok(prediction) => Some(prediction),
                    Err(e) => {
                        warn!(error = %e, "Skipping invalid request");
                        None
                    }
                }
            }
            .instrument(request_span),
        );
        tasks.push(task);
    }

    let total = tasks.len();
    let mut served = Vec::with_capacity(total);

    // Wait for all tasks to complete
    for task in tasks {
        match task.await {
            Ok(Some(prediction)) => served.push(prediction),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Prediction task panicked"),
        }
    }

    let degraded = served.iter().filter(|p| !p.is_ok()).count();
    info!(total, served = served.len(), degraded, "Batch complete");
    served
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::dispatch::FailureReason;
    use crate::reference::{HourlyAverages, ReferenceData, Station};
    use crate::strategy::StrategyTable;
    use crate::types::Task;
    use crate::weather::{WeatherError, WeatherLookup, WeatherRecord, WeatherService};
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime, Timelike};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Earlier hours answer later, and the peak number of overlapping calls
    /// is recorded.
    #[derive(Default)]
    struct Tracking {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl WeatherLookup for Tracking {
        async fn hourly(&self, at: NaiveDateTime) -> Result<WeatherRecord, WeatherError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5 * (24 - at.hour() as u64))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(WeatherRecord::default())
        }
    }

    fn dispatcher(weather: Arc<Tracking>, dir: &Path) -> Arc<Dispatcher> {
        let mut refs = ReferenceData::default();
        refs.stations.insert(Station {
            name: "Hyde Park Corner".to_string(),
            cluster_id: 3,
            latitude: 51.5027,
            longitude: -0.1527,
            weektype: None,
        });
        refs.pickup_averages =
            HourlyAverages::from_observations((0..24).map(|h| ("Hyde Park Corner", h, h as f64)));
        Arc::new(Dispatcher::new(
            Arc::new(refs),
            Arc::new(StrategyTable::default()),
            Arc::new(ArtifactStore::new(dir)),
            WeatherService::new(weather, Duration::from_secs(5)),
        ))
    }

    fn request(station: &str, hour: u32) -> PredictionRequest {
        PredictionRequest {
            station_name: station.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            hour,
            task: Task::Pickup,
        }
    }

    #[tokio::test]
    async fn test_results_keep_request_order_and_skip_invalid_hours() {
        let dir = tempfile::tempdir().unwrap();
        let weather = Arc::new(Tracking::default());
        let requests = vec![
            request("Hyde Park Corner", 3),
            request("Hyde Park Corner", 30),
            request("Atlantis", 9),
            request("Hyde Park Corner", 20),
            request("Hyde Park Corner", 11),
        ];

        let served = serve_batch(dispatcher(weather, dir.path()), requests, 4).await;

        let hours: Vec<u32> = served.iter().map(|p| p.timestamp.hour()).collect();
        assert_eq!(hours, vec![3, 9, 20, 11]);
        assert_eq!(served[1].failure, Some(FailureReason::UnknownStation));
        let counts: Vec<u32> = served.iter().map(|p| p.predicted_count).collect();
        assert_eq!(counts, vec![3, 0, 20, 11]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let weather = Arc::new(Tracking::default());
        let requests: Vec<_> = (0..12).map(|h| request("Hyde Park Corner", h)).collect();

        let served = serve_batch(dispatcher(weather.clone(), dir.path()), requests, 3).await;

        assert_eq!(served.len(), 12);
        let peak = weather.peak.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak {peak}");
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_serves() {
        let dir = tempfile::tempdir().unwrap();
        let weather = Arc::new(Tracking::default());
        let served = serve_batch(dispatcher(weather, dir.path()), vec![request("Hyde Park Corner", 22)], 0).await;
        assert_eq!(served.len(), 1);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.csv");
        std::fs::write(
            &path,
            "station_name,date,hour,task\n\
             Hyde Park Corner,2025-06-02,8,pickup\n\
             Hyde Park Corner,02/06/2025,8,pickup\n\
             Hyde Park Corner,2025-06-02,eight,pickup\n\
             Hyde Park Corner,2025-06-02,9,rental\n\
             \"Waterloo Station 1/2\",2025-06-03 , 17 , dropoff\n",
        )
        .unwrap();

        let requests = read_requests(&path).unwrap();
        assert_eq!(
            requests,
            vec![
                request("Hyde Park Corner", 8),
                PredictionRequest {
                    station_name: "Waterloo Station 1/2".to_string(),
                    date: NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
                    hour: 17,
                    task: Task::Dropoff,
                },
            ]
        );
    }

    #[test]
    fn test_missing_request_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_requests(&dir.path().join("absent.csv")).is_err());
    }
}
