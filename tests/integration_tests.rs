use bikeshare_forecast::config::ForecastSettings;
use bikeshare_forecast::dispatch::{Dispatcher, FailureReason, PredictionRequest};
use bikeshare_forecast::output::append_record;
use bikeshare_forecast::strategy::{self, StrategyTable, passes_gate};
use bikeshare_forecast::training;
use bikeshare_forecast::types::{Task, Tier};
use bikeshare_forecast::weather::WeatherService;
use chrono::NaiveDate;
use std::fmt::Write as _;
use std::path::Path;

const STATIONS: [(&str, i64); 3] = [
    ("Hyde Park Corner, Hyde Park", 1),
    ("Soho Square , Soho", 1),
    ("Waterloo Station 1/2", 2),
];

/// Two weeks of hourly rows per station; the count follows the hour of day.
fn write_feature_table(dir: &Path, task: Task) {
    let mut csv = format!("station,cluster_id,start_hour,hour,dayofweek,is_weekend,temp,conditions,{task}_count\n");
    for (station, cluster) in STATIONS {
        for day in 0..14u32 {
            for hour in 0..24u32 {
                let dayofweek = day % 7;
                let is_weekend = if dayofweek >= 5 { "True" } else { "False" };
                let count = hour / 4 + cluster as u32;
                writeln!(
                    csv,
                    "\"{station}\",{cluster}.0,2025-06-{:02} {hour:02}:00:00,{hour},{dayofweek},{is_weekend},12.0,Clear,{count}",
                    day + 2
                )
                .unwrap();
            }
        }
    }
    std::fs::write(dir.join(format!("{task}_features_2.csv")), csv).unwrap();
}

fn write_station_table(dir: &Path) {
    let mut csv = String::from("station,latitude,longitude,cluster_id\n");
    for (i, (station, cluster)) in STATIONS.iter().enumerate() {
        writeln!(csv, "\"{station}\",51.5{i},-0.1{i},{cluster}").unwrap();
    }
    std::fs::write(dir.join("station_with_clusters.csv"), csv).unwrap();
}

fn prepare(root: &Path) -> ForecastSettings {
    let settings = ForecastSettings {
        model_dir: root.join("models"),
        processed_dir: root.join("processed_data"),
        data_dir: root.join("data_for_model"),
        ..Default::default()
    };
    std::fs::create_dir_all(&settings.processed_dir).unwrap();
    std::fs::create_dir_all(&settings.data_dir).unwrap();
    write_station_table(&settings.processed_dir);
    write_feature_table(&settings.data_dir, Task::Pickup);
    write_feature_table(&settings.data_dir, Task::Dropoff);
    settings
}

#[tokio::test]
async fn test_full_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let settings = prepare(dir.path());

    training::write_hourly_averages(&settings).unwrap();
    let report = training::train(&settings, &Tier::MODEL_TIERS).unwrap();
    assert!(report.global.contains_key(&Task::Pickup));
    assert_eq!(report.cluster[&Task::Pickup].len(), 2);
    assert_eq!(report.station[&Task::Dropoff].len(), 3);

    // station artifacts land under their file-safe names
    assert!(
        settings
            .model_dir
            .join("station/pickup_station_Soho_Square__Soho.json")
            .exists()
    );
    assert!(
        settings
            .model_dir
            .join("station/dropoff_station_Waterloo_Station_1_2_features_order.json")
            .exists()
    );

    let table = strategy::generate(&settings).unwrap();
    assert_eq!(table.len(), STATIONS.len());
    let on_disk = StrategyTable::load(&settings.strategy_path()).unwrap();
    assert_eq!(on_disk, table);

    // any model tier chosen must have passed the gate
    let station_metrics = &report.station[&Task::Pickup];
    for (station, _) in STATIONS {
        if table.get(station, Task::Pickup) == Tier::Station {
            assert!(passes_gate(station_metrics[station].best().unwrap()));
        }
    }

    let dispatcher = Dispatcher::from_settings(&settings, WeatherService::neutral()).unwrap();
    let date = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
    for (station, cluster) in STATIONS {
        for task in Task::ALL {
            let request = PredictionRequest {
                station_name: station.to_string(),
                date,
                hour: 9,
                task,
            };
            let prediction = dispatcher.serve(&request).await.unwrap();
            assert!(prediction.is_ok(), "{station} {task}: {}", prediction.indicator());
            assert_eq!(prediction.tier_used, Some(table.get(station, task)));

            // 9 / 4 + cluster, allowing for rounding up
            let expected = 2 + cluster as u32;
            assert!(
                (expected.saturating_sub(1)..=expected + 1).contains(&prediction.predicted_count),
                "{station} {task}: {}",
                prediction.predicted_count
            );
        }
    }

    let unknown = dispatcher
        .predict("Nowhere", date.and_hms_opt(9, 0, 0).unwrap(), Task::Pickup)
        .await;
    assert_eq!(unknown.failure, Some(FailureReason::UnknownStation));
    assert_eq!(unknown.predicted_count, 0);
}

#[tokio::test]
async fn test_serving_without_training_uses_averages() {
    let dir = tempfile::tempdir().unwrap();
    let settings = prepare(dir.path());
    training::write_hourly_averages(&settings).unwrap();

    // no strategy file: everything routes to the average
    let dispatcher = Dispatcher::from_settings(&settings, WeatherService::neutral()).unwrap();
    let prediction = dispatcher
        .serve(&PredictionRequest {
            station_name: "Waterloo Station 1/2".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 7, 5).unwrap(),
            hour: 17,
            task: Task::Dropoff,
        })
        .await
        .unwrap();

    assert_eq!(prediction.tier_used, Some(Tier::Average));
    assert_eq!(prediction.indicator(), "average");
    assert_eq!(prediction.predicted_count, 17 / 4 + 2);

    let history = dir.path().join("history.csv");
    append_record(&history, &prediction.to_record()).unwrap();
    append_record(&history, &prediction.to_record()).unwrap();
    let content = std::fs::read_to_string(&history).unwrap();
    assert_eq!(content.lines().count(), 3);
    assert!(content.lines().next().unwrap().starts_with("station,timestamp,task"));
}

#[tokio::test]
async fn test_strategy_survives_missing_tier_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let settings = prepare(dir.path());
    training::write_hourly_averages(&settings).unwrap();
    training::train(&settings, &[Tier::Global]).unwrap();

    let table = strategy::generate(&settings).unwrap();
    for (_, choice) in table.iter() {
        for task in Task::ALL {
            assert!(matches!(choice.get(task), Tier::Global | Tier::Average));
        }
    }
}
