//! Weekday/weekend classification of stations.
//!
//! A station is weekday-typed when the sum of its weekday hourly means is
//! strictly larger than the sum of its weekend hourly means.

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

use super::error::TableError;
use crate::features::calendar::parse_timestamp;
use crate::types::Weektype;

#[derive(Debug, Serialize, Deserialize)]
struct WeektypeRow {
    station: String,
    #[serde(rename = "type")]
    weektype: Weektype,
}

/// A row of an hourly count table such as `hourly_pickup_count.csv`.
#[derive(Debug, Deserialize)]
struct HourlyCountRow {
    #[serde(alias = "Start station", alias = "End station")]
    station: String,
    #[serde(alias = "start_hour", alias = "end_hour")]
    timestamp: String,
    #[serde(alias = "pickup_count", alias = "dropoff_count")]
    count: f64,
}

#[derive(Debug, Clone, Default)]
pub struct WeektypeTable {
    labels: HashMap<String, Weektype>,
}

impl WeektypeTable {
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let file = File::open(path)
            .map_err(|e| TableError::Read(path.to_path_buf(), csv::Error::from(e)))?;
        let mut rdr = csv::Reader::from_reader(file);

        let mut labels = HashMap::new();
        for result in rdr.deserialize() {
            let row: WeektypeRow = result.map_err(|e| TableError::Read(path.to_path_buf(), e))?;
            labels.insert(row.station, row.weektype);
        }

        debug!(path = %path.display(), stations = labels.len(), "Weektype labels loaded");
        Ok(Self { labels })
    }

    pub fn from_labels(labels: impl IntoIterator<Item = (String, Weektype)>) -> Self {
        Self {
            labels: labels.into_iter().collect(),
        }
    }

    pub fn get(&self, station: &str) -> Option<Weektype> {
        self.labels.get(station).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn write(&self, path: &Path) -> Result<(), TableError> {
        let mut writer = csv::Writer::from_path(path)
            .map_err(|e| TableError::Write(path.to_path_buf(), e))?;
        let ordered: BTreeMap<&String, &Weektype> = self.labels.iter().collect();
        for (station, weektype) in ordered {
            writer
                .serialize(WeektypeRow {
                    station: station.clone(),
                    weektype: *weektype,
                })
                .map_err(|e| TableError::Write(path.to_path_buf(), e))?;
        }
        writer
            .flush()
            .map_err(|e| TableError::Flush(path.to_path_buf(), e))?;
        info!(path = %path.display(), stations = self.labels.len(), "Weektype labels written");
        Ok(())
    }
}

/// Reads an hourly count table and labels every station in it.
pub fn label_from_hourly_counts(path: &Path) -> Result<WeektypeTable, TableError> {
    let file =
        File::open(path).map_err(|e| TableError::Read(path.to_path_buf(), csv::Error::from(e)))?;
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(file);

    let mut observations = Vec::new();
    for result in rdr.deserialize() {
        let row: HourlyCountRow = result.map_err(|e| TableError::Read(path.to_path_buf(), e))?;
        let at = parse_timestamp(&row.timestamp)
            .ok_or_else(|| TableError::InvalidTimestamp(row.timestamp.clone()))?;
        observations.push((row.station, at, row.count));
    }

    Ok(label_stations(observations))
}

/// Labels stations from `(station, timestamp, count)` observations.
pub fn label_stations<I>(observations: I) -> WeektypeTable
where
    I: IntoIterator<Item = (String, NaiveDateTime, f64)>,
{
    // (station, hour, is_weekend) -> (sum, n)
    let mut cells: HashMap<(String, u32, bool), (f64, usize)> = HashMap::new();
    for (station, at, count) in observations {
        let is_weekend = at.weekday().num_days_from_monday() >= 5;
        let cell = cells.entry((station, at.hour(), is_weekend)).or_insert((0.0, 0));
        cell.0 += count;
        cell.1 += 1;
    }

    let mut totals: HashMap<String, (f64, f64)> = HashMap::new();
    for ((station, _, is_weekend), (sum, n)) in cells {
        let mean = sum / n as f64;
        let total = totals.entry(station).or_insert((0.0, 0.0));
        if is_weekend {
            total.1 += mean;
        } else {
            total.0 += mean;
        }
    }

    WeektypeTable::from_labels(totals.into_iter().map(|(station, (weekday, weekend))| {
        let label = if weekday > weekend {
            Weektype::Weekday
        } else {
            Weektype::Weekend
        };
        (station, label)
    }))
}
