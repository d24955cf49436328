//! Historical mean count per (station, hour-of-day), one table per task.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

use super::error::TableError;
use crate::types::Task;

#[derive(Debug, Deserialize)]
struct AverageRow {
    station: String,
    hour: i64,
    #[serde(alias = "avg_pickup_count", alias = "avg_dropoff_count", alias = "avg_count")]
    average: f64,
}

#[derive(Debug, Clone, Default)]
pub struct HourlyAverages {
    values: HashMap<String, [Option<f64>; 24]>,
}

impl HourlyAverages {
    /// Loads `avg_hourly_<task>_by_station.csv`.
    ///
    /// # Errors
    ///
    /// Fails on unreadable files, hours outside `0..=23`, and repeated
    /// `(station, hour)` rows.
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let file = File::open(path)
            .map_err(|e| TableError::Read(path.to_path_buf(), csv::Error::from(e)))?;
        let mut rdr = csv::Reader::from_reader(file);

        let mut table = Self::default();
        for result in rdr.deserialize() {
            let row: AverageRow = result.map_err(|e| TableError::Read(path.to_path_buf(), e))?;
            let hour = validate_hour(&row.station, row.hour)?;
            if !table.insert(&row.station, hour, row.average) {
                return Err(TableError::DuplicateAverage {
                    path: path.to_path_buf(),
                    station: row.station,
                    hour,
                });
            }
        }

        debug!(path = %path.display(), stations = table.values.len(), "Hourly averages loaded");
        Ok(table)
    }

    /// Builds the table as the mean of `count` over each `(station, hour)`.
    pub fn from_observations<I, S>(observations: I) -> Self
    where
        I: IntoIterator<Item = (S, u32, f64)>,
        S: Into<String>,
    {
        let mut sums: HashMap<(String, u32), (f64, usize)> = HashMap::new();
        for (station, hour, count) in observations {
            let entry = sums.entry((station.into(), hour)).or_insert((0.0, 0));
            entry.0 += count;
            entry.1 += 1;
        }

        let mut table = Self::default();
        for ((station, hour), (sum, n)) in sums {
            table.insert(&station, hour, sum / n as f64);
        }
        table
    }

    /// Inserts a value; returns `false` if the slot was already taken.
    pub fn insert(&mut self, station: &str, hour: u32, average: f64) -> bool {
        let Some(slot) = self
            .values
            .entry(station.to_string())
            .or_insert([None; 24])
            .get_mut(hour as usize)
        else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(average);
        true
    }

    pub fn get(&self, station: &str, hour: u32) -> Option<f64> {
        self.values
            .get(station)
            .and_then(|hours| hours.get(hour as usize).copied().flatten())
    }

    pub fn stations(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Writes the table sorted by station then hour, with the
    /// `avg_<task>_count` value column.
    pub fn write(&self, path: &Path, task: Task) -> Result<(), TableError> {
        let mut writer = csv::Writer::from_path(path)
            .map_err(|e| TableError::Write(path.to_path_buf(), e))?;
        let value_column = format!("avg_{task}_count");
        writer
            .write_record(["station", "hour", value_column.as_str()])
            .map_err(|e| TableError::Write(path.to_path_buf(), e))?;

        let ordered: BTreeMap<&String, &[Option<f64>; 24]> = self.values.iter().collect();
        let mut rows = 0usize;
        for (station, hours) in ordered {
            for (hour, value) in hours.iter().enumerate() {
                let Some(value) = value else { continue };
                writer
                    .write_record([station.as_str(), &hour.to_string(), &value.to_string()])
                    .map_err(|e| TableError::Write(path.to_path_buf(), e))?;
                rows += 1;
            }
        }
        writer
            .flush()
            .map_err(|e| TableError::Flush(path.to_path_buf(), e))?;

        info!(path = %path.display(), task = %task, rows, "Hourly averages written");
        Ok(())
    }
}

/// Stations present in either table, sorted by name.
pub fn union_of_stations(pickup: &HourlyAverages, dropoff: &HourlyAverages) -> BTreeSet<String> {
    pickup
        .stations()
        .chain(dropoff.stations())
        .map(str::to_string)
        .collect()
}

fn validate_hour(station: &str, hour: i64) -> Result<u32, TableError> {
    if (0..24).contains(&hour) {
        Ok(hour as u32)
    } else {
        Err(TableError::InvalidHour {
            station: station.to_string(),
            hour,
        })
    }
}
