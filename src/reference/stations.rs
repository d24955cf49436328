//! Station table produced by the upstream spatial clustering step.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

use super::error::TableError;
use crate::types::Weektype;

/// A single row of `station_with_clusters.csv`.
///
/// The clustering step writes `cluster_id` as an integer, but older exports
/// went through a float column, so both `3` and `3.0` are accepted.
#[derive(Debug, Deserialize)]
struct StationRow {
    station: String,
    latitude: f64,
    longitude: f64,
    cluster_id: f64,
    #[serde(rename = "type", default)]
    weektype: Option<Weektype>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub name: String,
    pub cluster_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Weektype label merged into the cluster table, if present.
    pub weektype: Option<Weektype>,
}

#[derive(Debug, Clone, Default)]
pub struct StationTable {
    stations: BTreeMap<String, Station>,
}

impl StationTable {
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let file = File::open(path)
            .map_err(|e| TableError::Read(path.to_path_buf(), csv::Error::from(e)))?;
        let mut rdr = csv::Reader::from_reader(file);

        let mut table = Self::default();
        for result in rdr.deserialize() {
            let row: StationRow = result.map_err(|e| TableError::Read(path.to_path_buf(), e))?;
            table.insert(Station {
                name: row.station,
                cluster_id: row.cluster_id as i64,
                latitude: row.latitude,
                longitude: row.longitude,
                weektype: row.weektype,
            });
        }

        debug!(path = %path.display(), stations = table.len(), "Station table loaded");
        Ok(table)
    }

    pub fn insert(&mut self, station: Station) {
        self.stations.insert(station.name.clone(), station);
    }

    pub fn get(&self, name: &str) -> Option<&Station> {
        self.stations.get(name)
    }

    /// Station name to cluster id, ordered by name.
    pub fn station_to_cluster(&self) -> BTreeMap<String, i64> {
        self.stations
            .values()
            .map(|s| (s.name.clone(), s.cluster_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}
