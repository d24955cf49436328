//! Training feature tables (`<task>_features_2.csv`).
//!
//! Columns are typed by content: a column is a feature only if every cell is
//! empty, a number, or a boolean. Identifier and raw-time columns are never
//! features even when they look numeric.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::artifacts::TrainingUnit;
use crate::types::{Task, Tier};

const STATION_COLUMNS: [&str; 3] = ["station", "Start station", "End station"];
const CLUSTER_COLUMN: &str = "cluster_id";
const EXCLUDED_COLUMNS: [&str; 9] = [
    "station",
    "Start station",
    "End station",
    "cluster_id",
    "start_hour",
    "end_hour",
    "timestamp",
    "date",
    "conditions",
];

#[derive(Debug, Error)]
pub enum TableLoadError {
    #[error("Failed to read feature table '{0}'")]
    Read(PathBuf, #[source] csv::Error),

    #[error("Feature table '{path}' has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Non-numeric target '{value}' on row {row} of '{path}'")]
    InvalidTarget {
        path: PathBuf,
        row: usize,
        value: String,
    },
}

#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub task: Task,
    pub source: PathBuf,
    /// Feature column names in file order; this is the order persisted with
    /// every artifact trained on the table.
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    pub stations: Option<Vec<String>>,
    pub clusters: Option<Vec<Option<i64>>>,
}

/// Empty cells and NaN read as 0; booleans as 0/1.
fn parse_cell(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    match raw {
        "" => Some(0.0),
        "true" | "True" | "TRUE" => Some(1.0),
        "false" | "False" | "FALSE" => Some(0.0),
        _ => raw
            .parse::<f64>()
            .ok()
            .map(|v| if v.is_nan() { 0.0 } else { v }),
    }
}

impl FeatureTable {
    pub fn load(path: &Path, task: Task) -> Result<Self, TableLoadError> {
        let mut rdr = csv::Reader::from_path(path)
            .map_err(|e| TableLoadError::Read(path.to_path_buf(), e))?;
        let headers = rdr
            .headers()
            .map_err(|e| TableLoadError::Read(path.to_path_buf(), e))?
            .clone();
        let records = rdr
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TableLoadError::Read(path.to_path_buf(), e))?;

        let column = |name: &str| headers.iter().position(|h| h.trim() == name);

        let target_name = task.target_column();
        let target_idx = column(&target_name).ok_or_else(|| TableLoadError::MissingColumn {
            path: path.to_path_buf(),
            column: target_name.clone(),
        })?;
        let station_idx = STATION_COLUMNS.iter().find_map(|c| column(c));
        let cluster_idx = column(CLUSTER_COLUMN);

        let feature_idx: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(i, name)| *i != target_idx && !EXCLUDED_COLUMNS.contains(&name.trim()))
            .filter(|(i, name)| {
                let numeric = records.iter().all(|r| parse_cell(&r[*i]).is_some());
                if !numeric {
                    debug!(column = name.trim(), "Dropping non-numeric column");
                }
                numeric
            })
            .map(|(i, _)| i)
            .collect();

        let mut rows = Vec::with_capacity(records.len());
        let mut targets = Vec::with_capacity(records.len());
        for (n, record) in records.iter().enumerate() {
            let raw_target = &record[target_idx];
            let target = parse_cell(raw_target).ok_or_else(|| TableLoadError::InvalidTarget {
                path: path.to_path_buf(),
                row: n + 1,
                value: raw_target.to_string(),
            })?;
            targets.push(target);
            rows.push(
                feature_idx
                    .iter()
                    .map(|&i| parse_cell(&record[i]).unwrap_or(0.0))
                    .collect(),
            );
        }

        let stations =
            station_idx.map(|i| records.iter().map(|r| r[i].trim().to_string()).collect());
        let clusters = cluster_idx.map(|i| {
            records
                .iter()
                .map(|r| r[i].trim().parse::<f64>().ok().map(|v| v as i64))
                .collect()
        });

        let table = Self {
            task,
            source: path.to_path_buf(),
            feature_names: feature_idx.iter().map(|&i| headers[i].trim().to_string()).collect(),
            rows,
            targets,
            stations,
            clusters,
        };
        info!(
            path = %path.display(),
            task = %task,
            rows = table.len(),
            features = table.feature_names.len(),
            "Feature table loaded"
        );
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Row indices per training unit of `tier`, in deterministic order.
    pub fn units(&self, tier: Tier) -> Result<Vec<(TrainingUnit, Vec<usize>)>, TableLoadError> {
        match tier {
            Tier::Global | Tier::Average => {
                Ok(vec![(TrainingUnit::Global, (0..self.len()).collect())])
            }
            Tier::Cluster => {
                let clusters = self.clusters.as_ref().ok_or_else(|| self.missing(CLUSTER_COLUMN))?;
                let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
                for (i, cluster) in clusters.iter().enumerate() {
                    if let Some(id) = cluster {
                        groups.entry(*id).or_default().push(i);
                    }
                }
                Ok(groups
                    .into_iter()
                    .map(|(id, rows)| (TrainingUnit::Cluster(id), rows))
                    .collect())
            }
            Tier::Station => {
                let stations = self.stations.as_ref().ok_or_else(|| self.missing("station"))?;
                let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
                for (i, station) in stations.iter().enumerate() {
                    if !station.is_empty() {
                        groups.entry(station.as_str()).or_default().push(i);
                    }
                }
                Ok(groups
                    .into_iter()
                    .map(|(name, rows)| (TrainingUnit::Station(name.to_string()), rows))
                    .collect())
            }
        }
    }

    /// `(station, hour, target)` for every row that has both a station and an
    /// `hour` feature.
    pub fn hourly_observations(&self) -> Result<Vec<(String, u32, f64)>, TableLoadError> {
        let stations = self.stations.as_ref().ok_or_else(|| self.missing("station"))?;
        let hour_idx = self
            .feature_names
            .iter()
            .position(|n| n == "hour")
            .ok_or_else(|| self.missing("hour"))?;

        Ok(self
            .rows
            .iter()
            .zip(&self.targets)
            .zip(stations)
            .filter(|(_, station)| !station.is_empty())
            .filter_map(|((row, &target), station)| {
                let hour = row[hour_idx];
                (0.0..24.0)
                    .contains(&hour)
                    .then(|| (station.clone(), hour as u32, target))
            })
            .collect())
    }

    pub fn select(&self, indices: &[usize]) -> (Vec<Vec<f64>>, Vec<f64>) {
        (
            indices.iter().map(|&i| self.rows[i].clone()).collect(),
            indices.iter().map(|&i| self.targets[i]).collect(),
        )
    }

    fn missing(&self, column: &str) -> TableLoadError {
        TableLoadError::MissingColumn {
            path: self.source.clone(),
            column: column.to_string(),
        }
    }
}
