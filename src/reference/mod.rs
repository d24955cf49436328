//! Read-only reference data shared by the strategy builder and the serving
//! path.
//!
//! [`ReferenceData`] is loaded once per process and handed around behind an
//! `Arc`; nothing in it changes until the process restarts.

pub mod averages;
pub mod error;
pub mod stations;
pub mod weektype;

pub use averages::HourlyAverages;
pub use error::{LookupError, TableError};
pub use stations::{Station, StationTable};
pub use weektype::WeektypeTable;

use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::config::ForecastSettings;
use crate::types::{Task, Weektype};

#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub stations: StationTable,
    pub weektypes: WeektypeTable,
    pub pickup_averages: HourlyAverages,
    pub dropoff_averages: HourlyAverages,
}

impl ReferenceData {
    /// Loads stations, weektype labels and both hourly-average tables.
    ///
    /// A missing weektype file is tolerated: labels merged into the station
    /// table are used, and anything else defaults to weekday.
    pub fn load(settings: &ForecastSettings) -> Result<Self, TableError> {
        let stations = StationTable::load(&settings.stations_path())?;

        let weektype_path = settings.weektype_path();
        let weektypes = if weektype_path.exists() {
            WeektypeTable::load(&weektype_path)?
        } else {
            warn!(path = %weektype_path.display(), "Weektype labels not found, using station table labels");
            WeektypeTable::default()
        };

        let data = Self {
            stations,
            weektypes,
            pickup_averages: HourlyAverages::load(&settings.averages_path(Task::Pickup))?,
            dropoff_averages: HourlyAverages::load(&settings.averages_path(Task::Dropoff))?,
        };

        info!(
            stations = data.stations.len(),
            labelled = data.weektypes.len(),
            "Reference data loaded"
        );
        Ok(data)
    }

    pub fn averages(&self, task: Task) -> &HourlyAverages {
        match task {
            Task::Pickup => &self.pickup_averages,
            Task::Dropoff => &self.dropoff_averages,
        }
    }

    pub fn hourly_average(&self, station: &str, hour: u32, task: Task) -> Option<f64> {
        self.averages(task).get(station, hour)
    }

    /// Label file first, then the station table, then weekday.
    pub fn weektype(&self, station: &str) -> Weektype {
        self.weektypes
            .get(station)
            .or_else(|| self.stations.get(station).and_then(|s| s.weektype))
            .unwrap_or_default()
    }

    /// Every station that has an hourly average for either task.
    pub fn all_stations(&self) -> BTreeSet<String> {
        averages::union_of_stations(&self.pickup_averages, &self.dropoff_averages)
    }
}
