use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("Failed to read table '{0}'")]
    Read(PathBuf, #[source] csv::Error),

    #[error("Failed to write table '{0}'")]
    Write(PathBuf, #[source] csv::Error),

    #[error("Failed to flush table '{0}'")]
    Flush(PathBuf, #[source] std::io::Error),

    #[error("Duplicate hourly average for station '{station}' at hour {hour} in '{path}'")]
    DuplicateAverage {
        path: PathBuf,
        station: String,
        hour: u32,
    },

    #[error("Hour {hour} for station '{station}' is outside 0..=23")]
    InvalidHour { station: String, hour: i64 },

    #[error("Unparseable timestamp '{0}'")]
    InvalidTimestamp(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Unknown station '{0}'")]
    UnknownStation(String),
}
