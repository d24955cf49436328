use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;

const PEAK_HOURS: [u32; 6] = [7, 8, 9, 17, 18, 19];

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Calendar fields derived from a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Calendar {
    pub hour: u32,
    /// Monday = 0.
    pub dayofweek: u32,
    pub month: u32,
    pub is_weekend: bool,
    pub is_peak_hour: bool,
}

impl Calendar {
    pub fn from_timestamp(at: NaiveDateTime) -> Self {
        let hour = at.hour();
        let dayofweek = at.weekday().num_days_from_monday();
        Self {
            hour,
            dayofweek,
            month: at.month(),
            is_weekend: dayofweek >= 5,
            is_peak_hour: PEAK_HOURS.contains(&hour),
        }
    }
}

/// Parses the timestamp shapes found in the hourly tables and requests.
///
/// Bare dates resolve to midnight. RFC 3339 offsets are ignored and the
/// wall-clock time is kept, since the tables are already in local time.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()))
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
