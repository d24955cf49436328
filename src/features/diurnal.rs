//! Fixed hour-of-day demand shapes and the proxy dynamics derived from them.
//!
//! A forward-looking forecast has no recent history, so the lag, rolling and
//! cumulative features are approximated by scaling the station's hourly mean
//! with a shape factor. The construction must stay exactly as is: trained
//! artifacts were fitted against these columns.

use serde::Serialize;

use crate::types::Weektype;

#[rustfmt::skip]
pub const WEEKDAY_CURVE: [f64; 24] = [
    0.1, 0.1, 0.05, 0.05, 0.05,
    0.1, 0.2,
    0.6, 0.7, 0.6,
    0.3, 0.3, 0.3, 0.25, 0.25,
    0.3, 0.4,
    0.7, 0.7, 0.6,
    0.2, 0.15, 0.1, 0.1,
];

#[rustfmt::skip]
pub const WEEKEND_CURVE: [f64; 24] = [
    0.05, 0.05, 0.05, 0.05, 0.05,
    0.1, 0.15,
    0.2, 0.25, 0.3,
    0.4, 0.5, 0.55, 0.55, 0.6,
    0.65, 0.7,
    0.8, 0.8, 0.6,
    0.3, 0.2, 0.1, 0.1,
];

/// Scale applied when a station's dominant weektype differs from the day.
const OFF_TYPE_SCALE: f64 = 0.5;

/// Factor used for hours missing from a curve.
const MISSING_HOUR_FACTOR: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    Weekday,
    WeekdayOnWeekend,
    WeekendOnWeekday,
    Weekend,
}

impl Curve {
    pub fn select(weektype: Weektype, is_weekend: bool) -> Self {
        match (weektype, is_weekend) {
            (Weektype::Weekday, false) => Curve::Weekday,
            (Weektype::Weekday, true) => Curve::WeekdayOnWeekend,
            (Weektype::Weekend, false) => Curve::WeekendOnWeekday,
            (Weektype::Weekend, true) => Curve::Weekend,
        }
    }

    pub fn factor(&self, hour: u32) -> f64 {
        let (curve, scale) = match self {
            Curve::Weekday => (&WEEKDAY_CURVE, 1.0),
            Curve::WeekdayOnWeekend => (&WEEKDAY_CURVE, OFF_TYPE_SCALE),
            Curve::WeekendOnWeekday => (&WEEKEND_CURVE, OFF_TYPE_SCALE),
            Curve::Weekend => (&WEEKEND_CURVE, 1.0),
        };
        curve
            .get(hour as usize)
            .map_or(MISSING_HOUR_FACTOR, |v| v * scale)
    }
}

/// Stand-ins for the lag, rolling and cumulative history features.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SyntheticDynamics {
    pub lag_1h: f64,
    pub rolling_3h_mean: f64,
    pub rolling_6h_std: f64,
    pub cumsum_day: f64,
}

impl SyntheticDynamics {
    pub fn from_mean(cluster_mean: f64, hour: u32, factor: f64) -> Self {
        Self {
            lag_1h: cluster_mean * factor,
            rolling_3h_mean: cluster_mean * (factor + 0.1),
            rolling_6h_std: cluster_mean * (factor + 0.15),
            cumsum_day: cluster_mean * (hour + 1) as f64 * factor,
        }
    }
}
