//! Hierarchical bike-share demand forecasting.
//!
//! Offline, [`training`] fits one model per global, cluster and station unit
//! and [`strategy`] picks a tier for every station and task. Online,
//! [`dispatch::Dispatcher`] rebuilds a feature row for a bare (station, hour,
//! task) request and routes it to the chosen model or the historical average.

pub mod artifacts;
pub mod batch;
pub mod config;
pub mod dispatch;
pub mod features;
pub mod output;
pub mod reference;
pub mod strategy;
pub mod training;
pub mod types;
pub mod weather;
