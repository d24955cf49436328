//! Accuracy metrics and the per-tier metrics documents.
//!
//! A unit's entry maps each candidate name to its held-out scores and names
//! the winner:
//! ```json
//! { "ridge": { "MAE": 1.42, "R2": 0.71 }, "gbdt": { "MAE": 1.1, "R2": 0.8 }, "best_model": "gbdt" }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Task;

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean absolute error. Returns 0.0 for empty input.
pub fn mae(predicted: &[f64], actual: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a).abs())
        .sum::<f64>()
        / actual.len() as f64
}

/// Coefficient of determination.
///
/// A constant target scores 1.0 when predicted perfectly and 0.0 otherwise.
pub fn r2(predicted: &[f64], actual: &[f64]) -> f64 {
    let avg = mean(actual);
    let ss_res: f64 = predicted.iter().zip(actual).map(|(p, a)| (a - p).powi(2)).sum();
    let ss_tot: f64 = actual.iter().map(|a| (a - avg).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetric {
    #[serde(rename = "MAE")]
    pub mae: f64,
    #[serde(rename = "R2")]
    pub r2: f64,
}

impl CandidateMetric {
    pub fn evaluate(predicted: &[f64], actual: &[f64]) -> Self {
        Self {
            mae: round4(mae(predicted, actual)),
            r2: round4(r2(predicted, actual)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitMetrics {
    #[serde(flatten)]
    pub candidates: BTreeMap<String, CandidateMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_model: Option<String>,
}

impl UnitMetrics {
    /// Scores of the named winner, if both the name and its entry exist.
    pub fn best(&self) -> Option<&CandidateMetric> {
        self.best_model
            .as_deref()
            .and_then(|name| self.candidates.get(name))
    }
}

/// `global/metrics.json`: task → unit metrics.
pub type GlobalMetrics = BTreeMap<Task, UnitMetrics>;

/// `cluster/metrics.json` and `station/metrics.json`: task → unit key → metrics.
pub type GroupedMetrics = BTreeMap<Task, BTreeMap<String, UnitMetrics>>;
