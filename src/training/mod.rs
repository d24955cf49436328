//! Offline training: feature tables in, artifacts and metrics documents out.

pub mod metrics;
pub mod regressors;
pub mod split;
pub mod table;
pub mod trainer;

pub use metrics::{CandidateMetric, GlobalMetrics, GroupedMetrics, UnitMetrics};
pub use table::{FeatureTable, TableLoadError};
pub use trainer::{MIN_UNIT_ROWS, fit_unit, train_tier};

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::info;

use crate::artifacts::{ArtifactStore, TrainingUnit};
use crate::config::ForecastSettings;
use crate::output::write_json_atomic;
use crate::reference::HourlyAverages;
use crate::types::{Task, Tier};

/// Metrics gathered by one [`train`] run, keyed the way they are written.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TrainingReport {
    pub global: GlobalMetrics,
    pub cluster: GroupedMetrics,
    pub station: GroupedMetrics,
}

impl TrainingReport {
    fn record(&mut self, task: Task, unit: TrainingUnit, metrics: UnitMetrics) {
        match unit.metrics_key() {
            None => {
                self.global.insert(task, metrics);
            }
            Some(key) => {
                let doc = match unit.tier() {
                    Tier::Cluster => &mut self.cluster,
                    _ => &mut self.station,
                };
                doc.entry(task).or_default().insert(key, metrics);
            }
        }
    }
}

/// Trains the requested model tiers for both tasks and writes one
/// `metrics.json` per tier.
///
/// A missing feature table or target column aborts the run. Anything that
/// goes wrong inside a unit only skips that unit.
pub fn train(settings: &ForecastSettings, tiers: &[Tier]) -> Result<TrainingReport> {
    let store = ArtifactStore::new(&settings.model_dir);
    let tiers: Vec<Tier> = tiers
        .iter()
        .copied()
        .filter(|t| Tier::MODEL_TIERS.contains(t))
        .collect();
    let mut report = TrainingReport::default();

    for task in Task::ALL {
        let path = settings.features_path(task);
        let table = FeatureTable::load(&path, task)
            .with_context(|| format!("loading {task} feature table"))?;

        for &tier in &tiers {
            let results = train_tier(&table, tier, &store)
                .with_context(|| format!("grouping {task} rows for the {tier} tier"))?;
            for (unit, metrics) in results {
                report.record(task, unit, metrics);
            }
        }
    }

    for &tier in &tiers {
        let path = store.metrics_path(tier);
        let written = match tier {
            Tier::Global => write_json_atomic(&path, &report.global),
            Tier::Cluster => write_json_atomic(&path, &grouped_with_all_tasks(&report.cluster)),
            _ => write_json_atomic(&path, &grouped_with_all_tasks(&report.station)),
        };
        written.with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "Metrics written");
    }

    Ok(report)
}

/// Both tasks always appear in a grouped document, empty or not.
fn grouped_with_all_tasks(doc: &GroupedMetrics) -> GroupedMetrics {
    let mut out = doc.clone();
    for task in Task::ALL {
        out.entry(task).or_insert_with(BTreeMap::new);
    }
    out
}

/// Mean target per (station, hour) from each task's feature table, written
/// next to the models as `avg_hourly_<task>_by_station.csv`.
pub fn write_hourly_averages(settings: &ForecastSettings) -> Result<BTreeMap<Task, usize>> {
    let mut written = BTreeMap::new();
    for task in Task::ALL {
        let table = FeatureTable::load(&settings.features_path(task), task)
            .with_context(|| format!("loading {task} feature table"))?;
        let averages = HourlyAverages::from_observations(
            table
                .hourly_observations()
                .with_context(|| format!("collecting {task} observations"))?,
        );

        let path = settings.averages_path(task);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        averages
            .write(&path, task)
            .with_context(|| format!("writing {}", path.display()))?;
        written.insert(task, averages.stations().count());
    }
    Ok(written)
}
