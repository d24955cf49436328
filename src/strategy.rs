//! Per-station, per-task choice of model tier.
//!
//! The strategy document maps every station to one tier per task:
//! ```json
//! { "Hyde Park Corner": { "pickup": "cluster", "dropoff": "average" } }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactStore;
use crate::config::ForecastSettings;
use crate::output::{read_json, write_json_atomic};
use crate::reference::ReferenceData;
use crate::training::{CandidateMetric, GlobalMetrics, GroupedMetrics};
use crate::types::{Task, Tier};

/// Quality gate: a model tier is used only when MAE < `MAX_MAE` and
/// R2 > `MIN_R2` on held-out data.
pub const MAX_MAE: f64 = 2.0;
pub const MIN_R2: f64 = 0.6;

pub fn passes_gate(metric: &CandidateMetric) -> bool {
    metric.mae < MAX_MAE && metric.r2 > MIN_R2
}

/// Lowest MAE among `candidates`, the earliest on a tie, if it passes the
/// gate. Everything else falls back to [`Tier::Average`].
pub fn choose_tier(candidates: &[(Tier, CandidateMetric)]) -> Tier {
    let mut best: Option<&(Tier, CandidateMetric)> = None;
    for candidate in candidates {
        if best.is_none_or(|(_, b)| candidate.1.mae < b.mae) {
            best = Some(candidate);
        }
    }
    match best {
        Some((tier, metric)) if passes_gate(metric) => *tier,
        _ => Tier::Average,
    }
}

fn average() -> Tier {
    Tier::Average
}

/// Unknown tier names read as [`Tier::Average`] instead of failing the whole
/// document.
fn lenient_tier<'de, D>(deserializer: D) -> Result<Tier, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.parse().unwrap_or_else(|_| {
        warn!(tier = %raw, "Unrecognised tier in strategy, using average");
        Tier::Average
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationStrategy {
    #[serde(default = "average", deserialize_with = "lenient_tier")]
    pub pickup: Tier,
    #[serde(default = "average", deserialize_with = "lenient_tier")]
    pub dropoff: Tier,
}

impl StationStrategy {
    pub fn get(&self, task: Task) -> Tier {
        match task {
            Task::Pickup => self.pickup,
            Task::Dropoff => self.dropoff,
        }
    }

    fn set(&mut self, task: Task, tier: Tier) {
        match task {
            Task::Pickup => self.pickup = tier,
            Task::Dropoff => self.dropoff = tier,
        }
    }
}

impl Default for StationStrategy {
    fn default() -> Self {
        Self {
            pickup: Tier::Average,
            dropoff: Tier::Average,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyTable {
    stations: BTreeMap<String, StationStrategy>,
}

impl StrategyTable {
    pub fn load(path: &Path) -> Result<Self> {
        let table: Self = read_json(path)?;
        info!(stations = table.len(), "Strategy loaded");
        Ok(table)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self).with_context(|| format!("writing {}", path.display()))
    }

    pub fn insert(&mut self, station: impl Into<String>, strategy: StationStrategy) {
        self.stations.insert(station.into(), strategy);
    }

    /// Tier for a (station, task) pair; pairs with no entry use the average.
    pub fn get(&self, station: &str, task: Task) -> Tier {
        self.stations
            .get(station)
            .map_or(Tier::Average, |s| s.get(task))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StationStrategy)> {
        self.stations.iter()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

/// The three per-tier metrics documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierMetrics {
    pub global: GlobalMetrics,
    pub cluster: GroupedMetrics,
    pub station: GroupedMetrics,
}

impl TierMetrics {
    /// Reads `{tier}/metrics.json` for every model tier. A tier that was never
    /// trained has no file and contributes no candidates.
    pub fn load(store: &ArtifactStore) -> Result<Self> {
        Ok(Self {
            global: load_or_default(&store.metrics_path(Tier::Global))?,
            cluster: load_or_default(&store.metrics_path(Tier::Cluster))?,
            station: load_or_default(&store.metrics_path(Tier::Station))?,
        })
    }
}

fn load_or_default<T: Default + serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        warn!(path = %path.display(), "Metrics not found, tier has no candidates");
        return Ok(T::default());
    }
    read_json(path)
}

/// Candidates for one (station, task) in global, cluster, station order.
fn candidates_for(
    metrics: &TierMetrics,
    station: &str,
    cluster: Option<i64>,
    task: Task,
) -> Vec<(Tier, CandidateMetric)> {
    let mut out = Vec::with_capacity(3);
    if let Some(m) = metrics.global.get(&task).and_then(|u| u.best()) {
        out.push((Tier::Global, *m));
    }
    if let Some(m) = cluster.and_then(|id| {
        metrics
            .cluster
            .get(&task)
            .and_then(|units| units.get(&id.to_string()))
            .and_then(|u| u.best())
    }) {
        out.push((Tier::Cluster, *m));
    }
    if let Some(m) = metrics
        .station
        .get(&task)
        .and_then(|units| units.get(station))
        .and_then(|u| u.best())
    {
        out.push((Tier::Station, *m));
    }
    out
}

/// Chooses a tier for both tasks of every station in `all_stations`.
pub fn build_strategy(
    metrics: &TierMetrics,
    station_to_cluster: &BTreeMap<String, i64>,
    all_stations: &BTreeSet<String>,
) -> StrategyTable {
    let mut table = StrategyTable::default();
    for station in all_stations {
        let cluster = station_to_cluster.get(station).copied();
        let mut choice = StationStrategy::default();
        for task in Task::ALL {
            let candidates = candidates_for(metrics, station, cluster, task);
            let tier = choose_tier(&candidates);
            debug!(station = %station, task = %task, candidates = candidates.len(), tier = %tier, "Tier chosen");
            choice.set(task, tier);
        }
        table.insert(station.clone(), choice);
    }
    table
}

/// Rebuilds `strategy_by_station.json` from the metrics on disk.
pub fn generate(settings: &ForecastSettings) -> Result<StrategyTable> {
    let refs = ReferenceData::load(settings).context("loading reference data")?;
    let store = ArtifactStore::new(&settings.model_dir);
    let metrics = TierMetrics::load(&store)?;

    let table = build_strategy(&metrics, &refs.stations.station_to_cluster(), &refs.all_stations());

    let path = settings.strategy_path();
    table.write(&path)?;

    let mut counts: BTreeMap<Tier, usize> = BTreeMap::new();
    for (_, s) in table.iter() {
        *counts.entry(s.pickup).or_default() += 1;
        *counts.entry(s.dropoff).or_default() += 1;
    }
    info!(
        path = %path.display(),
        stations = table.len(),
        global = counts.get(&Tier::Global).copied().unwrap_or(0),
        cluster = counts.get(&Tier::Cluster).copied().unwrap_or(0),
        station = counts.get(&Tier::Station).copied().unwrap_or(0),
        average = counts.get(&Tier::Average).copied().unwrap_or(0),
        "Strategy written"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::UnitMetrics;

    fn unit(mae: f64, r2: f64) -> UnitMetrics {
        let mut u = UnitMetrics::default();
        u.candidates.insert("gbdt".into(), CandidateMetric { mae, r2 });
        u.best_model = Some("gbdt".into());
        u
    }

    fn metrics() -> TierMetrics {
        let mut m = TierMetrics::default();
        m.global.insert(Task::Pickup, unit(1.5, 0.7));
        m.cluster
            .entry(Task::Pickup)
            .or_default()
            .insert("3".into(), unit(1.2, 0.65));
        m.station
            .entry(Task::Pickup)
            .or_default()
            .insert("Hyde Park Corner".into(), unit(3.0, 0.8));
        m
    }

    fn stations(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_lowest_mae_within_gate_wins() {
        let clusters = BTreeMap::from([("Hyde Park Corner".to_string(), 3)]);
        let table = build_strategy(&metrics(), &clusters, &stations(&["Hyde Park Corner"]));

        assert_eq!(table.get("Hyde Park Corner", Task::Pickup), Tier::Cluster);
        // no dropoff metrics at all
        assert_eq!(table.get("Hyde Park Corner", Task::Dropoff), Tier::Average);
    }

    #[test]
    fn test_gate_rejects_best_candidate() {
        let low_r2 = CandidateMetric { mae: 0.5, r2: 0.6 };
        let high_mae = CandidateMetric { mae: 2.0, r2: 0.9 };
        assert_eq!(choose_tier(&[(Tier::Global, low_r2)]), Tier::Average);
        assert_eq!(choose_tier(&[(Tier::Station, high_mae)]), Tier::Average);
        // the worse but passing candidate is not considered
        assert_eq!(
            choose_tier(&[(Tier::Global, CandidateMetric { mae: 1.9, r2: 0.9 }), (Tier::Cluster, low_r2)]),
            Tier::Average
        );
        assert_eq!(choose_tier(&[]), Tier::Average);
    }

    #[test]
    fn test_tie_goes_to_earlier_tier() {
        let m = CandidateMetric { mae: 1.0, r2: 0.9 };
        assert_eq!(choose_tier(&[(Tier::Global, m), (Tier::Cluster, m), (Tier::Station, m)]), Tier::Global);
        assert_eq!(choose_tier(&[(Tier::Cluster, m), (Tier::Station, m)]), Tier::Cluster);
    }

    #[test]
    fn test_station_without_cluster_skips_cluster_candidate() {
        let table = build_strategy(&metrics(), &BTreeMap::new(), &stations(&["Hyde Park Corner"]));
        assert_eq!(table.get("Hyde Park Corner", Task::Pickup), Tier::Global);
    }

    #[test]
    fn test_every_station_gets_both_tasks() {
        let table = build_strategy(&TierMetrics::default(), &BTreeMap::new(), &stations(&["A", "B"]));
        assert_eq!(table.len(), 2);
        for (_, s) in table.iter() {
            assert_eq!(*s, StationStrategy::default());
        }
    }

    #[test]
    fn test_chosen_tiers_pass_gate() {
        let m = metrics();
        let clusters = BTreeMap::from([("Hyde Park Corner".to_string(), 3)]);
        let table = build_strategy(&m, &clusters, &stations(&["Hyde Park Corner", "Elsewhere"]));
        for (station, s) in table.iter() {
            for task in Task::ALL {
                let tier = s.get(task);
                if tier == Tier::Average {
                    continue;
                }
                let cands = candidates_for(&m, station, clusters.get(station).copied(), task);
                let chosen = cands.iter().find(|(t, _)| *t == tier).unwrap();
                assert!(passes_gate(&chosen.1));
            }
        }
    }

    #[test]
    fn test_named_best_without_entry_is_ignored() {
        let mut m = TierMetrics::default();
        let mut broken = unit(0.1, 0.99);
        broken.best_model = Some("xgboost".into());
        m.global.insert(Task::Pickup, broken);
        let table = build_strategy(&m, &BTreeMap::new(), &stations(&["A"]));
        assert_eq!(table.get("A", Task::Pickup), Tier::Average);
    }

    #[test]
    fn test_document_roundtrip_and_lenient_tiers() {
        let table: StrategyTable = serde_json::from_str(
            r#"{"A": {"pickup": "station", "dropoff": "lstm"}, "B": {"pickup": "global"}}"#,
        )
        .unwrap();
        assert_eq!(table.get("A", Task::Pickup), Tier::Station);
        assert_eq!(table.get("A", Task::Dropoff), Tier::Average);
        assert_eq!(table.get("B", Task::Dropoff), Tier::Average);
        assert_eq!(table.get("missing", Task::Pickup), Tier::Average);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strategy_by_station.json");
        table.write(&path).unwrap();
        assert_eq!(StrategyTable::load(&path).unwrap(), table);
    }

    #[test]
    fn test_missing_metrics_files_give_empty_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert_eq!(TierMetrics::load(&store).unwrap(), TierMetrics::default());
    }
}
