//! On-disk artifacts: one trained model plus its feature order per training
//! unit, laid out under the model directory as
//!
//! ```text
//! global/{task}_model.json                global/{task}_features_order.json
//! cluster/{task}_cluster_{id}.json        cluster/{task}_cluster_{id}_features_order.json
//! station/{task}_station_{safe}.json      station/{task}_station_{safe}_features_order.json
//! {tier}/metrics.json
//! ```

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info};

use crate::output::write_json_atomic;
use crate::training::regressors::{ModelError, Regressor, TrainedModel};
use crate::types::{Task, Tier};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("No artifact at '{0}'")]
    Missing(PathBuf),

    #[error("Failed to read '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to decode '{0}'")]
    Decode(PathBuf, #[source] serde_json::Error),

    #[error("Rejected '{0}'")]
    Invalid(PathBuf, #[source] ModelError),

    #[error("Failed to write '{0}'")]
    Write(PathBuf, #[source] std::io::Error),
}

/// The rows a single model is trained on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrainingUnit {
    Global,
    Cluster(i64),
    Station(String),
}

impl TrainingUnit {
    pub fn tier(&self) -> Tier {
        match self {
            TrainingUnit::Global => Tier::Global,
            TrainingUnit::Cluster(_) => Tier::Cluster,
            TrainingUnit::Station(_) => Tier::Station,
        }
    }

    /// Key inside the tier's metrics document. The global tier has one entry
    /// per task and no unit key.
    pub fn metrics_key(&self) -> Option<String> {
        match self {
            TrainingUnit::Global => None,
            TrainingUnit::Cluster(id) => Some(id.to_string()),
            TrainingUnit::Station(name) => Some(name.clone()),
        }
    }
}

impl fmt::Display for TrainingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingUnit::Global => write!(f, "global"),
            TrainingUnit::Cluster(id) => write!(f, "cluster {id}"),
            TrainingUnit::Station(name) => write!(f, "station '{name}'"),
        }
    }
}

/// Station names as they appear in file names: `/` and spaces become `_`,
/// commas are dropped.
pub fn safe_station_name(name: &str) -> String {
    name.chars()
        .filter(|&c| c != ',')
        .map(|c| if c == '/' || c == ' ' { '_' } else { c })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub task: Task,
    pub unit: TrainingUnit,
}

impl ArtifactKey {
    pub fn new(task: Task, unit: TrainingUnit) -> Self {
        Self { task, unit }
    }

    fn stem(&self) -> String {
        let task = self.task.as_str();
        match &self.unit {
            TrainingUnit::Global => task.to_string(),
            TrainingUnit::Cluster(id) => format!("{task}_cluster_{id}"),
            TrainingUnit::Station(name) => format!("{task}_station_{}", safe_station_name(name)),
        }
    }

    /// Path relative to the model directory.
    pub fn model_file(&self) -> PathBuf {
        let file = match self.unit {
            TrainingUnit::Global => format!("{}_model.json", self.stem()),
            _ => format!("{}.json", self.stem()),
        };
        PathBuf::from(self.unit.tier().as_str()).join(file)
    }

    pub fn order_file(&self) -> PathBuf {
        PathBuf::from(self.unit.tier().as_str()).join(format!("{}_features_order.json", self.stem()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedArtifact {
    pub model: TrainedModel,
    /// `None` when no order file was written next to the model.
    pub feature_order: Option<Vec<String>>,
}

/// Reads and writes artifacts under one model directory.
///
/// Loaded artifacts are cached for the life of the store; a retrain is picked
/// up by building a new store.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    cache: RwLock<HashMap<ArtifactKey, Arc<LoadedArtifact>>>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn model_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.model_file())
    }

    pub fn order_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.order_file())
    }

    pub fn metrics_path(&self, tier: Tier) -> PathBuf {
        self.root.join(tier.as_str()).join("metrics.json")
    }

    #[cfg(test)]
    pub fn exists(&self, key: &ArtifactKey) -> bool {
        self.model_path(key).is_file()
    }

    /// Writes the feature order, then the model, each atomically. A model
    /// file on disk therefore always has its order file beside it.
    pub fn save(
        &self,
        key: &ArtifactKey,
        model: &TrainedModel,
        feature_order: &[String],
    ) -> Result<(), ArtifactError> {
        let order_path = self.order_path(key);
        write_json_atomic(&order_path, &feature_order)
            .map_err(|e| ArtifactError::Write(order_path, e))?;

        let model_path = self.model_path(key);
        write_json_atomic(&model_path, model).map_err(|e| ArtifactError::Write(model_path.clone(), e))?;

        debug!(path = %model_path.display(), algorithm = model.name(), "Artifact saved");
        Ok(())
    }

    /// Loads an artifact, reading from disk only on the first request for
    /// `key`. A model whose structure fails validation is never cached.
    pub async fn load(&self, key: &ArtifactKey) -> Result<Arc<LoadedArtifact>, ArtifactError> {
        if let Some(hit) = self.cached(key) {
            return Ok(hit);
        }

        let model_path = self.model_path(key);
        let model: TrainedModel = read_json(&model_path).await?;
        model
            .validate()
            .map_err(|e| ArtifactError::Invalid(model_path.clone(), e))?;

        let order_path = self.order_path(key);
        let feature_order = match read_json::<Vec<String>>(&order_path).await {
            Ok(order) => Some(order),
            Err(ArtifactError::Missing(_)) => None,
            Err(e) => return Err(e),
        };

        info!(
            path = %model_path.display(),
            algorithm = model.name(),
            ordered = feature_order.is_some(),
            "Artifact loaded"
        );

        Ok(self.remember(
            key,
            LoadedArtifact {
                model,
                feature_order,
            },
        ))
    }

    fn cached(&self, key: &ArtifactKey) -> Option<Arc<LoadedArtifact>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache.get(key).map(Arc::clone)
    }

    /// Concurrent cold loads of one key keep whichever finished first.
    fn remember(&self, key: &ArtifactKey, loaded: LoadedArtifact) -> Arc<LoadedArtifact> {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cache.entry(key.clone()).or_insert_with(|| Arc::new(loaded)))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ArtifactError::Missing(path.to_path_buf()));
        }
        Err(e) => return Err(ArtifactError::Read(path.to_path_buf(), e)),
    };
    serde_json::from_slice(&bytes).map_err(|e| ArtifactError::Decode(path.to_path_buf(), e))
}
