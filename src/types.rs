//! Shared vocabulary: forecasting tasks, model tiers, and station weektypes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The forecasting target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Pickup,
    Dropoff,
}

impl Task {
    pub const ALL: [Task; 2] = [Task::Pickup, Task::Dropoff];

    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Pickup => "pickup",
            Task::Dropoff => "dropoff",
        }
    }

    /// Name of the target column in this task's feature table.
    pub fn target_column(&self) -> String {
        format!("{}_count", self.as_str())
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Task {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pickup" | "start" => Ok(Task::Pickup),
            "dropoff" | "end" => Ok(Task::Dropoff),
            other => Err(anyhow::anyhow!("unknown task '{other}'")),
        }
    }
}

/// Granularity at which a predictor is trained and selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Global,
    Cluster,
    Station,
    Average,
}

impl Tier {
    /// Tiers backed by a trained artifact, in candidate order.
    pub const MODEL_TIERS: [Tier; 3] = [Tier::Global, Tier::Cluster, Tier::Station];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Global => "global",
            Tier::Cluster => "cluster",
            Tier::Station => "station",
            Tier::Average => "average",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "global" => Ok(Tier::Global),
            "cluster" => Ok(Tier::Cluster),
            "station" => Ok(Tier::Station),
            "average" => Ok(Tier::Average),
            other => Err(anyhow::anyhow!("unknown tier '{other}'")),
        }
    }
}

/// Whether a station sees more traffic on weekdays or on weekends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weektype {
    #[default]
    Weekday,
    Weekend,
}

impl Weektype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Weektype::Weekday => "weekday",
            Weektype::Weekend => "weekend",
        }
    }
}
