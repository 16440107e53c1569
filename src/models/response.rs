use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Ok,
    Degraded,
    Down,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    Connected,
    Disconnected,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthStatus {
    pub status: OverallStatus,
    pub version: String,
    pub cache: DependencyStatus,
    pub upstream: DependencyStatus,
    pub circuit: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthStatus {
    pub fn overall(cache: DependencyStatus, upstream: DependencyStatus) -> OverallStatus {
        match (cache, upstream) {
            (DependencyStatus::Connected, DependencyStatus::Connected) => OverallStatus::Ok,
            (DependencyStatus::Disconnected, DependencyStatus::Disconnected) => OverallStatus::Down,
            _ => OverallStatus::Degraded,
        }
    }
}
