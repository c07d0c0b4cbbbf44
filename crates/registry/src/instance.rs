//! Worker instance model and selection inputs.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pi_catalog::ProviderId;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Instance
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    Local,
    Docker,
    Kubernetes,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    /// Healthy-enough to receive traffic.
    pub fn is_routable(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Concurrency capacity with derived fields.
///
/// `available` and `utilization_percent` are recomputed on every mutation of
/// the primitive fields; construct through [`CapacityRecord::new`] and mutate
/// through [`CapacityRecord::update`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityRecord {
    pub max_concurrent: u32,
    pub active_tasks: u32,
    pub available: u32,
    pub utilization_percent: f64,
}

impl CapacityRecord {
    pub fn new(max_concurrent: u32, active_tasks: u32) -> Self {
        let mut record = Self {
            max_concurrent,
            active_tasks,
            available: 0,
            utilization_percent: 0.0,
        };
        record.recompute();
        record
    }

    pub fn update(&mut self, active_tasks: u32, max_concurrent: Option<u32>) {
        self.active_tasks = active_tasks;
        if let Some(max) = max_concurrent {
            self.max_concurrent = max;
        }
        self.recompute();
    }

    fn recompute(&mut self) {
        self.available = self.max_concurrent.saturating_sub(self.active_tasks);
        self.utilization_percent = if self.max_concurrent == 0 {
            0.0
        } else {
            f64::from(self.active_tasks) / f64::from(self.max_concurrent) * 100.0
        };
    }
}

/// How an instance authenticates against its provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceAuth {
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_key: Option<String>,
}

/// A running worker known to the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub provider: ProviderId,
    pub model: String,
    pub deployment_mode: DeploymentMode,
    pub endpoint: String,
    pub health: HealthStatus,
    pub capabilities: Vec<String>,
    pub region: String,
    pub capacity: CapacityRecord,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub auth: InstanceAuth,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Instance {
    pub fn has_capabilities(&self, required: &[String]) -> bool {
        required.iter().all(|cap| self.capabilities.contains(cap))
    }

    pub fn info(&self) -> InstanceInfo {
        InstanceInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            provider: self.provider,
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            health: self.health,
            region: self.region.clone(),
            capacity: self.capacity,
            last_heartbeat: self.last_heartbeat,
            registered_at: self.registered_at,
        }
    }
}

/// Summary info returned by list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    pub id: String,
    pub name: String,
    pub provider: ProviderId,
    pub model: String,
    pub endpoint: String,
    pub health: HealthStatus,
    pub region: String,
    pub capacity: CapacityRecord,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Selection inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    #[default]
    LeastLoaded,
    RoundRobin,
    Random,
    CapabilityMatch,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionCriteria {
    pub preferred_provider: Option<ProviderId>,
    pub required_capabilities: Vec<String>,
    pub min_available_capacity: Option<u32>,
    pub region: Option<String>,
    pub exclude: HashSet<String>,
    pub strategy: SelectionStrategy,
    /// At least one of these must match (disjunction); empty = no filter.
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_derives_available_and_utilization() {
        let cap = CapacityRecord::new(10, 3);
        assert_eq!(cap.available, 7);
        assert!((cap.utilization_percent - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn capacity_update_recomputes() {
        let mut cap = CapacityRecord::new(10, 0);
        cap.update(12, None);
        assert_eq!(cap.available, 0, "available clamps at zero");
        cap.update(2, Some(4));
        assert_eq!(cap.available, 2);
        assert!((cap.utilization_percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_max_concurrent_has_zero_utilization() {
        let cap = CapacityRecord::new(0, 0);
        assert_eq!(cap.available, 0);
        assert_eq!(cap.utilization_percent, 0.0);
    }

    #[test]
    fn routable_health_states() {
        assert!(HealthStatus::Healthy.is_routable());
        assert!(HealthStatus::Degraded.is_routable());
        assert!(!HealthStatus::Unhealthy.is_routable());
        assert!(!HealthStatus::Unknown.is_routable());
    }
}
