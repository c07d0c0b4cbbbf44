//! The registry's closed event catalog, delivered over a broadcast channel.

use serde::Serialize;

use crate::instance::{HealthStatus, InstanceInfo};
use crate::registry::CapacityReport;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// A new (or replacing) instance registration.
    InstanceRegistered { instance: InstanceInfo },

    /// An instance left the registry.
    InstanceUnregistered { instance_id: String, reason: String },

    /// A health transition, with both sides.
    InstanceHealthChanged {
        instance_id: String,
        before: HealthStatus,
        after: HealthStatus,
    },

    /// An instance became unhealthy.
    InstanceFailed {
        instance_id: String,
        message: String,
    },

    /// Aggregate capacity moved significantly.
    CapacityChanged { report: CapacityReport },

    /// One discovery strategy finished.
    DiscoveryCompleted {
        strategy: String,
        discovered: usize,
    },

    /// One discovery strategy errored.
    DiscoveryFailed { strategy: String, message: String },
}
