use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryConfig {
    /// Ordered discovery strategies, run in sequence by `discover_instances`.
    #[serde(default)]
    pub discovery_strategies: Vec<DiscoveryStrategyConfig>,

    #[serde(default)]
    pub health_monitoring: HealthMonitoringConfig,

    #[serde(default)]
    pub defaults: RegistryDefaults,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

/// One configured discovery strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryStrategyConfig {
    /// Fixed list of worker endpoints.
    Static {
        #[serde(default)]
        instances: Vec<StaticInstanceConfig>,
        #[serde(default = "super::d_true")]
        auto_register: bool,
    },
    /// Query a fleet gateway for its known workers.
    Gateway {
        endpoint: String,
        #[serde(default = "super::d_true")]
        auto_register: bool,
    },
    /// List worker pods via the Kubernetes API.
    Kubernetes {
        #[serde(default = "d_namespace")]
        namespace: String,
        #[serde(default = "d_label_selector")]
        label_selector: String,
        #[serde(default = "super::d_true")]
        auto_register: bool,
    },
    /// Spawn additional local workers when aggregate capacity runs low.
    AutoSpawn {
        provider: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default = "d_min_instances")]
        min_instances: usize,
        #[serde(default = "d_max_instances")]
        max_instances: usize,
        /// Spawn only when matching available capacity is at or below this.
        #[serde(default = "d_capacity_threshold")]
        capacity_threshold: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticInstanceConfig {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub max_concurrent: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMonitoringConfig {
    #[serde(default = "d_health_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "d_health_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    /// How long an unhealthy instance is kept before removal.
    #[serde(default = "d_removal_grace_ms")]
    pub removal_grace_period_ms: u64,
}

impl Default for HealthMonitoringConfig {
    fn default() -> Self {
        Self {
            interval_ms: d_health_interval_ms(),
            timeout_ms: d_health_timeout_ms(),
            max_retries: d_max_retries(),
            removal_grace_period_ms: d_removal_grace_ms(),
        }
    }
}

/// Defaults applied to discovered instances that omit the fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryDefaults {
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "d_region")]
    pub region: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Default for RegistryDefaults {
    fn default() -> Self {
        Self {
            max_concurrent: d_max_concurrent(),
            capabilities: Vec::new(),
            region: d_region(),
            metadata: HashMap::new(),
        }
    }
}

/// Raw circuit breaker knobs (durations in milliseconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "d_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "d_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: d_failure_threshold(),
            reset_timeout_ms: d_reset_timeout_ms(),
        }
    }
}

impl From<&CircuitBreakerConfig> for crate::breaker::BreakerConfig {
    fn from(cfg: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold,
            reset_timeout: std::time::Duration::from_millis(cfg.reset_timeout_ms),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_health_interval_ms() -> u64 {
    30_000
}
fn d_health_timeout_ms() -> u64 {
    5_000
}
fn d_max_retries() -> u32 {
    3
}
fn d_removal_grace_ms() -> u64 {
    300_000
}
fn d_max_concurrent() -> u32 {
    10
}
fn d_region() -> String {
    "default".into()
}
fn d_failure_threshold() -> u32 {
    5
}
fn d_reset_timeout_ms() -> u64 {
    60_000
}
fn d_namespace() -> String {
    "default".into()
}
fn d_label_selector() -> String {
    "app=pi-worker".into()
}
fn d_min_instances() -> usize {
    1
}
fn d_max_instances() -> usize {
    5
}
fn d_capacity_threshold() -> u32 {
    2
}
