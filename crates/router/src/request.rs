use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pi_catalog::ProviderId;
use pi_registry::Instance;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// One request for the router to place.
#[derive(Debug, Clone, Default)]
pub struct RoutingRequest {
    pub request_id: String,
    pub task_type: Option<String>,
    pub required_capabilities: Vec<String>,
    pub estimated_tokens: u64,
    pub priority: Priority,
    pub preferred_provider: Option<ProviderId>,
    pub max_cost: Option<f64>,
    pub max_latency_ms: Option<u64>,
    pub min_quality_score: Option<u8>,
    pub context: HashMap<String, serde_json::Value>,
}

/// A non-selected candidate, kept for observability and fallback.
#[derive(Debug, Clone, Serialize)]
pub struct RankedAlternative {
    pub instance_id: String,
    pub provider: ProviderId,
    pub score: f64,
}

/// The outcome of one routing evaluation.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub request_id: String,
    pub instance: Instance,
    pub strategy: String,
    pub score: f64,
    pub alternatives: Vec<RankedAlternative>,
    pub estimated_cost: f64,
    pub expected_latency_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub fallback_chain: Vec<ProviderId>,
}
