use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Strategy used when `route` is called without an explicit one.
    #[serde(default = "d_default_strategy")]
    pub default_strategy: String,

    /// Hard per-request cost ceiling, in USD.
    #[serde(default = "d_max_cost_per_request")]
    pub max_cost_per_request: f64,

    /// Budget accounting period.
    #[serde(default = "d_budget_period_ms")]
    pub cost_budget_period_ms: u64,

    /// Spend ceiling per budget period, in USD.
    #[serde(default = "d_max_budget")]
    pub max_budget_per_period: f64,

    #[serde(default = "d_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    #[serde(default = "d_breaker_reset_ms")]
    pub circuit_breaker_reset_ms: u64,

    #[serde(default = "super::d_true")]
    pub enable_cost_tracking: bool,

    /// Provider order attempted by `execute_with_fallback`.
    #[serde(default = "d_fallback_chain")]
    pub fallback_chain: Vec<String>,

    /// Attempt ceiling across the fallback chain.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_strategy: d_default_strategy(),
            max_cost_per_request: d_max_cost_per_request(),
            cost_budget_period_ms: d_budget_period_ms(),
            max_budget_per_period: d_max_budget(),
            circuit_breaker_threshold: d_breaker_threshold(),
            circuit_breaker_reset_ms: d_breaker_reset_ms(),
            enable_cost_tracking: true,
            fallback_chain: d_fallback_chain(),
            max_attempts: d_max_attempts(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_default_strategy() -> String {
    "capability_matched".into()
}
fn d_max_cost_per_request() -> f64 {
    10.0
}
fn d_budget_period_ms() -> u64 {
    3_600_000
}
fn d_max_budget() -> f64 {
    100.0
}
fn d_breaker_threshold() -> u32 {
    5
}
fn d_breaker_reset_ms() -> u64 {
    60_000
}
fn d_fallback_chain() -> Vec<String> {
    ["anthropic", "openai", "google", "kimi", "groq"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn d_max_attempts() -> u32 {
    3
}
