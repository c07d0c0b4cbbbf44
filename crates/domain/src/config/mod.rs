mod registry;
mod router;
mod sessions;
mod state;
mod tools;

pub use registry::*;
pub use router::*;
pub use sessions::*;
pub use state::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.registry.health_monitoring.interval_ms == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "registry.health_monitoring.interval_ms".into(),
                message: "interval must be greater than 0".into(),
            });
        }
        if self.registry.health_monitoring.timeout_ms >= self.registry.health_monitoring.interval_ms
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "registry.health_monitoring.timeout_ms".into(),
                message: "health check timeout is not smaller than the check interval".into(),
            });
        }

        if self.router.max_cost_per_request <= 0.0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "router.max_cost_per_request".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.router.fallback_chain.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "router.fallback_chain".into(),
                message: "empty fallback chain disables provider failover".into(),
            });
        }

        if self.sessions.persistence.checkpoint_interval == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "sessions.persistence.checkpoint_interval".into(),
                message: "checkpoint interval must be at least 1 message".into(),
            });
        }

        for (i, pattern) in self.tools.denied_patterns.iter().enumerate() {
            if let Err(e) = regex::Regex::new(pattern) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("tools.denied_patterns[{i}]"),
                    message: format!("invalid regex \"{pattern}\": {e}"),
                });
            }
        }

        issues
    }
}

// ── serde default helpers shared across config modules ─────────────

pub(crate) fn d_true() -> bool {
    true
}
