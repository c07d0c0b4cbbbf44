use serde::Serialize;

/// Structured trace events emitted across all control-plane crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    InstanceRegistered {
        instance_id: String,
        provider: String,
        replaced: bool,
    },
    InstanceHealthChanged {
        instance_id: String,
        before: String,
        after: String,
    },
    DiscoveryCompleted {
        strategy: String,
        discovered: usize,
    },
    RouteDecided {
        request_id: String,
        strategy: String,
        instance_id: String,
        provider: String,
        score: f64,
        estimated_cost: f64,
    },
    RouteFallback {
        request_id: String,
        from_provider: String,
        to_provider: String,
        reason: String,
    },
    CheckpointSaved {
        checkpoint_id: String,
        session_id: String,
        trigger: String,
        token_count: u64,
    },
    SessionStateChanged {
        session_id: String,
        before: String,
        after: String,
    },
    SessionMigrated {
        session_id: String,
        from_instance: String,
        to_instance: String,
        rolled_back: bool,
    },
    ToolIntercepted {
        session_id: String,
        tool_name: String,
        outcome: String,
        duration_ms: u64,
    },
    TreeCompacted {
        session_id: String,
        nodes_compacted: usize,
        tokens_saved: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "pi_event");
    }
}
