//! The session model and its snapshot encoding.
//!
//! Snapshots are what checkpoints persist: time instants travel through the
//! codec's instant marker and the tool-call maps through the ordered-map
//! marker, so a restore sees exactly what was saved.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use pi_catalog::ProviderId;
use pi_domain::config::PersistenceConfig;
use pi_domain::message::{ToolCall, ToolResultPayload};
use pi_domain::{Error, Result};
use pi_state::codec;

use crate::lifecycle::SessionState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call tracking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pending and completed tool calls, insertion-ordered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallState {
    pub pending: Vec<(String, ToolCall)>,
    pub completed: Vec<(String, ToolResultPayload)>,
    pub current: Option<String>,
}

impl ToolCallState {
    pub fn begin(&mut self, call: ToolCall) {
        self.current = Some(call.id.clone());
        self.pending.push((call.id.clone(), call));
    }

    pub fn complete(&mut self, result: ToolResultPayload) {
        self.pending.retain(|(id, _)| id != &result.tool_call_id);
        if self.current.as_deref() == Some(result.tool_call_id.as_str()) {
            self.current = None;
        }
        self.completed.push((result.tool_call_id.clone(), result));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub state: SessionState,
    pub instance_id: Option<String>,
    pub worker_session_id: Option<String>,
    pub config: SessionConfig,
    pub root_node_id: Option<String>,
    pub current_node_id: Option<String>,
    pub tool_calls: ToolCallState,
    pub message_count: u64,
    pub checkpoint_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, Value>,
    /// Auto-checkpoint cadence gate; switched off during migration.
    pub cadence_enabled: bool,
}

impl Session {
    pub fn new(id: impl Into<String>, config: SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_id: config.agent_id.clone(),
            state: SessionState::Creating,
            instance_id: None,
            worker_session_id: None,
            config,
            root_node_id: None,
            current_node_id: None,
            tool_calls: ToolCallState::default(),
            message_count: 0,
            checkpoint_count: 0,
            created_at: now,
            last_activity_at: now,
            last_checkpoint_at: None,
            metadata: HashMap::new(),
            cadence_enabled: true,
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            agent_id: self.agent_id.clone(),
            state: self.state,
            instance_id: self.instance_id.clone(),
            message_count: self.message_count,
            checkpoint_count: self.checkpoint_count,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        }
    }

    // ── Snapshot encoding ──────────────────────────────────────────

    /// Serialize for checkpointing.  Lossless: instants and ordered maps
    /// carry codec markers.
    pub fn to_snapshot(&self) -> Result<Value> {
        let pending = codec::encode_ordered_map(
            self.tool_calls
                .pending
                .iter()
                .map(|(id, call)| Ok((id.clone(), serde_json::to_value(call)?)))
                .collect::<Result<Vec<_>>>()?,
        );
        let completed = codec::encode_ordered_map(
            self.tool_calls
                .completed
                .iter()
                .map(|(id, result)| Ok((id.clone(), serde_json::to_value(result)?)))
                .collect::<Result<Vec<_>>>()?,
        );

        Ok(json!({
            "id": self.id,
            "agent_id": self.agent_id,
            "state": self.state.to_string(),
            "instance_id": self.instance_id,
            "worker_session_id": self.worker_session_id,
            "config": serde_json::to_value(&self.config)?,
            "root_node_id": self.root_node_id,
            "current_node_id": self.current_node_id,
            "tool_calls": {
                "pending": pending,
                "completed": completed,
                "current": self.tool_calls.current,
            },
            "message_count": self.message_count,
            "checkpoint_count": self.checkpoint_count,
            "created_at": codec::encode_instant(self.created_at),
            "last_activity_at": codec::encode_instant(self.last_activity_at),
            "last_checkpoint_at": self.last_checkpoint_at.map(codec::encode_instant),
            "metadata": self.metadata,
        }))
    }

    pub fn from_snapshot(snapshot: &Value) -> Result<Session> {
        let str_field = |key: &str| -> Result<String> {
            snapshot
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| Error::InvalidRequest(format!("snapshot missing '{key}'")))
        };
        let opt_str = |key: &str| -> Option<String> {
            snapshot
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_owned)
        };
        let instant = |key: &str| -> Result<DateTime<Utc>> {
            snapshot
                .get(key)
                .and_then(codec::decode_instant)
                .ok_or_else(|| Error::InvalidRequest(format!("snapshot missing instant '{key}'")))
        };

        let config: SessionConfig = serde_json::from_value(
            snapshot
                .get("config")
                .cloned()
                .ok_or_else(|| Error::InvalidRequest("snapshot missing 'config'".into()))?,
        )?;

        let tool_calls_value = snapshot
            .get("tool_calls")
            .ok_or_else(|| Error::InvalidRequest("snapshot missing 'tool_calls'".into()))?;
        let decode_calls = |key: &str| -> Vec<(String, Value)> {
            tool_calls_value
                .get(key)
                .and_then(codec::decode_ordered_map)
                .unwrap_or_default()
        };
        let mut tool_calls = ToolCallState {
            current: tool_calls_value
                .get("current")
                .and_then(Value::as_str)
                .map(str::to_owned),
            ..Default::default()
        };
        for (id, value) in decode_calls("pending") {
            tool_calls.pending.push((id, serde_json::from_value(value)?));
        }
        for (id, value) in decode_calls("completed") {
            tool_calls
                .completed
                .push((id, serde_json::from_value(value)?));
        }

        Ok(Session {
            id: str_field("id")?,
            agent_id: str_field("agent_id")?,
            state: str_field("state")?.parse()?,
            instance_id: opt_str("instance_id"),
            worker_session_id: opt_str("worker_session_id"),
            config,
            root_node_id: opt_str("root_node_id"),
            current_node_id: opt_str("current_node_id"),
            tool_calls,
            message_count: snapshot
                .get("message_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            checkpoint_count: snapshot
                .get("checkpoint_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            created_at: instant("created_at")?,
            last_activity_at: instant("last_activity_at")?,
            last_checkpoint_at: snapshot
                .get("last_checkpoint_at")
                .and_then(codec::decode_instant),
            metadata: snapshot
                .get("metadata")
                .and_then(Value::as_object)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
            cadence_enabled: true,
        })
    }
}

/// Summary for list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub agent_id: String,
    pub state: SessionState,
    pub instance_id: Option<String>,
    pub message_count: u64,
    pub checkpoint_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}
