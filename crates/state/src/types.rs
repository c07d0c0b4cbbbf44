use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Checkpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What caused a checkpoint to be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    Auto,
    Manual,
    PreTool,
    PostTool,
    PreMigration,
    StateChange,
    MessageCount,
}

impl std::fmt::Display for CheckpointTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::PreTool => "pre_tool",
            Self::PostTool => "post_tool",
            Self::PreMigration => "pre_migration",
            Self::StateChange => "state_change",
            Self::MessageCount => "message_count",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub message_count: u64,
    pub token_count: u64,
    #[serde(default = "default_trigger")]
    pub trigger: CheckpointTrigger,
    /// Worker-side checkpoint reference, when the worker produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_checkpoint_ref: Option<String>,
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        Self {
            message_count: 0,
            token_count: 0,
            trigger: CheckpointTrigger::Manual,
            worker_checkpoint_ref: None,
        }
    }
}

fn default_trigger() -> CheckpointTrigger {
    CheckpointTrigger::Manual
}

/// A point-in-time session snapshot sufficient for restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointData {
    pub id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub trigger: CheckpointTrigger,
    /// Serialized session state (codec-encoded).
    pub state: serde_json::Value,
    pub metadata: CheckpointMetadata,
}

/// Mint a checkpoint id that sorts by creation time: a zero-padded
/// millisecond timestamp followed by a uuid fragment for uniqueness.
pub fn new_checkpoint_id(at: DateTime<Utc>) -> String {
    let fragment = uuid::Uuid::new_v4().simple().to_string();
    format!("chk_{:013}_{}", at.timestamp_millis().max(0), &fragment[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_ids_sort_by_creation_time() {
        let early = new_checkpoint_id(Utc::now());
        std::thread::sleep(std::time::Duration::from_millis(5));
        let late = new_checkpoint_id(Utc::now());
        assert!(early < late);
    }

    #[test]
    fn trigger_serializes_snake_case() {
        let json = serde_json::to_string(&CheckpointTrigger::PreMigration).unwrap();
        assert_eq!(json, "\"pre_migration\"");
    }
}
