use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State synchronizer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Cache TTL for checkpoints.
    #[serde(default = "d_checkpoint_ttl")]
    pub checkpoint_ttl_secs: u64,

    /// Cache TTL for session state snapshots.
    #[serde(default = "d_session_state_ttl")]
    pub session_state_ttl_secs: u64,

    /// Cache TTL for conversation trees.
    #[serde(default = "d_tree_state_ttl")]
    pub tree_state_ttl_secs: u64,

    /// Directory for the file-backed durable store.
    #[serde(default = "d_state_dir")]
    pub state_dir: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            checkpoint_ttl_secs: d_checkpoint_ttl(),
            session_state_ttl_secs: d_session_state_ttl(),
            tree_state_ttl_secs: d_tree_state_ttl(),
            state_dir: d_state_dir(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_checkpoint_ttl() -> u64 {
    86_400
}
fn d_session_state_ttl() -> u64 {
    3_600
}
fn d_tree_state_ttl() -> u64 {
    3_600
}
fn d_state_dir() -> String {
    ".pi/state".into()
}
