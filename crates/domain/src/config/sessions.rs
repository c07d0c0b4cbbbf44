use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionsConfig {
    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub cadence: CadenceConfig,
}

/// Per-session checkpointing behavior.  Session configs may override these;
/// absent an override the values here apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistenceConfig {
    #[serde(default = "super::d_true")]
    pub auto_checkpoint: bool,

    /// Checkpoint every N messages.
    #[serde(default = "d_checkpoint_interval")]
    pub checkpoint_interval: u64,

    /// Token count at which tree compaction is considered.
    #[serde(default = "d_compact_threshold")]
    pub compact_threshold: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            auto_checkpoint: true,
            checkpoint_interval: d_checkpoint_interval(),
            compact_threshold: d_compact_threshold(),
        }
    }
}

/// Auto-checkpoint supervisor timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    /// Supervisor tick.
    #[serde(default = "d_tick_ms")]
    pub tick_ms: u64,

    /// Minimum spacing between auto-triggered checkpoints per session.
    #[serde(default = "d_min_auto_interval_ms")]
    pub min_auto_interval_ms: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            tick_ms: d_tick_ms(),
            min_auto_interval_ms: d_min_auto_interval_ms(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_checkpoint_interval() -> u64 {
    10
}
fn d_compact_threshold() -> u64 {
    4_000
}
fn d_tick_ms() -> u64 {
    5_000
}
fn d_min_auto_interval_ms() -> u64 {
    5_000
}
