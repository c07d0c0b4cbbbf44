//! Tier seams: the fast cache and the durable store.
//!
//! Concrete backends live outside the core; the synchronizer talks to these
//! traits only.  The in-crate [`crate::MemoryCache`] and [`crate::FileStore`]
//! are the reference implementations used by tests and single-node deploys.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pi_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fast cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry of a pipelined batch write.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub ttl: Option<Duration>,
}

/// TTL-bounded key/value + list cache.
///
/// List keys hold ordered id lists with newest values pushed to the head
/// (the per-session checkpoint index uses this).
#[async_trait::async_trait]
pub trait FastCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;
    /// Pipelined batch set.
    async fn set_many(&self, entries: Vec<CacheEntry>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;

    async fn list_push_head(&self, key: &str, value: String, ttl: Option<Duration>)
        -> Result<()>;
    /// All list values, head first.
    async fn list_all(&self, key: &str) -> Result<Vec<String>>;
    async fn list_remove(&self, key: &str, value: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Durable store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One row of the logical `checkpoints` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRow {
    pub id: String,
    pub session_id: String,
    /// Codec-encoded session state, serialized.
    pub state: String,
    /// Serialized checkpoint metadata.
    pub metadata: String,
    pub created_at: DateTime<Utc>,
}

/// The authoritative persistence tier.
#[async_trait::async_trait]
pub trait DurableStore: Send + Sync {
    async fn put_checkpoint(&self, row: &CheckpointRow) -> Result<()>;
    async fn get_checkpoint(&self, id: &str) -> Result<Option<CheckpointRow>>;
    /// All checkpoints for a session, newest first.
    async fn list_checkpoints(&self, session_id: &str) -> Result<Vec<CheckpointRow>>;
    async fn delete_checkpoint(&self, id: &str) -> Result<()>;

    async fn put_session_state(&self, session_id: &str, state: &str) -> Result<()>;
    async fn get_session_state(&self, session_id: &str) -> Result<Option<String>>;

    async fn put_tree(&self, session_id: &str, tree: &str) -> Result<()>;
    async fn get_tree(&self, session_id: &str) -> Result<Option<String>>;
}
