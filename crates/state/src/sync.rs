//! The hybrid state synchronizer.
//!
//! Every write goes to both tiers and succeeds when either tier lands it;
//! a single-tier failure degrades (warn) instead of failing the caller.
//! Reads are cache-first with repopulation from the durable store, which is
//! authoritative whenever the tiers disagree.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use pi_domain::config::StateConfig;
use pi_domain::trace::TraceEvent;
use pi_domain::{Error, Result};
use pi_tree::ConversationTree;

use crate::tiers::{CacheEntry, CheckpointRow, DurableStore, FastCache};
use crate::types::{new_checkpoint_id, CheckpointData, CheckpointMetadata, CheckpointTrigger};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Synchronizer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-session payload for [`StateSynchronizer::save_all`].
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub session_state: Option<Value>,
    pub tree: Option<ConversationTree>,
}

pub struct StateSynchronizer {
    cache: Arc<dyn FastCache>,
    store: Arc<dyn DurableStore>,
    config: StateConfig,
}

impl StateSynchronizer {
    pub fn new(
        cache: Arc<dyn FastCache>,
        store: Arc<dyn DurableStore>,
        config: StateConfig,
    ) -> Self {
        Self {
            cache,
            store,
            config,
        }
    }

    // ── Key & TTL helpers ──────────────────────────────────────────

    fn checkpoint_key(id: &str) -> String {
        format!("checkpoint:{id}")
    }
    fn session_state_key(session_id: &str) -> String {
        format!("session:{session_id}:state")
    }
    fn tree_key(session_id: &str) -> String {
        format!("session:{session_id}:tree")
    }
    fn checkpoint_list_key(session_id: &str) -> String {
        format!("session:{session_id}:checkpoints")
    }

    fn checkpoint_ttl(&self) -> Duration {
        Duration::from_secs(self.config.checkpoint_ttl_secs)
    }
    fn session_state_ttl(&self) -> Duration {
        Duration::from_secs(self.config.session_state_ttl_secs)
    }
    fn tree_ttl(&self) -> Duration {
        Duration::from_secs(self.config.tree_state_ttl_secs)
    }

    /// Collapse the two tier outcomes: either tier landing the write is a
    /// success (single-tier failure is logged as degraded), both failing is
    /// a `StorageUnavailable`.
    fn reconcile(op: &str, cache: Result<()>, durable: Result<()>) -> Result<()> {
        match (cache, durable) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) => {
                tracing::warn!(op, tier = "cache", error = %e, "storage degraded");
                Ok(())
            }
            (Ok(()), Err(e)) => {
                tracing::warn!(op, tier = "durable", error = %e, "storage degraded");
                Ok(())
            }
            (Err(cache), Err(durable)) => Err(Error::StorageUnavailable {
                cache: cache.to_string(),
                durable: durable.to_string(),
            }),
        }
    }

    // ── Checkpoints ────────────────────────────────────────────────

    pub async fn save_checkpoint(
        &self,
        session_id: &str,
        state: Value,
        trigger: CheckpointTrigger,
        mut metadata: CheckpointMetadata,
    ) -> Result<CheckpointData> {
        metadata.trigger = trigger;
        let created_at = Utc::now();
        let checkpoint = CheckpointData {
            id: new_checkpoint_id(created_at),
            session_id: session_id.to_owned(),
            created_at,
            trigger,
            state,
            metadata,
        };

        let serialized = serde_json::to_string(&checkpoint)?;
        let row = CheckpointRow {
            id: checkpoint.id.clone(),
            session_id: checkpoint.session_id.clone(),
            state: serde_json::to_string(&checkpoint.state)?,
            metadata: serde_json::to_string(&checkpoint.metadata)?,
            created_at,
        };

        let cache_result = async {
            self.cache
                .set(
                    &Self::checkpoint_key(&checkpoint.id),
                    serialized.clone(),
                    Some(self.checkpoint_ttl()),
                )
                .await?;
            self.cache
                .list_push_head(
                    &Self::checkpoint_list_key(session_id),
                    checkpoint.id.clone(),
                    Some(self.checkpoint_ttl()),
                )
                .await
        }
        .await;
        let durable_result = self.store.put_checkpoint(&row).await;
        Self::reconcile("save_checkpoint", cache_result, durable_result)?;

        TraceEvent::CheckpointSaved {
            checkpoint_id: checkpoint.id.clone(),
            session_id: session_id.to_owned(),
            trigger: trigger.to_string(),
            token_count: checkpoint.metadata.token_count,
        }
        .emit();
        Ok(checkpoint)
    }

    pub async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<CheckpointData>> {
        // Cache first; any cache trouble falls through to the durable tier.
        match self.cache.get(&Self::checkpoint_key(checkpoint_id)).await {
            Ok(Some(text)) => {
                if let Ok(checkpoint) = serde_json::from_str::<CheckpointData>(&text) {
                    return Ok(Some(checkpoint));
                }
                tracing::warn!(checkpoint_id, "corrupt cached checkpoint, rereading durable");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(checkpoint_id, error = %e, "cache read failed, using durable");
            }
        }

        let Some(row) = self.store.get_checkpoint(checkpoint_id).await? else {
            return Ok(None);
        };
        let checkpoint = checkpoint_from_row(row)?;

        // Repopulate the cache; the durable record is authoritative and
        // overwrites whatever was there.
        if let Ok(serialized) = serde_json::to_string(&checkpoint) {
            let _ = self
                .cache
                .set(
                    &Self::checkpoint_key(checkpoint_id),
                    serialized,
                    Some(self.checkpoint_ttl()),
                )
                .await;
        }
        Ok(Some(checkpoint))
    }

    /// All checkpoints for a session, newest first.
    pub async fn list_checkpoints(&self, session_id: &str) -> Result<Vec<CheckpointData>> {
        let list_key = Self::checkpoint_list_key(session_id);
        let cached_ids = self.cache.list_all(&list_key).await.unwrap_or_default();

        let mut checkpoints = Vec::new();
        if !cached_ids.is_empty() {
            for id in cached_ids {
                if let Some(checkpoint) = self.load_checkpoint(&id).await? {
                    checkpoints.push(checkpoint);
                }
            }
        } else {
            // List miss: fall back to a durable query and repopulate the
            // per-session index (oldest pushed first so the head stays newest).
            let rows = self.store.list_checkpoints(session_id).await?;
            for row in rows {
                checkpoints.push(checkpoint_from_row(row)?);
            }
            for checkpoint in checkpoints.iter().rev() {
                let _ = self
                    .cache
                    .list_push_head(
                        &list_key,
                        checkpoint.id.clone(),
                        Some(self.checkpoint_ttl()),
                    )
                    .await;
            }
        }

        checkpoints.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(checkpoints)
    }

    pub async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<()> {
        let session_id = self
            .load_checkpoint(checkpoint_id)
            .await?
            .map(|c| c.session_id);

        let cache_result: Result<()> = async {
            self.cache
                .delete(&Self::checkpoint_key(checkpoint_id))
                .await?;
            if let Some(sid) = &session_id {
                self.cache
                    .list_remove(&Self::checkpoint_list_key(sid), checkpoint_id)
                    .await?;
            }
            Ok(())
        }
        .await;
        let durable_result = self.store.delete_checkpoint(checkpoint_id).await;
        Self::reconcile("delete_checkpoint", cache_result, durable_result)
    }

    /// Trim a session's checkpoints to the `keep` newest.  Returns how many
    /// were deleted.
    pub async fn cleanup_old_checkpoints(&self, session_id: &str, keep: usize) -> Result<usize> {
        let checkpoints = self.list_checkpoints(session_id).await?;
        let mut deleted = 0;
        for checkpoint in checkpoints.iter().skip(keep) {
            self.delete_checkpoint(&checkpoint.id).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    // ── Session state ──────────────────────────────────────────────

    pub async fn save_session_state(&self, session_id: &str, state: &Value) -> Result<()> {
        let serialized = serde_json::to_string(state)?;
        let cache_result = self
            .cache
            .set(
                &Self::session_state_key(session_id),
                serialized.clone(),
                Some(self.session_state_ttl()),
            )
            .await;
        let durable_result = self.store.put_session_state(session_id, &serialized).await;
        Self::reconcile("save_session_state", cache_result, durable_result)
    }

    pub async fn load_session_state(&self, session_id: &str) -> Result<Option<Value>> {
        let key = Self::session_state_key(session_id);
        match self.cache.get(&key).await {
            Ok(Some(text)) => {
                if let Ok(state) = serde_json::from_str(&text) {
                    return Ok(Some(state));
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(session_id, error = %e, "cache read failed, using durable"),
        }
        let Some(text) = self.store.get_session_state(session_id).await? else {
            return Ok(None);
        };
        let _ = self
            .cache
            .set(&key, text.clone(), Some(self.session_state_ttl()))
            .await;
        Ok(Some(serde_json::from_str(&text)?))
    }

    // ── Trees ──────────────────────────────────────────────────────

    pub async fn save_tree_state(&self, tree: &ConversationTree) -> Result<()> {
        let serialized = serde_json::to_string(tree)?;
        let cache_result = self
            .cache
            .set(
                &Self::tree_key(&tree.session_id),
                serialized.clone(),
                Some(self.tree_ttl()),
            )
            .await;
        let durable_result = self.store.put_tree(&tree.session_id, &serialized).await;
        Self::reconcile("save_tree_state", cache_result, durable_result)
    }

    pub async fn load_tree_state(&self, session_id: &str) -> Result<Option<ConversationTree>> {
        let key = Self::tree_key(session_id);
        match self.cache.get(&key).await {
            Ok(Some(text)) => {
                if let Ok(tree) = serde_json::from_str(&text) {
                    return Ok(Some(tree));
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(session_id, error = %e, "cache read failed, using durable"),
        }
        let Some(text) = self.store.get_tree(session_id).await? else {
            return Ok(None);
        };
        let _ = self
            .cache
            .set(&key, text.clone(), Some(self.tree_ttl()))
            .await;
        Ok(Some(serde_json::from_str(&text)?))
    }

    // ── Batch ──────────────────────────────────────────────────────

    /// Persist many sessions at once: one pipelined cache write, then
    /// sequential durable upserts.
    pub async fn save_all(&self, snapshots: HashMap<String, SessionSnapshot>) -> Result<()> {
        let mut entries = Vec::new();
        let mut durable_ops: Vec<(String, Option<String>, Option<String>)> = Vec::new();

        for (session_id, snapshot) in &snapshots {
            let state = snapshot
                .session_state
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let tree = snapshot
                .tree
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            if let Some(state) = &state {
                entries.push(CacheEntry {
                    key: Self::session_state_key(session_id),
                    value: state.clone(),
                    ttl: Some(self.session_state_ttl()),
                });
            }
            if let Some(tree) = &tree {
                entries.push(CacheEntry {
                    key: Self::tree_key(session_id),
                    value: tree.clone(),
                    ttl: Some(self.tree_ttl()),
                });
            }
            durable_ops.push((session_id.clone(), state, tree));
        }

        let cache_result = self.cache.set_many(entries).await;

        let durable_result: Result<()> = async {
            for (session_id, state, tree) in &durable_ops {
                if let Some(state) = state {
                    self.store.put_session_state(session_id, state).await?;
                }
                if let Some(tree) = tree {
                    self.store.put_tree(session_id, tree).await?;
                }
            }
            Ok(())
        }
        .await;

        Self::reconcile("save_all", cache_result, durable_result)
    }
}

fn checkpoint_from_row(row: CheckpointRow) -> Result<CheckpointData> {
    let state: Value = serde_json::from_str(&row.state)?;
    let metadata: CheckpointMetadata = serde_json::from_str(&row.metadata)?;
    Ok(CheckpointData {
        id: row.id,
        session_id: row.session_id,
        created_at: row.created_at,
        trigger: metadata.trigger,
        state,
        metadata,
    })
}

// ── Tree-store seam for the tree manager ───────────────────────────

#[async_trait::async_trait]
impl pi_tree::TreeStore for StateSynchronizer {
    async fn save_tree(&self, tree: &ConversationTree) -> Result<()> {
        self.save_tree_state(tree).await
    }

    async fn load_tree(&self, session_id: &str) -> Result<Option<ConversationTree>> {
        self.load_tree_state(session_id).await
    }
}
