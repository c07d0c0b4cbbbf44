//! File-backed durable store.
//!
//! One JSON document per record under the state directory:
//!
//! ```text
//! {root}/checkpoints/{id}.json
//! {root}/session_states/{session_id}.json
//! {root}/trees/{session_id}.json
//! ```
//!
//! Writes are atomic (tmp sibling, then rename) so a crash never leaves a
//! half-written record behind.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use pi_domain::{Error, Result};

use crate::tiers::{CheckpointRow, DurableStore};

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for sub in ["checkpoints", "session_states", "trees"] {
            std::fs::create_dir_all(root.join(sub))?;
        }
        Ok(Self { root })
    }

    fn checkpoint_path(&self, id: &str) -> PathBuf {
        self.root.join("checkpoints").join(format!("{id}.json"))
    }

    fn session_state_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join("session_states")
            .join(format!("{session_id}.json"))
    }

    fn tree_path(&self, session_id: &str) -> PathBuf {
        self.root.join("trees").join(format!("{session_id}.json"))
    }

    async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_optional(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[async_trait::async_trait]
impl DurableStore for FileStore {
    async fn put_checkpoint(&self, row: &CheckpointRow) -> Result<()> {
        let json = serde_json::to_string_pretty(row)?;
        Self::write_atomic(&self.checkpoint_path(&row.id), &json).await
    }

    async fn get_checkpoint(&self, id: &str) -> Result<Option<CheckpointRow>> {
        match Self::read_optional(&self.checkpoint_path(id)).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn list_checkpoints(&self, session_id: &str) -> Result<Vec<CheckpointRow>> {
        let mut rows = Vec::new();
        let mut dir = fs::read_dir(self.root.join("checkpoints")).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = match fs::read_to_string(&path).await {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable checkpoint file");
                    continue;
                }
            };
            match serde_json::from_str::<CheckpointRow>(&text) {
                Ok(row) if row.session_id == session_id => rows.push(row),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt checkpoint file");
                }
            }
        }
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn delete_checkpoint(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.checkpoint_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn put_session_state(&self, session_id: &str, state: &str) -> Result<()> {
        Self::write_atomic(&self.session_state_path(session_id), state).await
    }

    async fn get_session_state(&self, session_id: &str) -> Result<Option<String>> {
        Self::read_optional(&self.session_state_path(session_id)).await
    }

    async fn put_tree(&self, session_id: &str, tree: &str) -> Result<()> {
        Self::write_atomic(&self.tree_path(session_id), tree).await
    }

    async fn get_tree(&self, session_id: &str) -> Result<Option<String>> {
        Self::read_optional(&self.tree_path(session_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(id: &str, session: &str) -> CheckpointRow {
        CheckpointRow {
            id: id.into(),
            session_id: session.into(),
            state: "{}".into(),
            metadata: "{}".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.put_checkpoint(&row("chk_1", "s1")).await.unwrap();
        let loaded = store.get_checkpoint("chk_1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "s1");
        assert!(store.get_checkpoint("chk_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_per_session_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        let mut first = row("chk_a", "s1");
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        store.put_checkpoint(&first).await.unwrap();
        store.put_checkpoint(&row("chk_b", "s1")).await.unwrap();
        store.put_checkpoint(&row("chk_c", "other")).await.unwrap();

        let rows = store.list_checkpoints("s1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "chk_b");
        assert_eq!(rows[1].id, "chk_a");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.put_checkpoint(&row("chk_1", "s1")).await.unwrap();
        store.delete_checkpoint("chk_1").await.unwrap();
        store.delete_checkpoint("chk_1").await.unwrap();
        assert!(store.get_checkpoint("chk_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn session_state_and_tree_docs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.put_session_state("s1", "{\"a\":1}").await.unwrap();
        assert_eq!(
            store.get_session_state("s1").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        store.put_tree("s1", "{\"nodes\":{}}").await.unwrap();
        assert!(store.get_tree("s1").await.unwrap().is_some());
        assert!(store.get_tree("s2").await.unwrap().is_none());
    }
}
