//! Session-scoped tree ownership.
//!
//! The manager holds every live tree in memory, keyed by session id, and
//! persists through a pluggable [`TreeStore`].  Cross-session forking copies
//! nodes; trees never share structure.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use pi_domain::message::Role;
use pi_domain::{Error, Result};

use crate::compact::{compact_history, CompactionReport};
use crate::context::messages_for_context;
use crate::node::{Branch, ConversationTree, NodeOptions, TreeNode};

/// Persistence seam for trees.  Implemented by the state synchronizer.
#[async_trait::async_trait]
pub trait TreeStore: Send + Sync {
    async fn save_tree(&self, tree: &ConversationTree) -> Result<()>;
    async fn load_tree(&self, session_id: &str) -> Result<Option<ConversationTree>>;
}

/// Owns the conversation trees of all live sessions.
pub struct TreeManager {
    trees: RwLock<HashMap<String, ConversationTree>>,
    store: Option<Arc<dyn TreeStore>>,
}

impl TreeManager {
    pub fn new(store: Option<Arc<dyn TreeStore>>) -> Self {
        Self {
            trees: RwLock::new(HashMap::new()),
            store,
        }
    }

    // ── Tree lifecycle ─────────────────────────────────────────────

    /// Create (and register) a fresh tree for a session.
    pub fn create_tree(
        &self,
        session_id: &str,
        system_prompt: Option<String>,
    ) -> ConversationTree {
        let tree = ConversationTree::new(session_id, system_prompt);
        self.trees
            .write()
            .insert(session_id.to_owned(), tree.clone());
        tree
    }

    /// Clone of the session's tree, if one is loaded.
    pub fn get_tree(&self, session_id: &str) -> Option<ConversationTree> {
        self.trees.read().get(session_id).cloned()
    }

    /// Persist a tree through the store and register it in memory.
    pub async fn save_tree(&self, tree: &ConversationTree) -> Result<()> {
        self.trees
            .write()
            .insert(tree.session_id.clone(), tree.clone());
        if let Some(store) = &self.store {
            store.save_tree(tree).await?;
        }
        Ok(())
    }

    /// Fetch a tree from the store into memory (cache-through).
    pub async fn load_tree(&self, session_id: &str) -> Result<Option<ConversationTree>> {
        if let Some(tree) = self.get_tree(session_id) {
            return Ok(Some(tree));
        }
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let loaded = store.load_tree(session_id).await?;
        if let Some(tree) = &loaded {
            self.trees
                .write()
                .insert(session_id.to_owned(), tree.clone());
        }
        Ok(loaded)
    }

    /// Drop a session's tree from memory (persisted copies are untouched).
    pub fn evict(&self, session_id: &str) {
        self.trees.write().remove(session_id);
    }

    // ── Node operations ────────────────────────────────────────────

    pub fn add_node(
        &self,
        session_id: &str,
        role: Role,
        content: impl Into<String>,
        opts: NodeOptions,
    ) -> Result<TreeNode> {
        self.with_tree_mut(session_id, |tree| tree.add_node(role, content.into(), opts))
    }

    pub fn update_node_content(
        &self,
        session_id: &str,
        node_id: &str,
        content: impl Into<String>,
    ) -> Result<()> {
        self.with_tree_mut(session_id, |tree| {
            tree.update_node_content(node_id, content.into())
        })
    }

    pub fn delete_node(&self, session_id: &str, node_id: &str) -> Result<usize> {
        self.with_tree_mut(session_id, |tree| tree.delete_node(node_id))
    }

    pub fn navigate_to_node(&self, session_id: &str, node_id: &str) -> Result<()> {
        self.with_tree_mut(session_id, |tree| tree.navigate_to(node_id))
    }

    pub fn search_nodes(&self, session_id: &str, query: &str) -> Result<Vec<TreeNode>> {
        let trees = self.trees.read();
        let tree = trees
            .get(session_id)
            .ok_or_else(|| Error::not_found("tree", session_id))?;
        Ok(tree.search(query).into_iter().cloned().collect())
    }

    // ── Branch operations ──────────────────────────────────────────

    pub fn create_branch(
        &self,
        session_id: &str,
        from_node_id: &str,
        name: &str,
    ) -> Result<Branch> {
        self.with_tree_mut(session_id, |tree| tree.create_branch(from_node_id, name))
    }

    pub fn switch_branch(&self, session_id: &str, branch_id: &str) -> Result<()> {
        self.with_tree_mut(session_id, |tree| tree.switch_branch(branch_id))
    }

    pub fn merge_branch(
        &self,
        session_id: &str,
        source_branch_id: &str,
        into_node_id: &str,
    ) -> Result<TreeNode> {
        self.with_tree_mut(session_id, |tree| {
            tree.merge_branch(source_branch_id, into_node_id)
        })
    }

    pub fn abandon_branch(&self, session_id: &str, branch_id: &str) -> Result<()> {
        self.with_tree_mut(session_id, |tree| tree.abandon_branch(branch_id))
    }

    pub fn rename_branch(&self, session_id: &str, branch_id: &str, name: &str) -> Result<()> {
        self.with_tree_mut(session_id, |tree| tree.rename_branch(branch_id, name))
    }

    pub fn list_branches(&self, session_id: &str) -> Result<Vec<Branch>> {
        let trees = self.trees.read();
        let tree = trees
            .get(session_id)
            .ok_or_else(|| Error::not_found("tree", session_id))?;
        Ok(tree.list_branches().into_iter().cloned().collect())
    }

    // ── Fork / compact / context ───────────────────────────────────

    /// Copy the path from the root to `from_node_id` into a fresh tree for
    /// `new_session_id`.  Node ids are reissued, token counts preserved,
    /// cumulative totals recomputed.
    pub fn fork_session(
        &self,
        from_session_id: &str,
        from_node_id: &str,
        new_session_id: &str,
    ) -> Result<ConversationTree> {
        let source = self
            .get_tree(from_session_id)
            .ok_or_else(|| Error::not_found("tree", from_session_id))?;

        let path: Vec<TreeNode> = source
            .path_to_root(from_node_id)?
            .into_iter()
            .cloned()
            .collect();

        let mut fork = ConversationTree::new(new_session_id, source.system_prompt.clone());
        for node in path.iter().skip(1) {
            fork.add_node(
                node.role,
                node.content.clone(),
                NodeOptions {
                    tool_calls: node.tool_calls.clone(),
                    tool_results: node.tool_results.clone(),
                    token_count: Some(node.token_count),
                    ..Default::default()
                },
            )?;
        }
        // Carry root content when the source root was non-default.
        if let Some(first) = path.first() {
            if fork.nodes[&fork.root_id].content != first.content {
                let root_id = fork.root_id.clone();
                fork.update_node_content(&root_id, first.content.clone())?;
            }
        }

        fork.check_invariants()?;
        self.trees
            .write()
            .insert(new_session_id.to_owned(), fork.clone());
        Ok(fork)
    }

    pub fn compact_history(&self, session_id: &str, threshold: u64) -> Result<CompactionReport> {
        self.with_tree_mut(session_id, |tree| compact_history(tree, threshold))
    }

    pub fn messages_for_context(
        &self,
        session_id: &str,
        node_id: &str,
        max_tokens: u64,
    ) -> Result<Vec<pi_domain::message::ContextMessage>> {
        let trees = self.trees.read();
        let tree = trees
            .get(session_id)
            .ok_or_else(|| Error::not_found("tree", session_id))?;
        messages_for_context(tree, node_id, max_tokens)
    }

    // ── Internal ───────────────────────────────────────────────────

    fn with_tree_mut<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut ConversationTree) -> Result<T>,
    ) -> Result<T> {
        let mut trees = self.trees.write();
        let tree = trees
            .get_mut(session_id)
            .ok_or_else(|| Error::not_found("tree", session_id))?;
        f(tree)
    }
}
