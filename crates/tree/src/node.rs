//! Tree data model and invariant-preserving mutation.
//!
//! Nodes are held in an id-keyed arena; parents and children reference each
//! other by id so the merge node's second parent needs no special ownership.
//! Derived metadata (totals, cumulative token counts) is maintained by every
//! mutation, never recomputed lazily.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pi_domain::message::{Role, ToolCall, ToolResultPayload};
use pi_domain::{Error, Result};

/// Default compaction trigger, in tokens.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 100_000;

/// Default context materialization budget, in tokens.
pub const DEFAULT_CONTEXT_TOKENS: u64 = 128_000;

/// Conservative token estimator: one token per four characters, rounded up.
pub fn estimate_tokens(content: &str) -> u64 {
    (content.chars().count() as u64).div_ceil(4)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Nodes & branches
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// `None` only for the root.
    pub parent_id: Option<String>,
    /// Ordered child ids.
    pub children: Vec<String>,
    pub branch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResultPayload>>,
    pub token_count: u64,
    /// Tokens along the path from the root through this node.
    pub cumulative_tokens: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub compacted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Second parent reference carried by merge nodes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_from: Option<String>,
}

impl TreeNode {
    /// Tokens this node contributes to a materialized context: the summary
    /// size once compacted, the full count otherwise.
    pub fn context_tokens(&self) -> u64 {
        if self.compacted {
            self.summary.as_deref().map(estimate_tokens).unwrap_or(0)
        } else {
            self.token_count
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Active,
    Merged,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    /// Unique within the tree.
    pub name: String,
    /// Divergence point.
    pub base_node_id: String,
    /// Current tip.
    pub head_node_id: String,
    pub created_at: DateTime<Utc>,
    pub status: BranchStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeMetadata {
    pub total_nodes: u64,
    pub total_branches: u64,
    pub total_tokens: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonically increasing on every mutation.
    pub version: u64,
    pub compaction_count: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tree
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTree {
    pub session_id: String,
    pub root_id: String,
    pub nodes: HashMap<String, TreeNode>,
    pub branches: HashMap<String, Branch>,
    pub current_branch_id: String,
    pub current_node_id: String,
    pub metadata: TreeMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Options accepted by [`ConversationTree::add_node`].
#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    /// Attach under this node instead of the current one.
    pub parent_id: Option<String>,
    /// Record under this branch instead of the current one.
    pub branch_id: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_results: Option<Vec<ToolResultPayload>>,
    /// Caller-supplied token count; skips the estimator.
    pub token_count: Option<u64>,
}

impl ConversationTree {
    /// Create a tree with a system root node and a `main` branch.
    pub fn new(session_id: impl Into<String>, system_prompt: Option<String>) -> Self {
        let session_id = session_id.into();
        let now = Utc::now();
        let root_id = new_node_id();
        let branch_id = new_branch_id();

        let content = system_prompt.clone().unwrap_or_default();
        let token_count = estimate_tokens(&content);
        let root = TreeNode {
            id: root_id.clone(),
            role: Role::System,
            content,
            parent_id: None,
            children: Vec::new(),
            branch_id: branch_id.clone(),
            tool_calls: None,
            tool_results: None,
            token_count,
            cumulative_tokens: token_count,
            created_at: now,
            compacted: false,
            summary: None,
            merged_from: None,
        };

        let main = Branch {
            id: branch_id.clone(),
            name: "main".into(),
            base_node_id: root_id.clone(),
            head_node_id: root_id.clone(),
            created_at: now,
            status: BranchStatus::Active,
        };

        Self {
            session_id,
            root_id: root_id.clone(),
            nodes: HashMap::from([(root_id.clone(), root)]),
            branches: HashMap::from([(branch_id.clone(), main)]),
            current_branch_id: branch_id,
            current_node_id: root_id,
            metadata: TreeMetadata {
                total_nodes: 1,
                total_branches: 1,
                total_tokens: token_count,
                created_at: now,
                updated_at: now,
                version: 1,
                compaction_count: 0,
            },
            system_prompt,
        }
    }

    pub fn get(&self, node_id: &str) -> Option<&TreeNode> {
        self.nodes.get(node_id)
    }

    fn require(&self, node_id: &str) -> Result<&TreeNode> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| Error::not_found("node", node_id))
    }

    fn touch(&mut self) {
        self.metadata.updated_at = Utc::now();
        self.metadata.version += 1;
    }

    // ── Mutation ───────────────────────────────────────────────────

    /// Append a node.  Defaults: parent = current node, branch = current
    /// branch.  Updates the branch head when extending it, and moves the
    /// current pointer to the new node.
    pub fn add_node(
        &mut self,
        role: Role,
        content: impl Into<String>,
        opts: NodeOptions,
    ) -> Result<TreeNode> {
        let content = content.into();
        let parent_id = opts
            .parent_id
            .unwrap_or_else(|| self.current_node_id.clone());
        let branch_id = opts
            .branch_id
            .unwrap_or_else(|| self.current_branch_id.clone());

        let parent_cumulative = self.require(&parent_id)?.cumulative_tokens;
        if !self.branches.contains_key(&branch_id) {
            return Err(Error::not_found("branch", &branch_id));
        }

        let token_count = opts
            .token_count
            .unwrap_or_else(|| estimate_tokens(&content));
        let id = new_node_id();
        let node = TreeNode {
            id: id.clone(),
            role,
            content,
            parent_id: Some(parent_id.clone()),
            children: Vec::new(),
            branch_id: branch_id.clone(),
            tool_calls: opts.tool_calls,
            tool_results: opts.tool_results,
            token_count,
            cumulative_tokens: parent_cumulative + token_count,
            created_at: Utc::now(),
            compacted: false,
            summary: None,
            merged_from: None,
        };

        self.nodes
            .get_mut(&parent_id)
            .expect("parent checked above")
            .children
            .push(id.clone());
        self.nodes.insert(id.clone(), node.clone());

        // Extending a branch from its head advances the head.
        if let Some(branch) = self.branches.get_mut(&branch_id) {
            if branch.head_node_id == parent_id {
                branch.head_node_id = id.clone();
            }
        }

        self.current_node_id = id;
        self.current_branch_id = branch_id;
        self.metadata.total_nodes += 1;
        self.metadata.total_tokens += token_count;
        self.touch();
        Ok(node)
    }

    /// Replace a node's content, re-estimating its token count and
    /// recomputing cumulative totals for the node and all its descendants.
    pub fn update_node_content(&mut self, node_id: &str, content: impl Into<String>) -> Result<()> {
        let content = content.into();
        let new_count = estimate_tokens(&content);
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| Error::not_found("node", node_id))?;
        let old_count = node.token_count;
        node.content = content;
        node.token_count = new_count;

        self.metadata.total_tokens = self.metadata.total_tokens - old_count + new_count;
        self.recompute_cumulative_from(node_id)?;
        self.touch();
        Ok(())
    }

    /// Delete a non-root node and every descendant.
    pub fn delete_node(&mut self, node_id: &str) -> Result<usize> {
        if node_id == self.root_id {
            return Err(Error::InvalidRequest("cannot delete the root node".into()));
        }
        let parent_id = self
            .require(node_id)?
            .parent_id
            .clone()
            .expect("non-root has a parent");

        let mut doomed = vec![node_id.to_owned()];
        doomed.extend(self.descendants(node_id)?.into_iter().map(|n| n.id.clone()));

        for id in &doomed {
            if let Some(node) = self.nodes.remove(id) {
                self.metadata.total_nodes -= 1;
                self.metadata.total_tokens -= node.token_count;
            }
        }
        if let Some(parent) = self.nodes.get_mut(&parent_id) {
            parent.children.retain(|c| !doomed.contains(c));
        }

        // Repoint anything that referenced a deleted node.
        if doomed.contains(&self.current_node_id) {
            self.current_node_id = parent_id.clone();
        }
        for branch in self.branches.values_mut() {
            if doomed.contains(&branch.head_node_id) {
                branch.head_node_id = parent_id.clone();
            }
        }

        self.touch();
        Ok(doomed.len())
    }

    fn recompute_cumulative_from(&mut self, node_id: &str) -> Result<()> {
        let base = {
            let node = self.require(node_id)?;
            match &node.parent_id {
                Some(pid) => self.require(pid)?.cumulative_tokens,
                None => 0,
            }
        };
        let mut stack = vec![(node_id.to_owned(), base)];
        while let Some((id, parent_cumulative)) = stack.pop() {
            let node = self
                .nodes
                .get_mut(&id)
                .ok_or_else(|| Error::not_found("node", &id))?;
            node.cumulative_tokens = parent_cumulative + node.token_count;
            let cumulative = node.cumulative_tokens;
            for child in node.children.clone() {
                stack.push((child, cumulative));
            }
        }
        Ok(())
    }

    // ── Traversal ──────────────────────────────────────────────────

    /// Path from the root to `node_id`, root first.
    pub fn path_to_root(&self, node_id: &str) -> Result<Vec<&TreeNode>> {
        let mut path = Vec::new();
        let mut cursor = Some(node_id.to_owned());
        while let Some(id) = cursor {
            let node = self.require(&id)?;
            cursor = node.parent_id.clone();
            path.push(node);
        }
        path.reverse();
        Ok(path)
    }

    pub fn children(&self, node_id: &str) -> Result<Vec<&TreeNode>> {
        let node = self.require(node_id)?;
        node.children.iter().map(|id| self.require(id)).collect()
    }

    /// All descendants of a node.
    pub fn descendants(&self, node_id: &str) -> Result<Vec<&TreeNode>> {
        let mut out = Vec::new();
        let mut queue: Vec<&str> = self.require(node_id)?.children.iter().map(String::as_str).collect();
        while let Some(id) = queue.pop() {
            let node = self.require(id)?;
            queue.extend(node.children.iter().map(String::as_str));
            out.push(node);
        }
        Ok(out)
    }

    /// Case-insensitive substring search over node content.
    pub fn search(&self, query: &str) -> Vec<&TreeNode> {
        let needle = query.to_lowercase();
        let mut hits: Vec<&TreeNode> = self
            .nodes
            .values()
            .filter(|n| n.content.to_lowercase().contains(&needle))
            .collect();
        hits.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        hits
    }

    /// Move the current pointer to an existing node (and its branch).
    pub fn navigate_to(&mut self, node_id: &str) -> Result<()> {
        let branch_id = self.require(node_id)?.branch_id.clone();
        self.current_node_id = node_id.to_owned();
        self.current_branch_id = branch_id;
        self.touch();
        Ok(())
    }

    // ── Branching ──────────────────────────────────────────────────

    pub fn create_branch(&mut self, from_node_id: &str, name: &str) -> Result<Branch> {
        self.require(from_node_id)?;
        if self.branches.values().any(|b| b.name == name) {
            return Err(Error::InvalidRequest(format!(
                "branch name '{name}' already exists"
            )));
        }
        let branch = Branch {
            id: new_branch_id(),
            name: name.to_owned(),
            base_node_id: from_node_id.to_owned(),
            head_node_id: from_node_id.to_owned(),
            created_at: Utc::now(),
            status: BranchStatus::Active,
        };
        self.branches.insert(branch.id.clone(), branch.clone());
        self.metadata.total_branches += 1;
        self.touch();
        Ok(branch)
    }

    pub fn switch_branch(&mut self, branch_id: &str) -> Result<()> {
        let head = self
            .branches
            .get(branch_id)
            .ok_or_else(|| Error::not_found("branch", branch_id))?
            .head_node_id
            .clone();
        self.current_branch_id = branch_id.to_owned();
        self.current_node_id = head;
        self.touch();
        Ok(())
    }

    /// Merge a branch into a target node: a system merge-marker node becomes
    /// a child of the target and records the source head as its second
    /// parent.  The source branch is marked merged.
    pub fn merge_branch(&mut self, source_branch_id: &str, into_node_id: &str) -> Result<TreeNode> {
        let source = self
            .branches
            .get(source_branch_id)
            .ok_or_else(|| Error::not_found("branch", source_branch_id))?
            .clone();
        self.require(into_node_id)?;

        let marker = format!("Merged branch '{}' into this point.", source.name);
        let node = self.add_node(
            Role::System,
            marker,
            NodeOptions {
                parent_id: Some(into_node_id.to_owned()),
                ..Default::default()
            },
        )?;
        let merge_id = node.id.clone();
        if let Some(n) = self.nodes.get_mut(&merge_id) {
            n.merged_from = Some(source.head_node_id.clone());
        }
        if let Some(b) = self.branches.get_mut(source_branch_id) {
            b.status = BranchStatus::Merged;
        }
        Ok(self.nodes.get(&merge_id).cloned().expect("just inserted"))
    }

    /// Mark a branch abandoned.  No nodes are removed.
    pub fn abandon_branch(&mut self, branch_id: &str) -> Result<()> {
        let branch = self
            .branches
            .get_mut(branch_id)
            .ok_or_else(|| Error::not_found("branch", branch_id))?;
        branch.status = BranchStatus::Abandoned;
        self.touch();
        Ok(())
    }

    pub fn rename_branch(&mut self, branch_id: &str, name: &str) -> Result<()> {
        if self
            .branches
            .values()
            .any(|b| b.name == name && b.id != branch_id)
        {
            return Err(Error::InvalidRequest(format!(
                "branch name '{name}' already exists"
            )));
        }
        let branch = self
            .branches
            .get_mut(branch_id)
            .ok_or_else(|| Error::not_found("branch", branch_id))?;
        branch.name = name.to_owned();
        self.touch();
        Ok(())
    }

    /// Branches ordered by creation time (then id, for determinism).
    pub fn list_branches(&self) -> Vec<&Branch> {
        let mut branches: Vec<_> = self.branches.values().collect();
        branches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        branches
    }

    // ── Validation (test support) ──────────────────────────────────

    /// Check the structural invariants; returns the first violation found.
    pub fn check_invariants(&self) -> Result<()> {
        let mut token_sum = 0u64;
        for node in self.nodes.values() {
            token_sum += node.token_count;
            match &node.parent_id {
                None => {
                    if node.id != self.root_id {
                        return Err(Error::Other(format!("orphan root {}", node.id)));
                    }
                }
                Some(pid) => {
                    let parent = self.require(pid)?;
                    if !parent.children.contains(&node.id) {
                        return Err(Error::Other(format!(
                            "node {} missing from parent {} children",
                            node.id, pid
                        )));
                    }
                    if node.cumulative_tokens != parent.cumulative_tokens + node.token_count {
                        return Err(Error::Other(format!(
                            "node {} cumulative tokens inconsistent",
                            node.id
                        )));
                    }
                }
            }
            for child in &node.children {
                if !self.nodes.contains_key(child) {
                    return Err(Error::Other(format!(
                        "node {} references missing child {child}",
                        node.id
                    )));
                }
            }
        }
        if token_sum != self.metadata.total_tokens {
            return Err(Error::Other(format!(
                "total_tokens {} != sum {}",
                self.metadata.total_tokens, token_sum
            )));
        }
        if self.metadata.total_nodes as usize != self.nodes.len() {
            return Err(Error::Other("total_nodes mismatch".into()));
        }
        Ok(())
    }
}

fn new_node_id() -> String {
    format!("node_{}", uuid::Uuid::new_v4().simple())
}

fn new_branch_id() -> String {
    format!("branch_{}", uuid::Uuid::new_v4().simple())
}
