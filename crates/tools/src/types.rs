//! Tool-side types: context, definitions, results, and the remote seam.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pi_domain::message::{ToolCall, ToolSpec};

/// Default per-call timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Ambient context for one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: String,
    pub agent_id: String,
    pub tenant_id: Option<String>,
    /// All file tools are contained to this root.
    pub worktree_root: Option<PathBuf>,
    pub metadata: HashMap<String, Value>,
}

/// Outcome of one intercepted call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    /// Name of the policy that blocked the call, when one did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_approval: bool,
}

impl ToolResult {
    pub(crate) fn ok(result: Value, elapsed_ms: u64) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            execution_time_ms: elapsed_ms,
            blocked_by: None,
            requires_approval: false,
        }
    }

    pub(crate) fn failed(error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            execution_time_ms: elapsed_ms,
            blocked_by: None,
            requires_approval: false,
        }
    }
}

/// Executable body of a local tool.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, String>;
}

/// A registered local tool.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
    pub tags: Vec<String>,
    pub requires_confirmation: bool,
    pub timeout: Duration,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            tags: Vec::new(),
            requires_confirmation: false,
            timeout: DEFAULT_TOOL_TIMEOUT,
            handler,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// A remote tool backend (a connected node, an MCP bridge, …).  The first
/// registered executor whose `can_handle` returns true wins the dispatch.
#[async_trait::async_trait]
pub trait RemoteToolExecutor: Send + Sync {
    fn name(&self) -> &str;
    fn can_handle(&self, tool_name: &str, ctx: &ToolContext) -> bool;
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<Value, String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session todos
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

/// Per-session todo lists written by the `todo_write` tool.
#[derive(Default)]
pub struct TodoStore {
    lists: Mutex<HashMap<String, Vec<TodoItem>>>,
}

impl TodoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, session_id: &str, todos: Vec<TodoItem>) {
        self.lists.lock().insert(session_id.to_owned(), todos);
    }

    pub fn get(&self, session_id: &str) -> Vec<TodoItem> {
        self.lists
            .lock()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&self, session_id: &str) {
        self.lists.lock().remove(session_id);
    }
}
