//! Tool interception: policy evaluation, local/remote dispatch, audit
//! logging, per-call timeouts, and the built-in tool set.

pub mod builtin;

mod audit;
mod interceptor;
mod policy;
mod types;
mod worktree;

pub use audit::{
    redact_args, AuditEntry, AuditEventKind, AuditFilter, AuditSink, MemoryAuditSink,
};
pub use interceptor::ToolInterceptor;
pub use policy::{
    bash_approval_policy, dangerous_commands_policy, PolicyDecision, PolicyEngine, PolicyInfo,
    PolicyOutcome, ToolPolicy,
};
pub use types::{
    RemoteToolExecutor, TodoItem, TodoStatus, TodoStore, ToolContext, ToolDefinition, ToolHandler,
    ToolResult,
};
pub use worktree::resolve_in_worktree;
