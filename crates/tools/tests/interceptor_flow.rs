//! End-to-end interceptor behavior: policy precedence, audit ordering,
//! remote dispatch, and timeouts.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use pi_domain::config::ToolsConfig;
use pi_domain::message::ToolCall;
use pi_tools::{
    AuditEventKind, AuditFilter, RemoteToolExecutor, ToolContext, ToolDefinition, ToolHandler,
    ToolInterceptor,
};

fn ctx(session: &str) -> ToolContext {
    ToolContext {
        session_id: session.into(),
        agent_id: "agent-1".into(),
        ..Default::default()
    }
}

fn call(name: &str, args: Value) -> ToolCall {
    ToolCall {
        id: format!("call-{name}"),
        name: name.into(),
        arguments: args,
    }
}

fn interceptor() -> ToolInterceptor {
    ToolInterceptor::new(ToolsConfig::default(), None)
}

struct EchoTool;

#[async_trait::async_trait]
impl ToolHandler for EchoTool {
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, String> {
        Ok(json!({ "echo": args }))
    }
}

struct SlowTool;

#[async_trait::async_trait]
impl ToolHandler for SlowTool {
    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, String> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!({}))
    }
}

struct EverythingRemote;

#[async_trait::async_trait]
impl RemoteToolExecutor for EverythingRemote {
    fn name(&self) -> &str {
        "remote-node"
    }
    fn can_handle(&self, tool_name: &str, _ctx: &ToolContext) -> bool {
        tool_name == "read"
    }
    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<Value, String> {
        Ok(json!({ "handled_remotely": call.name }))
    }
}

// ── Policy precedence (dangerous command vs approval) ──────────────

#[tokio::test]
async fn dangerous_command_is_blocked_by_the_higher_priority_policy() {
    let interceptor = interceptor();
    let result = interceptor
        .intercept(&call("bash", json!({"command": "rm -rf /"})), &ctx("s1"))
        .await;

    assert!(!result.success);
    assert_eq!(result.blocked_by.as_deref(), Some("dangerous_commands"));
    assert!(
        !result.requires_approval,
        "denial must win over the approval policy"
    );

    let audit = interceptor.audit_query(&AuditFilter {
        session_id: Some("s1".into()),
        ..Default::default()
    });
    assert_eq!(audit.len(), 2);
    assert_eq!(audit[0].event, AuditEventKind::Started);
    assert_eq!(audit[1].event, AuditEventKind::Blocked);
    assert_eq!(
        audit[1].blocking_policy.as_deref(),
        Some("dangerous_commands")
    );
}

#[tokio::test]
async fn benign_bash_requires_approval_without_executing() {
    let interceptor = interceptor();
    let result = interceptor
        .intercept(&call("bash", json!({"command": "echo hi"})), &ctx("s1"))
        .await;

    assert!(!result.success);
    assert!(result.requires_approval);
    assert_eq!(result.blocked_by.as_deref(), Some("bash_approval"));

    let blocked = interceptor.audit_query(&AuditFilter {
        event: Some(AuditEventKind::Blocked),
        ..Default::default()
    });
    assert_eq!(blocked.len(), 1);
}

// ── Audit ordering ─────────────────────────────────────────────────

#[tokio::test]
async fn every_call_gets_started_plus_exactly_one_terminal_event() {
    let interceptor = interceptor();
    interceptor.register_tool(ToolDefinition::new(
        "echo",
        "echo",
        json!({}),
        Arc::new(EchoTool),
    ));

    interceptor
        .intercept(&call("echo", json!({"a": 1})), &ctx("s1"))
        .await;
    interceptor
        .intercept(&call("missing_tool", json!({})), &ctx("s1"))
        .await;
    interceptor
        .intercept(&call("bash", json!({"command": "rm -rf /"})), &ctx("s1"))
        .await;

    let audit = interceptor.audit_query(&AuditFilter {
        session_id: Some("s1".into()),
        ..Default::default()
    });
    let started = audit
        .iter()
        .filter(|e| e.event == AuditEventKind::Started)
        .count();
    let terminal = audit
        .iter()
        .filter(|e| {
            matches!(
                e.event,
                AuditEventKind::Completed | AuditEventKind::Failed | AuditEventKind::Blocked
            )
        })
        .count();
    assert_eq!(started, 3);
    assert_eq!(terminal, 3);

    // Per call, started comes first.
    for name in ["echo", "missing_tool", "bash"] {
        let events: Vec<_> = audit.iter().filter(|e| e.tool_name == name).collect();
        assert_eq!(events.len(), 2, "{name}");
        assert_eq!(events[0].event, AuditEventKind::Started);
    }
}

#[tokio::test]
async fn successful_execution_is_completed_with_result() {
    let interceptor = interceptor();
    interceptor.register_tool(ToolDefinition::new(
        "echo",
        "echo",
        json!({}),
        Arc::new(EchoTool),
    ));

    let result = interceptor
        .intercept(&call("echo", json!({"x": 42})), &ctx("s1"))
        .await;
    assert!(result.success);
    assert_eq!(result.result.unwrap()["echo"]["x"], 42);

    let completed = interceptor.audit_query(&AuditFilter {
        event: Some(AuditEventKind::Completed),
        ..Default::default()
    });
    assert_eq!(completed.len(), 1);
    assert!(completed[0].execution_time_ms.is_some());
}

// ── Dispatch ───────────────────────────────────────────────────────

#[tokio::test]
async fn remote_executor_wins_over_local_tool() {
    let interceptor = interceptor();
    interceptor.register_remote_executor(Arc::new(EverythingRemote));

    let result = interceptor
        .intercept(&call("read", json!({"path": "x"})), &ctx("s1"))
        .await;
    assert!(result.success);
    assert_eq!(result.result.unwrap()["handled_remotely"], "read");
}

#[tokio::test]
async fn unregistering_remote_restores_local_dispatch() {
    let interceptor = interceptor();
    interceptor.register_remote_executor(Arc::new(EverythingRemote));
    assert!(interceptor.unregister_remote_executor("remote-node"));

    // Local `read` now handles it (and fails on the missing worktree).
    let result = interceptor
        .intercept(&call("read", json!({"path": "x"})), &ctx("s1"))
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("no worktree"));
}

#[tokio::test]
async fn unknown_tool_fails_cleanly() {
    let interceptor = interceptor();
    let result = interceptor
        .intercept(&call("no_such_tool", json!({})), &ctx("s1"))
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("not registered"));
}

// ── Timeouts ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn slow_tools_are_cut_off_at_their_timeout() {
    let interceptor = interceptor();
    interceptor.register_tool(
        ToolDefinition::new("slow", "slow", json!({}), Arc::new(SlowTool))
            .with_timeout(Duration::from_millis(50)),
    );

    let result = interceptor
        .intercept(&call("slow", json!({})), &ctx("s1"))
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("timed out"));

    let failed = interceptor.audit_query(&AuditFilter {
        event: Some(AuditEventKind::Failed),
        ..Default::default()
    });
    assert_eq!(failed.len(), 1);
}

// ── Args redaction in the audit trail ──────────────────────────────

#[tokio::test]
async fn sensitive_args_are_redacted_in_audit() {
    let interceptor = interceptor();
    interceptor.register_tool(ToolDefinition::new(
        "echo",
        "echo",
        json!({}),
        Arc::new(EchoTool),
    ));

    interceptor
        .intercept(
            &call("echo", json!({"path": "a", "api_key": "sk-secret"})),
            &ctx("s1"),
        )
        .await;

    let audit = interceptor.audit_query(&AuditFilter {
        event: Some(AuditEventKind::Started),
        ..Default::default()
    });
    assert_eq!(audit[0].args["api_key"], "[redacted]");
    assert_eq!(audit[0].args["path"], "a");
}

#[tokio::test]
async fn list_available_tools_includes_builtins() {
    let interceptor = interceptor();
    let names: Vec<String> = interceptor
        .list_available_tools(&ctx("s1"))
        .into_iter()
        .map(|s| s.name)
        .collect();
    for expected in ["bash", "edit", "read", "todo_write", "write"] {
        assert!(names.contains(&expected.to_string()), "missing {expected}");
    }
}
