//! The tool interceptor.
//!
//! Every model-issued tool call flows through `intercept`: policy pass,
//! local/remote dispatch under a per-call timeout, and audit emission
//! (exactly one `started`, then exactly one of `completed`/`failed`/
//! `blocked`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;

use pi_domain::config::ToolsConfig;
use pi_domain::message::{ToolCall, ToolSpec};
use pi_domain::trace::TraceEvent;
use pi_tree::TreeManager;

use crate::audit::{redact_args, AuditEntry, AuditEventKind, AuditFilter, AuditSink, MemoryAuditSink};
use crate::builtin;
use crate::policy::{PolicyDecision, PolicyEngine, PolicyInfo, ToolPolicy};
use crate::types::{
    RemoteToolExecutor, TodoItem, TodoStore, ToolContext, ToolDefinition, ToolResult,
};

pub struct ToolInterceptor {
    config: ToolsConfig,
    tools: RwLock<HashMap<String, Arc<ToolDefinition>>>,
    remotes: RwLock<Vec<Arc<dyn RemoteToolExecutor>>>,
    policies: PolicyEngine,
    audit: Arc<dyn AuditSink>,
    todos: Arc<TodoStore>,
}

impl ToolInterceptor {
    /// Build an interceptor with the built-in tool set, the built-in bash
    /// policies, and the default in-memory audit ring.
    pub fn new(config: ToolsConfig, trees: Option<Arc<TreeManager>>) -> Self {
        let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new(config.audit_capacity));
        Self::with_audit_sink(config, trees, audit)
    }

    pub fn with_audit_sink(
        config: ToolsConfig,
        trees: Option<Arc<TreeManager>>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let todos = Arc::new(TodoStore::new());
        let interceptor = Self {
            tools: RwLock::new(HashMap::new()),
            remotes: RwLock::new(Vec::new()),
            policies: PolicyEngine::new(),
            audit,
            todos: todos.clone(),
            config: config.clone(),
        };

        for tool in builtin::builtin_tools(&config, todos, trees) {
            interceptor.register_tool(tool);
        }

        let denylist = config
            .denied_patterns
            .iter()
            .filter_map(|p| regex::Regex::new(p).ok())
            .collect();
        interceptor.add_policy(crate::policy::dangerous_commands_policy(denylist));
        interceptor.add_policy(crate::policy::bash_approval_policy());
        interceptor
    }

    // ── Registration ───────────────────────────────────────────────

    pub fn register_tool(&self, tool: ToolDefinition) {
        self.tools.write().insert(tool.name.clone(), Arc::new(tool));
    }

    pub fn unregister_tool(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    pub fn register_remote_executor(&self, executor: Arc<dyn RemoteToolExecutor>) {
        self.remotes.write().push(executor);
    }

    pub fn unregister_remote_executor(&self, name: &str) -> bool {
        let mut remotes = self.remotes.write();
        let before = remotes.len();
        remotes.retain(|e| e.name() != name);
        remotes.len() != before
    }

    pub fn add_policy(&self, policy: ToolPolicy) {
        self.policies.add(policy);
    }

    pub fn remove_policy(&self, name: &str) -> bool {
        self.policies.remove(name)
    }

    pub fn set_default_policy(&self, decision: PolicyDecision) {
        self.policies.set_default(decision);
    }

    pub fn get_policies(&self) -> Vec<PolicyInfo> {
        self.policies.list()
    }

    /// Local tool specs visible to a session, sorted by name.
    pub fn list_available_tools(&self, _ctx: &ToolContext) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> =
            self.tools.read().values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn get_session_todos(&self, session_id: &str) -> Vec<TodoItem> {
        self.todos.get(session_id)
    }

    pub fn audit_query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.audit.query(filter)
    }

    // ── Interception ───────────────────────────────────────────────

    pub async fn intercept(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let started = Instant::now();
        let logged_args = redact_args(&call.arguments);
        self.record(
            ctx,
            call,
            AuditEventKind::Started,
            logged_args.clone(),
            None,
            None,
            None,
            None,
        );

        // Policy pass.
        let outcome = self.policies.evaluate(&call.name, ctx, &call.arguments);
        if !outcome.decision.allowed || outcome.decision.require_approval {
            let elapsed = started.elapsed().as_millis() as u64;
            let reason = outcome
                .decision
                .reason
                .clone()
                .unwrap_or_else(|| "blocked by policy".into());
            self.record(
                ctx,
                call,
                AuditEventKind::Blocked,
                logged_args,
                None,
                Some(reason.clone()),
                outcome.decided_by.clone(),
                Some(elapsed),
            );
            self.trace(ctx, call, "blocked", elapsed);
            return ToolResult {
                success: false,
                result: None,
                error: Some(reason),
                execution_time_ms: elapsed,
                blocked_by: outcome.decided_by,
                requires_approval: outcome.decision.require_approval,
            };
        }
        let args = outcome.effective_args;

        // Dispatch: first matching remote executor, else the local tool.
        let remote = self
            .remotes
            .read()
            .iter()
            .find(|e| e.can_handle(&call.name, ctx))
            .cloned();

        let (timeout, execution) = match &remote {
            Some(executor) => {
                let timeout = Duration::from_millis(self.config.default_timeout_ms);
                let call = ToolCall {
                    arguments: args.clone(),
                    ..call.clone()
                };
                let executor = executor.clone();
                let ctx = ctx.clone();
                let fut: BoxFuture<'static, Result<Value, String>> =
                    Box::pin(async move { executor.execute(&call, &ctx).await });
                (timeout, fut)
            }
            None => {
                let Some(tool) = self.tools.read().get(&call.name).cloned() else {
                    let elapsed = started.elapsed().as_millis() as u64;
                    let error = format!("tool '{}' is not registered", call.name);
                    self.record(
                        ctx,
                        call,
                        AuditEventKind::Failed,
                        logged_args,
                        None,
                        Some(error.clone()),
                        None,
                        Some(elapsed),
                    );
                    self.trace(ctx, call, "failed", elapsed);
                    return ToolResult::failed(error, elapsed);
                };
                let timeout = tool.timeout;
                let args = args.clone();
                let ctx = ctx.clone();
                let fut: BoxFuture<'static, Result<Value, String>> =
                    Box::pin(async move { tool.handler.execute(args, &ctx).await });
                (timeout, fut)
            }
        };

        let result = tokio::time::timeout(timeout, execution).await;
        let elapsed = started.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(value)) => {
                self.record(
                    ctx,
                    call,
                    AuditEventKind::Completed,
                    logged_args,
                    Some(value.clone()),
                    None,
                    None,
                    Some(elapsed),
                );
                self.trace(ctx, call, "completed", elapsed);
                ToolResult::ok(value, elapsed)
            }
            Ok(Err(error)) => {
                self.record(
                    ctx,
                    call,
                    AuditEventKind::Failed,
                    logged_args,
                    None,
                    Some(error.clone()),
                    None,
                    Some(elapsed),
                );
                self.trace(ctx, call, "failed", elapsed);
                ToolResult::failed(error, elapsed)
            }
            Err(_) => {
                let error = format!(
                    "tool '{}' timed out after {} ms",
                    call.name,
                    timeout.as_millis()
                );
                self.record(
                    ctx,
                    call,
                    AuditEventKind::Failed,
                    logged_args,
                    None,
                    Some(error.clone()),
                    None,
                    Some(elapsed),
                );
                self.trace(ctx, call, "failed", elapsed);
                ToolResult::failed(error, elapsed)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        ctx: &ToolContext,
        call: &ToolCall,
        event: AuditEventKind,
        args: Value,
        result: Option<Value>,
        error: Option<String>,
        blocking_policy: Option<String>,
        execution_time_ms: Option<u64>,
    ) {
        self.audit.record(AuditEntry {
            event,
            tool_name: call.name.clone(),
            session_id: ctx.session_id.clone(),
            agent_id: ctx.agent_id.clone(),
            tenant_id: ctx.tenant_id.clone(),
            args,
            result,
            error,
            blocking_policy,
            execution_time_ms,
            timestamp: Utc::now(),
        });
    }

    fn trace(&self, ctx: &ToolContext, call: &ToolCall, outcome: &str, elapsed: u64) {
        TraceEvent::ToolIntercepted {
            session_id: ctx.session_id.clone(),
            tool_name: call.name.clone(),
            outcome: outcome.to_owned(),
            duration_ms: elapsed,
        }
        .emit();
    }
}

