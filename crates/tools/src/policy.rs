//! Tool policies.
//!
//! Policies are evaluated in priority order (highest first, registration
//! order breaking ties).  A denying decision short-circuits the pass; an
//! approval-required decision is remembered and returned once the pass
//! completes; an allowing decision may sanitize the arguments and the pass
//! continues.  When nothing decided, the default policy applies.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use crate::types::ToolContext;

#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Replacement arguments to execute with, when the policy rewrites them.
    pub sanitized_args: Option<Value>,
    pub require_approval: bool,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            sanitized_args: None,
            require_approval: false,
        }
    }

    pub fn allow_with_args(args: Value) -> Self {
        Self {
            sanitized_args: Some(args),
            ..Self::allow()
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            sanitized_args: None,
            require_approval: false,
        }
    }

    pub fn require_approval(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: Some(reason.into()),
            sanitized_args: None,
            require_approval: true,
        }
    }
}

type Condition = dyn Fn(&str, &ToolContext, &Value) -> bool + Send + Sync;
type Decider = dyn Fn(&str, &ToolContext, &Value) -> PolicyDecision + Send + Sync;

/// One named policy: a condition predicate plus a decision function.
#[derive(Clone)]
pub struct ToolPolicy {
    pub name: String,
    /// Higher priorities are evaluated first.
    pub priority: i32,
    condition: Arc<Condition>,
    decide: Arc<Decider>,
}

impl ToolPolicy {
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        condition: impl Fn(&str, &ToolContext, &Value) -> bool + Send + Sync + 'static,
        decide: impl Fn(&str, &ToolContext, &Value) -> PolicyDecision + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            condition: Arc::new(condition),
            decide: Arc::new(decide),
        }
    }

    fn fires(&self, tool: &str, ctx: &ToolContext, args: &Value) -> bool {
        (self.condition)(tool, ctx, args)
    }

    fn decision(&self, tool: &str, ctx: &ToolContext, args: &Value) -> PolicyDecision {
        (self.decide)(tool, ctx, args)
    }
}

/// Summary for `get_policies`.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyInfo {
    pub name: String,
    pub priority: i32,
}

/// Result of one evaluation pass.
#[derive(Debug, Clone)]
pub struct PolicyOutcome {
    pub decision: PolicyDecision,
    /// The policy that produced the decision (none for the default).
    pub decided_by: Option<String>,
    /// Arguments after any sanitization by allowing policies.
    pub effective_args: Value,
}

pub struct PolicyEngine {
    /// (registration sequence, policy) — sequence breaks priority ties.
    policies: RwLock<Vec<(u64, ToolPolicy)>>,
    next_seq: RwLock<u64>,
    default_decision: RwLock<PolicyDecision>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(Vec::new()),
            next_seq: RwLock::new(0),
            default_decision: RwLock::new(PolicyDecision::allow()),
        }
    }

    pub fn add(&self, policy: ToolPolicy) {
        let mut seq = self.next_seq.write();
        self.policies.write().push((*seq, policy));
        *seq += 1;
    }

    /// Remove by name; returns whether anything was removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut policies = self.policies.write();
        let before = policies.len();
        policies.retain(|(_, p)| p.name != name);
        policies.len() != before
    }

    pub fn set_default(&self, decision: PolicyDecision) {
        *self.default_decision.write() = decision;
    }

    pub fn list(&self) -> Vec<PolicyInfo> {
        let mut infos: Vec<PolicyInfo> = self
            .policies
            .read()
            .iter()
            .map(|(_, p)| PolicyInfo {
                name: p.name.clone(),
                priority: p.priority,
            })
            .collect();
        infos.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        infos
    }

    pub fn evaluate(&self, tool: &str, ctx: &ToolContext, args: &Value) -> PolicyOutcome {
        let mut ordered: Vec<(u64, ToolPolicy)> = self.policies.read().clone();
        ordered.sort_by(|(seq_a, a), (seq_b, b)| {
            b.priority.cmp(&a.priority).then_with(|| seq_a.cmp(seq_b))
        });

        let mut effective_args = args.clone();
        let mut pending_approval: Option<(PolicyDecision, String)> = None;

        for (_, policy) in &ordered {
            if !policy.fires(tool, ctx, &effective_args) {
                continue;
            }
            let decision = policy.decision(tool, ctx, &effective_args);
            if !decision.allowed {
                return PolicyOutcome {
                    decision,
                    decided_by: Some(policy.name.clone()),
                    effective_args,
                };
            }
            if let Some(sanitized) = &decision.sanitized_args {
                effective_args = sanitized.clone();
            }
            if decision.require_approval && pending_approval.is_none() {
                pending_approval = Some((decision, policy.name.clone()));
            }
        }

        if let Some((decision, name)) = pending_approval {
            return PolicyOutcome {
                decision,
                decided_by: Some(name),
                effective_args,
            };
        }
        PolicyOutcome {
            decision: self.default_decision.read().clone(),
            decided_by: None,
            effective_args,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in policies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deny `bash` commands matching the configured denylist (priority 300).
pub fn dangerous_commands_policy(patterns: Vec<regex::Regex>) -> ToolPolicy {
    let patterns = Arc::new(patterns);
    let matcher = patterns.clone();
    ToolPolicy::new(
        "dangerous_commands",
        300,
        move |tool, _ctx, args| {
            tool == "bash"
                && args
                    .get("command")
                    .and_then(Value::as_str)
                    .map(|cmd| matcher.iter().any(|p| p.is_match(cmd)))
                    .unwrap_or(false)
        },
        move |_tool, _ctx, args| {
            let command = args.get("command").and_then(Value::as_str).unwrap_or("");
            let pattern = patterns
                .iter()
                .find(|p| p.is_match(command))
                .map(|p| p.as_str().to_owned())
                .unwrap_or_default();
            PolicyDecision::deny(format!("command matches denied pattern '{pattern}'"))
        },
    )
}

/// Require approval for any `bash` call (priority 100).
pub fn bash_approval_policy() -> ToolPolicy {
    ToolPolicy::new(
        "bash_approval",
        100,
        |tool, _ctx, _args| tool == "bash",
        |_tool, _ctx, _args| PolicyDecision::require_approval("shell commands require approval"),
    )
}
