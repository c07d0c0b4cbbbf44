//! The session manager.
//!
//! Owns every live session, drives the lifecycle state machine, serializes
//! per-session work through the lock map, runs the auto-checkpoint
//! supervisor, and orchestrates worker calls, tool interception, tree
//! updates, and checkpointing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use pi_domain::config::SessionsConfig;
use pi_domain::message::{Role, ToolResultPayload};
use pi_domain::trace::TraceEvent;
use pi_domain::{Error, Result};
use pi_registry::{Instance, InstanceRegistry};
use pi_router::{Router, RoutingRequest};
use pi_state::{CheckpointData, CheckpointMetadata, CheckpointTrigger, StateSynchronizer};
use pi_tools::{ToolContext, ToolInterceptor};
use pi_tree::{NodeOptions, TreeManager};
use pi_worker_protocol::{InitRequest, SendRequest, WorkerClient, WorkerEndpoint};

use crate::events::SessionEvent;
use crate::lifecycle::SessionState;
use crate::lock::SessionLockMap;
use crate::session::{Session, SessionConfig, SessionInfo};

/// Upper bound on model→tool→model rounds within one send.
const MAX_TOOL_ROUNDS: usize = 8;

#[derive(Debug, Clone)]
pub struct TerminateOptions {
    /// Walk through `terminating` rather than jumping straight to the end.
    pub graceful: bool,
    pub final_checkpoint: bool,
}

impl Default for TerminateOptions {
    fn default() -> Self {
        Self {
            graceful: true,
            final_checkpoint: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Replace the config recorded in the checkpoint.
    pub config_override: Option<SessionConfig>,
}

/// What one `send_message` produced.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub content: String,
    pub tool_rounds: usize,
    pub message_count: u64,
}

pub struct SessionManager {
    config: SessionsConfig,
    registry: Arc<InstanceRegistry>,
    router: Arc<Router>,
    synchronizer: Arc<StateSynchronizer>,
    trees: Arc<TreeManager>,
    interceptor: Arc<ToolInterceptor>,
    worker: Arc<dyn WorkerClient>,
    sessions: RwLock<HashMap<String, Session>>,
    /// In-memory per-session checkpoint ids, newest first.
    checkpoints: RwLock<HashMap<String, Vec<String>>>,
    locks: SessionLockMap,
    events: broadcast::Sender<SessionEvent>,
    cadence_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SessionsConfig,
        registry: Arc<InstanceRegistry>,
        router: Arc<Router>,
        synchronizer: Arc<StateSynchronizer>,
        trees: Arc<TreeManager>,
        interceptor: Arc<ToolInterceptor>,
        worker: Arc<dyn WorkerClient>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            registry,
            router,
            synchronizer,
            trees,
            interceptor,
            worker,
            sessions: RwLock::new(HashMap::new()),
            checkpoints: RwLock::new(HashMap::new()),
            locks: SessionLockMap::new(),
            events,
            cadence_task: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    // ── Lookups ────────────────────────────────────────────────────

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> =
            self.sessions.read().values().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn checkpoint_ids(&self, session_id: &str) -> Vec<String> {
        self.checkpoints
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    fn require(&self, session_id: &str) -> Result<Session> {
        self.get_session(session_id)
            .ok_or_else(|| Error::not_found("session", session_id))
    }

    // ── State machine ──────────────────────────────────────────────

    /// Apply a transition, enforcing the matrix.  Terminal sessions are
    /// never mutated.
    fn transition(&self, session_id: &str, to: SessionState) -> Result<SessionState> {
        let (before, after) = {
            let mut sessions = self.sessions.write();
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| Error::not_found("session", session_id))?;
            let before = session.state;
            if !before.can_transition_to(to) {
                return Err(Error::InvalidTransition {
                    from: before.to_string(),
                    to: to.to_string(),
                });
            }
            session.state = to;
            session.last_activity_at = Utc::now();
            (before, to)
        };

        tracing::info!(session_id, before = %before, after = %after, "session state changed");
        TraceEvent::SessionStateChanged {
            session_id: session_id.to_owned(),
            before: before.to_string(),
            after: after.to_string(),
        }
        .emit();
        self.emit(SessionEvent::StateChanged {
            session_id: session_id.to_owned(),
            before,
            after,
        });
        Ok(before)
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::not_found("session", session_id))?;
        Ok(f(session))
    }

    // ── Create ─────────────────────────────────────────────────────

    pub async fn create(&self, mut config: SessionConfig) -> Result<Session> {
        // Normalize: absent persistence settings fall back to the manager's.
        if config.persistence == Default::default() {
            config.persistence = self.config.persistence.clone();
        }

        let session_id = format!("sess_{}", uuid::Uuid::new_v4().simple());
        let session = Session::new(&session_id, config.clone());
        self.sessions
            .write()
            .insert(session_id.clone(), session);

        // Pick an instance through the router.
        let decision = match self.router.route(&self.routing_request(&session_id, &config), None)
        {
            Ok(decision) => decision,
            Err(e) => {
                let _ = self.transition(&session_id, SessionState::Failed);
                self.emit(SessionEvent::Failed {
                    session_id: session_id.clone(),
                    code: "NO_INSTANCE_AVAILABLE".into(),
                    message: e.to_string(),
                });
                return Err(Error::NoInstanceAvailable(e.to_string()));
            }
        };
        let instance = decision.instance;

        // Initialize on the worker.
        let init = InitRequest {
            provider: instance.provider.to_string(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| instance.model.clone()),
            tools: self
                .interceptor
                .list_available_tools(&self.tool_context(&session_id, &config)),
            system_prompt: config.system_prompt.clone(),
            worktree_path: config.worktree_path.clone(),
            inherit_context: None,
        };
        let initialized = match self.worker.init(&endpoint_of(&instance), init).await {
            Ok(result) => result,
            Err(e) => {
                let _ = self.transition(&session_id, SessionState::Failed);
                self.emit(SessionEvent::Failed {
                    session_id: session_id.clone(),
                    code: "SESSION_INIT_FAILED".into(),
                    message: e.to_string(),
                });
                return Err(Error::SessionInitFailed(e.to_string()));
            }
        };

        let tree = self
            .trees
            .create_tree(&session_id, config.system_prompt.clone());
        self.with_session(&session_id, |s| {
            s.instance_id = Some(instance.id.clone());
            s.worker_session_id = Some(initialized.session_id.clone());
            s.root_node_id = Some(tree.root_id.clone());
            s.current_node_id = Some(tree.current_node_id.clone());
        })?;
        self.adjust_active_tasks(&instance.id, 1);

        self.transition(&session_id, SessionState::Active)?;
        self.require(&session_id)
    }

    fn routing_request(&self, session_id: &str, config: &SessionConfig) -> RoutingRequest {
        RoutingRequest {
            request_id: format!("create-{session_id}"),
            required_capabilities: config.required_capabilities.clone(),
            preferred_provider: config.provider,
            estimated_tokens: 1_000,
            ..Default::default()
        }
    }

    fn tool_context(&self, session_id: &str, config: &SessionConfig) -> ToolContext {
        ToolContext {
            session_id: session_id.to_owned(),
            agent_id: config.agent_id.clone(),
            tenant_id: config
                .metadata
                .get("tenant_id")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
            worktree_root: config.worktree_path.clone().map(Into::into),
            metadata: HashMap::new(),
        }
    }

    fn adjust_active_tasks(&self, instance_id: &str, delta: i64) {
        if let Some(instance) = self.registry.get_instance(instance_id) {
            let active = instance.capacity.active_tasks as i64 + delta;
            let _ = self
                .registry
                .update_instance_capacity(instance_id, active.max(0) as u32, None);
        }
    }

    // ── Send ───────────────────────────────────────────────────────

    /// Send user content to the session's worker, intercepting any tool
    /// calls the model issues.  Per-session operations are serialized.
    pub async fn send_message(&self, session_id: &str, content: &str) -> Result<SendOutcome> {
        let _permit = self.locks.acquire(session_id).await;

        let session = self.require(session_id)?;
        if session.state != SessionState::Active {
            return Err(Error::InvalidRequest(format!(
                "session '{session_id}' is {} (must be active to send)",
                session.state
            )));
        }
        let instance = self.instance_for(&session)?;
        let endpoint = endpoint_of(&instance);
        let worker_sid = session
            .worker_session_id
            .clone()
            .ok_or_else(|| Error::Worker("session has no worker-side id".into()))?;
        let ctx = self.tool_context(session_id, &session.config);

        // User message into the tree.
        self.trees.add_node(
            session_id,
            Role::User,
            content,
            NodeOptions::default(),
        )?;
        self.bump_message_count(session_id)?;

        let mut response = self
            .worker
            .send(
                &endpoint,
                &worker_sid,
                SendRequest {
                    content: content.to_owned(),
                    tool_results: None,
                    checkpoint: None,
                },
            )
            .await?;

        let mut tool_rounds = 0usize;
        loop {
            let tool_calls = response.tool_calls.clone().unwrap_or_default();
            self.trees.add_node(
                session_id,
                Role::Assistant,
                response.content.clone(),
                NodeOptions {
                    tool_calls: (!tool_calls.is_empty()).then(|| tool_calls.clone()),
                    ..Default::default()
                },
            )?;
            self.bump_message_count(session_id)?;

            if tool_calls.is_empty() {
                break;
            }
            if tool_rounds >= MAX_TOOL_ROUNDS {
                return Err(Error::Worker(format!(
                    "tool loop exceeded {MAX_TOOL_ROUNDS} rounds"
                )));
            }
            tool_rounds += 1;

            // Intercept each call in order.
            let mut results = Vec::with_capacity(tool_calls.len());
            for call in &tool_calls {
                self.with_session(session_id, |s| s.tool_calls.begin(call.clone()))?;
                let outcome = self.interceptor.intercept(call, &ctx).await;
                let payload = ToolResultPayload {
                    tool_call_id: call.id.clone(),
                    content: if outcome.success {
                        outcome.result.clone().unwrap_or(json!(null))
                    } else {
                        json!({ "error": outcome.error })
                    },
                    is_error: !outcome.success,
                };
                self.with_session(session_id, |s| s.tool_calls.complete(payload.clone()))?;
                results.push(payload);
            }
            self.trees.add_node(
                session_id,
                Role::Tool,
                "",
                NodeOptions {
                    tool_results: Some(results.clone()),
                    ..Default::default()
                },
            )?;

            response = self
                .worker
                .send(
                    &endpoint,
                    &worker_sid,
                    SendRequest {
                        content: String::new(),
                        tool_results: Some(results),
                        checkpoint: None,
                    },
                )
                .await?;
        }

        // Post-tool checkpoint, best effort.
        if tool_rounds > 0 {
            if let Err(e) = self
                .checkpoint_locked(session_id, CheckpointTrigger::PostTool)
                .await
            {
                tracing::warn!(session_id, error = %e, "post-tool checkpoint failed");
            }
        }

        // Compaction check against the session's threshold.
        let threshold = session.config.persistence.compact_threshold;
        if let Some(tree) = self.trees.get_tree(session_id) {
            if tree.metadata.total_tokens >= threshold {
                let _ = self.trees.compact_history(session_id, threshold);
            }
            if let Some(tree) = self.trees.get_tree(session_id) {
                self.trees.save_tree(&tree).await?;
            }
        }

        let message_count = self.with_session(session_id, |s| {
            s.last_activity_at = Utc::now();
            s.current_node_id = self
                .trees
                .get_tree(&s.id)
                .map(|t| t.current_node_id.clone());
            s.message_count
        })?;

        Ok(SendOutcome {
            content: response.content,
            tool_rounds,
            message_count,
        })
    }

    fn bump_message_count(&self, session_id: &str) -> Result<()> {
        self.with_session(session_id, |s| s.message_count += 1)
    }

    fn instance_for(&self, session: &Session) -> Result<Instance> {
        let instance_id = session
            .instance_id
            .as_deref()
            .ok_or_else(|| Error::Worker("session has no instance".into()))?;
        self.registry
            .get_instance(instance_id)
            .ok_or_else(|| Error::not_found("instance", instance_id))
    }

    // ── Checkpointing ──────────────────────────────────────────────

    /// Take a checkpoint.  Auto-triggered checkpoints are throttled to one
    /// per 5 s per session and return `None` when suppressed.
    pub async fn checkpoint(
        &self,
        session_id: &str,
        trigger: CheckpointTrigger,
    ) -> Result<Option<CheckpointData>> {
        let _permit = self.locks.acquire(session_id).await;
        self.checkpoint_locked(session_id, trigger)
            .await
            .map(Some)
            .or_else(|e| match e {
                Error::Constraint { code, .. } if code == "CHECKPOINT_THROTTLED" => Ok(None),
                other => Err(other),
            })
    }

    async fn checkpoint_locked(
        &self,
        session_id: &str,
        trigger: CheckpointTrigger,
    ) -> Result<CheckpointData> {
        let session = self.require(session_id)?;
        if session.state.is_terminal() {
            return Err(Error::InvalidRequest(format!(
                "session '{session_id}' is {}",
                session.state
            )));
        }

        if trigger == CheckpointTrigger::Auto {
            let min_interval =
                chrono::Duration::milliseconds(self.config.cadence.min_auto_interval_ms as i64);
            if let Some(last) = session.last_checkpoint_at {
                if Utc::now() - last < min_interval {
                    return Err(Error::constraint(
                        "CHECKPOINT_THROTTLED",
                        "auto checkpoint inside the minimum interval",
                    ));
                }
            }
        }

        let state = session.to_snapshot()?;
        let token_count = self
            .trees
            .get_tree(session_id)
            .map(|t| t.metadata.total_tokens)
            .unwrap_or(0);
        let metadata = CheckpointMetadata {
            message_count: session.message_count,
            token_count,
            trigger,
            worker_checkpoint_ref: None,
        };

        let checkpoint = self
            .synchronizer
            .save_checkpoint(session_id, state, trigger, metadata)
            .await?;

        self.with_session(session_id, |s| {
            s.checkpoint_count += 1;
            s.last_checkpoint_at = Some(checkpoint.created_at);
        })?;
        self.checkpoints
            .write()
            .entry(session_id.to_owned())
            .or_default()
            .insert(0, checkpoint.id.clone());

        self.emit(SessionEvent::Checkpointed {
            session_id: session_id.to_owned(),
            checkpoint_id: checkpoint.id.clone(),
            trigger: trigger.to_string(),
        });
        Ok(checkpoint)
    }

    // ── Pause / resume ─────────────────────────────────────────────

    pub async fn pause(&self, session_id: &str) -> Result<()> {
        let _permit = self.locks.acquire(session_id).await;

        if let Err(e) = self
            .checkpoint_locked(session_id, CheckpointTrigger::StateChange)
            .await
        {
            tracing::warn!(session_id, error = %e, "pre-pause checkpoint failed");
        }
        self.transition(session_id, SessionState::Paused)?;

        let snapshot = self.require(session_id)?.to_snapshot()?;
        self.synchronizer
            .save_session_state(session_id, &snapshot)
            .await?;
        Ok(())
    }

    pub async fn resume(&self, session_id: &str) -> Result<()> {
        let _permit = self.locks.acquire(session_id).await;
        self.transition(session_id, SessionState::Resuming)?;

        let session = self.require(session_id)?;
        let snapshot = session.to_snapshot()?;

        // Reuse the original instance when it is still around and routable.
        let original = session
            .instance_id
            .as_deref()
            .and_then(|id| self.registry.get_instance(id))
            .filter(|i| i.health.is_routable());

        let target = match original {
            Some(instance) => instance,
            None => {
                let decision = self
                    .router
                    .route(&self.routing_request(session_id, &session.config), None)
                    .map_err(|e| {
                        let _ = self.transition(session_id, SessionState::Failed);
                        Error::NoInstanceAvailable(e.to_string())
                    })?;
                decision.instance
            }
        };

        match self.worker.restore(&endpoint_of(&target), &snapshot).await {
            Ok(worker_sid) => {
                let moved = session.instance_id.as_deref() != Some(target.id.as_str());
                if moved {
                    if let Some(old) = &session.instance_id {
                        self.adjust_active_tasks(old, -1);
                    }
                    self.adjust_active_tasks(&target.id, 1);
                }
                self.with_session(session_id, |s| {
                    s.instance_id = Some(target.id.clone());
                    s.worker_session_id = Some(worker_sid);
                    s.cadence_enabled = true;
                })?;
                self.transition(session_id, SessionState::Active)?;
                Ok(())
            }
            Err(e) => {
                let _ = self.transition(session_id, SessionState::Failed);
                self.emit(SessionEvent::Failed {
                    session_id: session_id.to_owned(),
                    code: "SESSION_INIT_FAILED".into(),
                    message: e.to_string(),
                });
                Err(Error::SessionInitFailed(e.to_string()))
            }
        }
    }

    // ── Terminate ──────────────────────────────────────────────────

    /// Idempotent: terminating an already-terminated session warns and
    /// returns without emitting anything.
    pub async fn terminate(&self, session_id: &str, options: TerminateOptions) -> Result<()> {
        let _permit = self.locks.acquire(session_id).await;

        let session = self.require(session_id)?;
        if session.state == SessionState::Terminated {
            tracing::warn!(session_id, "terminate called on a terminated session");
            return Ok(());
        }
        if session.state == SessionState::Failed {
            tracing::warn!(session_id, "terminate called on a failed session");
            return Ok(());
        }

        if options.graceful {
            self.transition(session_id, SessionState::Terminating)?;
            if options.final_checkpoint {
                if let Err(e) = self
                    .checkpoint_locked(session_id, CheckpointTrigger::Manual)
                    .await
                {
                    tracing::warn!(session_id, error = %e, "final checkpoint failed");
                }
            }
        }

        // Tear the worker side down, best effort.
        if let (Ok(instance), Some(worker_sid)) =
            (self.instance_for(&session), session.worker_session_id.clone())
        {
            let endpoint = endpoint_of(&instance);
            let close = if options.graceful {
                self.worker.close(&endpoint, &worker_sid).await
            } else {
                self.worker.kill(&endpoint, &worker_sid).await
            };
            if let Err(e) = close {
                tracing::warn!(session_id, error = %e, "worker close failed");
            }
        }
        if let Some(instance_id) = &session.instance_id {
            self.adjust_active_tasks(instance_id, -1);
        }

        if !options.graceful {
            // Jump through terminating so the edge stays legal.
            self.transition(session_id, SessionState::Terminating)?;
        }
        self.transition(session_id, SessionState::Terminated)?;
        self.trees.evict(session_id);
        self.locks.remove(session_id);
        Ok(())
    }

    // ── Restore ────────────────────────────────────────────────────

    /// Rebuild a session from a checkpoint.  Agent id and config are
    /// re-hydrated from the stored snapshot unless overridden.
    pub async fn restore(
        &self,
        checkpoint_id: &str,
        options: RestoreOptions,
    ) -> Result<Session> {
        let checkpoint = self
            .synchronizer
            .load_checkpoint(checkpoint_id)
            .await?
            .ok_or_else(|| Error::not_found("checkpoint", checkpoint_id))?;

        let mut session = Session::from_snapshot(&checkpoint.state)?;
        if let Some(config) = options.config_override {
            session.agent_id = config.agent_id.clone();
            session.config = config;
        }
        let session_id = session.id.clone();

        // Recorded instance when possible, otherwise re-route.
        let target = session
            .instance_id
            .as_deref()
            .and_then(|id| self.registry.get_instance(id))
            .filter(|i| i.health.is_routable());
        let target = match target {
            Some(instance) => instance,
            None => {
                self.router
                    .route(&self.routing_request(&session_id, &session.config), None)
                    .map_err(|e| Error::NoInstanceAvailable(e.to_string()))?
                    .instance
            }
        };

        let worker_sid = self
            .worker
            .restore(&endpoint_of(&target), &checkpoint.state)
            .await
            .map_err(|e| Error::SessionInitFailed(e.to_string()))?;

        session.instance_id = Some(target.id.clone());
        session.worker_session_id = Some(worker_sid);
        session.state = SessionState::Active;
        session.cadence_enabled = true;
        self.adjust_active_tasks(&target.id, 1);

        if let Ok(Some(tree)) = self.trees.load_tree(&session_id).await {
            session.root_node_id = Some(tree.root_id.clone());
            session.current_node_id = Some(tree.current_node_id.clone());
        }

        self.sessions
            .write()
            .insert(session_id.clone(), session.clone());
        self.checkpoints
            .write()
            .entry(session_id)
            .or_default()
            .insert(0, checkpoint.id);
        Ok(session)
    }

    // ── Migration ──────────────────────────────────────────────────

    /// Move a session to `target_instance_id` with verification; on verify
    /// failure, roll back to the source instance.  The checkpoint cadence
    /// stays off unless the migration (or rollback) fully succeeds.
    pub async fn migrate(&self, session_id: &str, target_instance_id: &str) -> Result<()> {
        let _permit = self.locks.acquire(session_id).await;

        let session = self.require(session_id)?;
        let source_instance = self.instance_for(&session)?;
        let target = self
            .registry
            .get_instance(target_instance_id)
            .ok_or_else(|| Error::not_found("instance", target_instance_id))?;
        if !target.health.is_routable() {
            return Err(Error::constraint(
                "TARGET_UNHEALTHY",
                format!("instance '{target_instance_id}' is {}", target.health),
            ));
        }

        // Pre-migration checkpoint must land before anything moves.
        self.checkpoint_locked(session_id, CheckpointTrigger::PreMigration)
            .await?;
        self.with_session(session_id, |s| s.cadence_enabled = false)?;

        // Move through the legal path: active -> paused -> resuming.
        self.transition(session_id, SessionState::Paused)?;
        self.transition(session_id, SessionState::Resuming)?;

        let snapshot = self.require(session_id)?.to_snapshot()?;
        self.with_session(session_id, |s| {
            s.instance_id = Some(target.id.clone());
        })?;

        let restored = self
            .worker
            .restore(&endpoint_of(&target), &snapshot)
            .await;
        let verified = match &restored {
            Ok(worker_sid) => self
                .worker
                .verify(&endpoint_of(&target), worker_sid, &snapshot)
                .await
                .unwrap_or(false),
            Err(_) => false,
        };

        if !verified {
            // Roll back: source instance id first, then a best-effort
            // restore on the source worker.
            self.with_session(session_id, |s| {
                s.instance_id = Some(source_instance.id.clone());
            })?;
            let rolled_back = match self
                .worker
                .restore(&endpoint_of(&source_instance), &snapshot)
                .await
            {
                Ok(worker_sid) => {
                    self.with_session(session_id, |s| {
                        s.worker_session_id = Some(worker_sid);
                    })?;
                    let _ = self.transition(session_id, SessionState::Active);
                    true
                }
                Err(e) => {
                    tracing::error!(session_id, error = %e, "rollback restore failed");
                    false
                }
            };

            let message = match restored {
                Ok(_) => "verification reported a state mismatch".to_owned(),
                Err(e) => e.to_string(),
            };
            TraceEvent::SessionMigrated {
                session_id: session_id.to_owned(),
                from_instance: source_instance.id.clone(),
                to_instance: target.id.clone(),
                rolled_back,
            }
            .emit();
            return Err(Error::MigrationFailed {
                session_id: session_id.to_owned(),
                rolled_back,
                message,
            });
        }

        let worker_sid = restored.expect("verified implies restored");
        self.with_session(session_id, |s| {
            s.worker_session_id = Some(worker_sid);
            s.cadence_enabled = true;
        })?;
        self.adjust_active_tasks(&source_instance.id, -1);
        self.adjust_active_tasks(&target.id, 1);
        self.transition(session_id, SessionState::Active)?;

        TraceEvent::SessionMigrated {
            session_id: session_id.to_owned(),
            from_instance: source_instance.id.clone(),
            to_instance: target.id.clone(),
            rolled_back: false,
        }
        .emit();
        self.emit(SessionEvent::Migrated {
            session_id: session_id.to_owned(),
            from_instance: source_instance.id,
            to_instance: target.id,
        });
        Ok(())
    }

    // ── Auto-checkpoint supervisor ─────────────────────────────────

    /// Start the cadence supervisor: every tick, sessions that are active
    /// with the cadence enabled and a message count on the configured
    /// interval get an auto checkpoint (subject to the 5 s throttle).
    pub fn start_cadence(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let tick = Duration::from_millis(self.config.cadence.tick_ms);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                manager.run_cadence_pass().await;
            }
        });
        if let Some(old) = self.cadence_task.lock().replace(handle) {
            old.abort();
        }
    }

    pub fn stop_cadence(&self) {
        if let Some(handle) = self.cadence_task.lock().take() {
            handle.abort();
        }
    }

    pub async fn run_cadence_pass(&self) {
        let due: Vec<String> = self
            .sessions
            .read()
            .values()
            .filter(|s| {
                s.state == SessionState::Active
                    && s.cadence_enabled
                    && s.config.persistence.auto_checkpoint
                    && s.message_count > 0
                    && s.message_count % s.config.persistence.checkpoint_interval == 0
            })
            .map(|s| s.id.clone())
            .collect();

        for session_id in due {
            match self.checkpoint(&session_id, CheckpointTrigger::Auto).await {
                Ok(Some(checkpoint)) => {
                    tracing::debug!(session_id, checkpoint_id = %checkpoint.id, "auto checkpoint");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "auto checkpoint failed");
                }
            }
        }
    }

    pub fn dispose(&self) {
        self.stop_cadence();
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.cadence_task.get_mut().take() {
            handle.abort();
        }
    }
}

fn endpoint_of(instance: &Instance) -> WorkerEndpoint {
    WorkerEndpoint {
        instance_id: instance.id.clone(),
        url: instance.endpoint.clone(),
    }
}
