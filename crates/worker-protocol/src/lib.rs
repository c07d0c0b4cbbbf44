//! Worker protocol: the message-level contract between the control plane and
//! Pi worker processes.
//!
//! The framing (transport, auth, reconnect) lives outside the core; this
//! crate defines the request/response/notification surface and the
//! [`WorkerClient`] seam the session manager drives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pi_domain::message::{ToolCall, ToolResultPayload, ToolSpec};
use pi_domain::stream::{BoxStream, TokenUsage};
use pi_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A caller-addressed request envelope.  The worker echoes `id` in its
/// response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    #[serde(flatten)]
    pub body: RequestBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum RequestBody {
    #[serde(rename = "session.init")]
    SessionInit(InitRequest),

    #[serde(rename = "session.close")]
    SessionClose {},

    #[serde(rename = "session.kill")]
    SessionKill {},

    #[serde(rename = "session.send")]
    SessionSend(SendRequest),

    #[serde(rename = "session.send_stream")]
    SessionSendStream(SendRequest),

    #[serde(rename = "session.submit_tool_result")]
    SubmitToolResult {
        tool_call_id: String,
        result: Value,
    },

    #[serde(rename = "session.status")]
    SessionStatus {},

    #[serde(rename = "session.switch_model")]
    SwitchModel { model: String },

    #[serde(rename = "session.switch_provider")]
    SwitchProvider { provider: String },

    #[serde(rename = "tree.get")]
    TreeGet {},

    #[serde(rename = "tree.branch")]
    TreeBranch { from_node_id: String, name: String },

    #[serde(rename = "tree.switch_branch")]
    TreeSwitchBranch { branch_id: String },

    #[serde(rename = "tree.fork")]
    TreeFork { from_node_id: String },

    #[serde(rename = "tree.compact")]
    TreeCompact { threshold: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitRequest {
    pub provider: String,
    pub model: String,
    pub tools: Vec<ToolSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit_context: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResultPayload>>,
    /// Ask the worker to cut its own checkpoint after this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<bool>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitResult {
    pub session_id: String,
    pub provider: String,
    pub model: String,
    pub tools: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub message_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub session_id: String,
    pub state: String,
    pub provider: String,
    pub model: String,
    pub message_count: u64,
    pub token_usage: TokenUsage,
    pub last_activity_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server-initiated messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One chunk of a `session.send_stream` response.
///
/// The stream is lazy, finite, and non-restartable: it ends with exactly one
/// `done` or `error` chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Content {
        text: String,
    },
    ToolCall {
        tool_call: ToolCall,
    },
    ToolResult {
        result: ToolResultPayload,
    },
    Error {
        message: String,
    },
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checkpoint_ref: Option<String>,
    },
}

impl StreamChunk {
    /// Whether this chunk terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Done { .. } | StreamChunk::Error { .. })
    }
}

/// Messages a worker pushes without a pending request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Notification {
        #[serde(flatten)]
        event: NotificationEvent,
    },
    Stream {
        #[serde(rename = "requestId")]
        request_id: String,
        chunk: StreamChunk,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum NotificationEvent {
    StatusChange { state: String },
    ModelChange { model: String, previous: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a worker lives, as the session manager sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEndpoint {
    pub instance_id: String,
    pub url: String,
}

/// The operations the session manager drives against a worker.
///
/// `restore` and `verify` ride on the init/send/status wire operations;
/// they are first-class here so migration logic stays transport-agnostic.
#[async_trait::async_trait]
pub trait WorkerClient: Send + Sync {
    async fn init(&self, endpoint: &WorkerEndpoint, req: InitRequest) -> Result<InitResult>;

    async fn close(&self, endpoint: &WorkerEndpoint, worker_session_id: &str) -> Result<()>;

    async fn kill(&self, endpoint: &WorkerEndpoint, worker_session_id: &str) -> Result<()>;

    async fn send(
        &self,
        endpoint: &WorkerEndpoint,
        worker_session_id: &str,
        req: SendRequest,
    ) -> Result<SendResult>;

    async fn send_stream(
        &self,
        endpoint: &WorkerEndpoint,
        worker_session_id: &str,
        req: SendRequest,
    ) -> Result<BoxStream<'static, StreamChunk>>;

    async fn submit_tool_result(
        &self,
        endpoint: &WorkerEndpoint,
        worker_session_id: &str,
        tool_call_id: &str,
        result: Value,
    ) -> Result<()>;

    async fn status(
        &self,
        endpoint: &WorkerEndpoint,
        worker_session_id: &str,
    ) -> Result<StatusResult>;

    async fn switch_model(
        &self,
        endpoint: &WorkerEndpoint,
        worker_session_id: &str,
        model: &str,
    ) -> Result<()>;

    async fn switch_provider(
        &self,
        endpoint: &WorkerEndpoint,
        worker_session_id: &str,
        provider: &str,
    ) -> Result<()>;

    /// Reinstate a serialized session on a (possibly different) worker.
    /// Returns the worker-side session id of the restored session.
    async fn restore(&self, endpoint: &WorkerEndpoint, state: &Value) -> Result<String>;

    /// Worker-side round trip confirming the restored state matches.
    async fn verify(
        &self,
        endpoint: &WorkerEndpoint,
        worker_session_id: &str,
        state: &Value,
    ) -> Result<bool>;

    /// Cheap liveness probe used by the registry's health monitor.
    async fn health_check(&self, endpoint: &WorkerEndpoint) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_carries_method_and_id() {
        let req = RpcRequest {
            id: "req-1".into(),
            body: RequestBody::SessionSend(SendRequest {
                content: "hello".into(),
                tool_results: None,
                checkpoint: Some(true),
            }),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["id"], "req-1");
        assert_eq!(json["method"], "session.send");
        assert_eq!(json["params"]["content"], "hello");
        assert_eq!(json["params"]["checkpoint"], true);
    }

    #[test]
    fn tree_requests_use_dotted_methods() {
        let req = RpcRequest {
            id: "req-2".into(),
            body: RequestBody::TreeBranch {
                from_node_id: "n1".into(),
                name: "alt".into(),
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["method"], "tree.branch");
        assert_eq!(json["params"]["from_node_id"], "n1");
    }

    #[test]
    fn stream_chunks_are_tagged_and_terminal_detection_works() {
        let done = StreamChunk::Done {
            usage: None,
            checkpoint_ref: Some("cp-1".into()),
        };
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["type"], "done");
        assert!(done.is_terminal());
        assert!(StreamChunk::Error { message: "x".into() }.is_terminal());
        assert!(!StreamChunk::Content { text: "t".into() }.is_terminal());
    }

    #[test]
    fn notification_envelope_shape() {
        let msg = ServerMessage::Notification {
            event: NotificationEvent::ModelChange {
                model: "gpt-4o".into(),
                previous: "gpt-4o-mini".into(),
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "notification");
        assert_eq!(json["event"], "model_change");
        assert_eq!(json["data"]["previous"], "gpt-4o-mini");
    }

    #[test]
    fn stream_envelope_uses_request_id() {
        let msg = ServerMessage::Stream {
            request_id: "req-9".into(),
            chunk: StreamChunk::Content { text: "hi".into() },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "stream");
        assert_eq!(json["requestId"], "req-9");
        assert_eq!(json["chunk"]["type"], "content");
    }
}
