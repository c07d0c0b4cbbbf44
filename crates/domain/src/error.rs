/// Shared error type used across all Pi control-plane crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid session transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("no candidate: {0}")]
    NoCandidate(String),

    #[error("no instance available: {0}")]
    NoInstanceAvailable(String),

    #[error("session init failed: {0}")]
    SessionInitFailed(String),

    #[error("{code}: {message}")]
    Constraint { code: &'static str, message: String },

    #[error("transient: {0}")]
    Transient(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-provided retry hint, in seconds.
        retry_after_secs: Option<u64>,
    },

    #[error("auth: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("context length exceeded: {0}")]
    ContextLength(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("storage degraded ({tier}): {message}")]
    StorageDegraded { tier: &'static str, message: String },

    #[error("storage unavailable (cache: {cache}; durable: {durable})")]
    StorageUnavailable { cache: String, durable: String },

    #[error("migration of session {session_id} failed (rolled_back={rolled_back}): {message}")]
    MigrationFailed {
        session_id: String,
        rolled_back: bool,
        message: String,
    },

    #[error("timeout after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("worker: {0}")]
    Worker(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code for the error kind.  Codes never change
    /// once shipped; callers may match on them.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "SERIALIZATION_ERROR",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::InvalidTransition { .. } => "INVALID_TRANSITION",
            Error::NoCandidate(_) => "NO_CANDIDATE",
            Error::NoInstanceAvailable(_) => "NO_INSTANCE_AVAILABLE",
            Error::SessionInitFailed(_) => "SESSION_INIT_FAILED",
            Error::Constraint { code, .. } => code,
            Error::Transient(_) => "TRANSIENT",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::Auth(_) => "AUTH_FAILED",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::ContextLength(_) => "CONTEXT_LENGTH_EXCEEDED",
            Error::Fatal(_) => "FATAL",
            Error::StorageDegraded { .. } => "STORAGE_DEGRADED",
            Error::StorageUnavailable { .. } => "STORAGE_UNAVAILABLE",
            Error::MigrationFailed { .. } => "MIGRATION_FAILED",
            Error::Timeout { .. } => "TIMEOUT",
            Error::Discovery(_) => "DISCOVERY_FAILED",
            Error::Worker(_) => "WORKER_ERROR",
            Error::PolicyDenied(_) => "POLICY_DENIED",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Other(_) => "UNKNOWN",
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn constraint(code: &'static str, message: impl Into<String>) -> Self {
        Error::Constraint {
            code,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::not_found("instance", "i-1").code(), "NOT_FOUND");
        assert_eq!(
            Error::constraint("COST_LIMIT_EXCEEDED", "too expensive").code(),
            "COST_LIMIT_EXCEEDED"
        );
        assert_eq!(Error::NoInstanceAvailable("x".into()).code(), "NO_INSTANCE_AVAILABLE");
        assert_eq!(
            Error::Timeout {
                operation: "health".into(),
                elapsed_ms: 5000
            }
            .code(),
            "TIMEOUT"
        );
    }

    #[test]
    fn display_includes_context() {
        let err = Error::MigrationFailed {
            session_id: "s-1".into(),
            rolled_back: true,
            message: "verify mismatch".into(),
        };
        let text = format!("{err}");
        assert!(text.contains("s-1"));
        assert!(text.contains("verify mismatch"));
    }
}
