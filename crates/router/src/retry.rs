//! Error classification and retry backoff.
//!
//! Classification drives both the fallback walk (auth and request errors
//! abort immediately) and backoff timing.  A `None` delay means the error
//! must not be retried.

use std::time::Duration;

use pi_domain::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    RateLimit,
    Auth,
    InvalidRequest,
    ContextLength,
    Fatal,
    Unknown,
}

/// Classify a typed error, falling back to message inspection for errors
/// relayed from workers and providers as bare strings.
pub fn classify_error(err: &Error) -> ErrorCategory {
    match err {
        Error::Transient(_) | Error::Timeout { .. } | Error::Io(_) => ErrorCategory::Transient,
        Error::RateLimited { .. } => ErrorCategory::RateLimit,
        Error::Auth(_) => ErrorCategory::Auth,
        Error::InvalidRequest(_) => ErrorCategory::InvalidRequest,
        Error::ContextLength(_) => ErrorCategory::ContextLength,
        Error::Fatal(_) => ErrorCategory::Fatal,
        Error::Worker(message) | Error::Other(message) => classify_message(message),
        _ => ErrorCategory::Unknown,
    }
}

/// Substring classification for untyped provider/worker error text.
pub fn classify_message(message: &str) -> ErrorCategory {
    let text = message.to_lowercase();

    const TRANSIENT: &[&str] = &[
        "timeout",
        "timed out",
        "econnreset",
        "econnrefused",
        "connection reset",
        "connection refused",
        "socket hang up",
        "http 500",
        "http 502",
        "http 503",
        "http 504",
        "http 529",
        "service unavailable",
        "overloaded",
    ];
    const RATE_LIMIT: &[&str] = &["rate limit", "rate_limit", "429", "too many requests", "quota exceeded"];
    const AUTH: &[&str] = &[
        "401",
        "403",
        "unauthorized",
        "forbidden",
        "invalid api key",
        "authentication",
        "permission denied",
    ];
    const INVALID: &[&str] = &["400", "invalid request", "bad request", "validation failed", "malformed"];
    const CONTEXT: &[&str] = &[
        "context length",
        "context_length",
        "maximum context",
        "context window",
        "prompt is too long",
        "token limit",
    ];
    const FATAL: &[&str] = &["fatal", "panic", "unrecoverable"];

    // Context-length before invalid-request: providers report it as a 400.
    if CONTEXT.iter().any(|s| text.contains(s)) {
        return ErrorCategory::ContextLength;
    }
    if RATE_LIMIT.iter().any(|s| text.contains(s)) {
        return ErrorCategory::RateLimit;
    }
    if AUTH.iter().any(|s| text.contains(s)) {
        return ErrorCategory::Auth;
    }
    if INVALID.iter().any(|s| text.contains(s)) {
        return ErrorCategory::InvalidRequest;
    }
    if TRANSIENT.iter().any(|s| text.contains(s)) {
        return ErrorCategory::Transient;
    }
    if FATAL.iter().any(|s| text.contains(s)) {
        return ErrorCategory::Fatal;
    }
    ErrorCategory::Unknown
}

/// Backoff before retry `attempt` (1-based).  `None` = do not retry.
///
/// - transient: `min(1000 * 2^(attempt-1), 30000)` ms
/// - rate-limit: server `retry_after` hint when present, else
///   `min(5000 * 2^(attempt-1), 60000)` ms
/// - auth / invalid-request / fatal / context-length: never
/// - unknown: 1000 ms on the first attempt only
pub fn retry_delay(
    category: ErrorCategory,
    attempt: u32,
    retry_after_secs: Option<u64>,
) -> Option<Duration> {
    let attempt = attempt.max(1);
    match category {
        ErrorCategory::Transient => {
            let ms = 1_000u64
                .saturating_mul(1 << (attempt - 1).min(15))
                .min(30_000);
            Some(Duration::from_millis(ms))
        }
        ErrorCategory::RateLimit => {
            if let Some(secs) = retry_after_secs {
                return Some(Duration::from_secs(secs));
            }
            let ms = 5_000u64
                .saturating_mul(1 << (attempt - 1).min(15))
                .min(60_000);
            Some(Duration::from_millis(ms))
        }
        ErrorCategory::Auth
        | ErrorCategory::InvalidRequest
        | ErrorCategory::Fatal
        | ErrorCategory::ContextLength => None,
        ErrorCategory::Unknown => {
            if attempt <= 1 {
                Some(Duration::from_millis(1_000))
            } else {
                None
            }
        }
    }
}
