//! Audit logging for intercepted tool calls.
//!
//! Every intercept emits exactly one `started` entry followed by exactly
//! one of `completed`, `failed`, or `blocked`.  The default sink keeps a
//! bounded in-memory ring and answers filter queries; production deploys
//! can plug in their own sink.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    Started,
    Completed,
    Failed,
    Blocked,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub event: AuditEventKind,
    pub tool_name: String,
    pub session_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Arguments, with secret-looking keys redacted.
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub session_id: Option<String>,
    pub tool_name: Option<String>,
    pub event: Option<AuditEventKind>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
    fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry>;
}

/// Replace values under secret-looking keys before they reach the log.
pub fn redact_args(args: &Value) -> Value {
    const SENSITIVE: &[&str] = &["secret", "token", "password", "api_key", "apikey", "credential"];
    match args {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                let lower = key.to_lowercase();
                if SENSITIVE.iter().any(|s| lower.contains(s)) {
                    out.insert(key.clone(), Value::String("[redacted]".into()));
                } else {
                    out.insert(key.clone(), redact_args(value));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_args).collect()),
        other => other.clone(),
    }
}

/// Bounded in-memory ring, newest entries at the back.
pub struct MemoryAuditSink {
    capacity: usize,
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        let mut entries = self.entries.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        let mut hits: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| {
                filter
                    .session_id
                    .as_ref()
                    .map(|s| &e.session_id == s)
                    .unwrap_or(true)
            })
            .filter(|e| {
                filter
                    .tool_name
                    .as_ref()
                    .map(|t| &e.tool_name == t)
                    .unwrap_or(true)
            })
            .filter(|e| filter.event.map(|k| e.event == k).unwrap_or(true))
            .filter(|e| filter.since.map(|s| e.timestamp >= s).unwrap_or(true))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            let start = hits.len().saturating_sub(limit);
            hits.drain(..start);
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(event: AuditEventKind, tool: &str, session: &str) -> AuditEntry {
        AuditEntry {
            event,
            tool_name: tool.into(),
            session_id: session.into(),
            agent_id: "agent".into(),
            tenant_id: None,
            args: json!({}),
            result: None,
            error: None,
            blocking_policy: None,
            execution_time_ms: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn ring_is_bounded() {
        let sink = MemoryAuditSink::new(3);
        for i in 0..5 {
            sink.record(entry(AuditEventKind::Started, &format!("t{i}"), "s"));
        }
        assert_eq!(sink.len(), 3);
        let all = sink.query(&AuditFilter::default());
        assert_eq!(all[0].tool_name, "t2", "oldest entries fall off the front");
    }

    #[test]
    fn query_filters_compose() {
        let sink = MemoryAuditSink::new(100);
        sink.record(entry(AuditEventKind::Started, "bash", "s1"));
        sink.record(entry(AuditEventKind::Completed, "bash", "s1"));
        sink.record(entry(AuditEventKind::Started, "read", "s2"));

        let hits = sink.query(&AuditFilter {
            session_id: Some("s1".into()),
            event: Some(AuditEventKind::Completed),
            ..Default::default()
        });
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].tool_name, "bash");
    }

    #[test]
    fn limit_keeps_newest() {
        let sink = MemoryAuditSink::new(100);
        for i in 0..5 {
            sink.record(entry(AuditEventKind::Started, &format!("t{i}"), "s"));
        }
        let hits = sink.query(&AuditFilter {
            limit: Some(2),
            ..Default::default()
        });
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].tool_name, "t4");
    }

    #[test]
    fn redaction_masks_sensitive_keys_recursively() {
        let args = json!({
            "path": "a.txt",
            "api_key": "sk-123",
            "nested": { "Password": "hunter2", "keep": 1 },
            "list": [{ "token": "t" }]
        });
        let redacted = redact_args(&args);
        assert_eq!(redacted["path"], "a.txt");
        assert_eq!(redacted["api_key"], "[redacted]");
        assert_eq!(redacted["nested"]["Password"], "[redacted]");
        assert_eq!(redacted["nested"]["keep"], 1);
        assert_eq!(redacted["list"][0]["token"], "[redacted]");
    }
}
