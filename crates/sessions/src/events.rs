//! The session manager's closed event catalog.

use serde::Serialize;

use crate::lifecycle::SessionState;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        session_id: String,
        before: SessionState,
        after: SessionState,
    },
    Checkpointed {
        session_id: String,
        checkpoint_id: String,
        trigger: String,
    },
    Migrated {
        session_id: String,
        from_instance: String,
        to_instance: String,
    },
    Failed {
        session_id: String,
        code: String,
        message: String,
    },
}
