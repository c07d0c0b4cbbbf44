//! Session lifecycle management.
//!
//! The session manager drives the create/pause/resume/migrate/terminate
//! state machine, serializes per-session work, keeps the checkpoint cadence,
//! and orchestrates worker calls, tool interception, and tree updates.

mod events;
mod lifecycle;
mod lock;
mod manager;
mod session;

pub use events::SessionEvent;
pub use lifecycle::SessionState;
pub use lock::SessionLockMap;
pub use manager::{RestoreOptions, SendOutcome, SessionManager, TerminateOptions};
pub use session::{Session, SessionConfig, SessionInfo, ToolCallState};
