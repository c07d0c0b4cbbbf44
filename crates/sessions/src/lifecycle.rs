//! The session state machine.
//!
//! ```text
//! creating    -> { active, failed }
//! active      -> { paused, terminating, failed }
//! paused      -> { resuming, terminating, failed }
//! resuming    -> { active, failed }
//! terminating -> { terminated, failed }
//! terminated, failed : terminal
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Creating,
    Active,
    Paused,
    Resuming,
    Terminating,
    Terminated,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated | SessionState::Failed)
    }

    /// Whether the edge `self -> to` is legal.
    pub fn can_transition_to(&self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Creating, Active | Failed)
                | (Active, Paused | Terminating | Failed)
                | (Paused, Resuming | Terminating | Failed)
                | (Resuming, Active | Failed)
                | (Terminating, Terminated | Failed)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Resuming => "resuming",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SessionState {
    type Err = pi_domain::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(Self::Creating),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "resuming" => Ok(Self::Resuming),
            "terminating" => Ok(Self::Terminating),
            "terminated" => Ok(Self::Terminated),
            "failed" => Ok(Self::Failed),
            other => Err(pi_domain::Error::InvalidRequest(format!(
                "unknown session state '{other}'"
            ))),
        }
    }
}
