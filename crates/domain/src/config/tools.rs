use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Per-call timeout unless the tool overrides it.
    #[serde(default = "d_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Grace window between asking a child process to stop and killing it.
    #[serde(default = "d_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// In-memory audit ring capacity.
    #[serde(default = "d_audit_capacity")]
    pub audit_capacity: usize,

    /// Regexes that block a bash command before it spawns.
    #[serde(default = "d_denied_patterns")]
    pub denied_patterns: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: d_timeout_ms(),
            kill_grace_ms: d_kill_grace_ms(),
            audit_capacity: d_audit_capacity(),
            denied_patterns: d_denied_patterns(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_timeout_ms() -> u64 {
    60_000
}
fn d_kill_grace_ms() -> u64 {
    2_000
}
fn d_audit_capacity() -> usize {
    10_000
}
fn d_denied_patterns() -> Vec<String> {
    vec![
        // Recursive delete at or near the filesystem root.
        r"rm\s+(-[a-zA-Z]*\s+)*(-rf?|-fr?)\s+/(\s|$)".into(),
        r"rm\s+(-[a-zA-Z]*\s+)*(-rf?|-fr?)\s+/\*".into(),
        // Classic fork bomb.
        r":\(\)\s*\{\s*:\|:&\s*\}\s*;\s*:".into(),
        // Piping a remote script straight into a shell.
        r"(curl|wget)\s+[^|]*\|\s*(ba)?sh".into(),
        // Raw writes to block devices.
        r"dd\s+[^|]*of=/dev/(sd|hd|nvme)".into(),
        r">\s*/dev/(sd|hd|nvme)".into(),
        // mkfs on anything.
        r"mkfs\.".into(),
    ]
}
