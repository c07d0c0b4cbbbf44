//! Shell execution tool.
//!
//! Commands are screened against the configured denylist before spawning.
//! A timed-out child is asked to stop and hard-killed after a short grace;
//! `kill_on_drop` backstops the case where the whole call future is
//! cancelled by the interceptor's outer timeout.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use pi_domain::config::ToolsConfig;

use crate::types::{ToolContext, ToolDefinition, ToolHandler};
use crate::worktree::resolve_in_worktree;

const OUTPUT_CAP_BYTES: usize = 256 * 1024;

#[derive(Debug, Deserialize)]
struct BashArgs {
    command: String,
    /// Override the default command timeout.
    #[serde(default)]
    timeout_ms: Option<u64>,
    /// Worktree-relative working directory.
    #[serde(default)]
    workdir: Option<String>,
}

pub struct BashTool {
    denylist: Vec<regex::Regex>,
    default_timeout: Duration,
    kill_grace: Duration,
}

impl BashTool {
    pub fn new(config: &ToolsConfig) -> Self {
        let denylist = config
            .denied_patterns
            .iter()
            .filter_map(|pattern| match regex::Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "invalid denied pattern, skipping");
                    None
                }
            })
            .collect();
        Self {
            denylist,
            default_timeout: Duration::from_millis(config.default_timeout_ms),
            kill_grace: Duration::from_millis(config.kill_grace_ms),
        }
    }

    fn denied_by(&self, command: &str) -> Option<&regex::Regex> {
        self.denylist.iter().find(|p| p.is_match(command))
    }
}

#[async_trait::async_trait]
impl ToolHandler for BashTool {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, String> {
        let args: BashArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;

        if let Some(pattern) = self.denied_by(&args.command) {
            return Err(format!(
                "command blocked by security policy (pattern '{}')",
                pattern.as_str()
            ));
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&args.command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match (&ctx.worktree_root, &args.workdir) {
            (Some(root), Some(workdir)) => {
                cmd.current_dir(resolve_in_worktree(root, workdir)?);
            }
            (Some(root), None) => {
                cmd.current_dir(root);
            }
            (None, Some(_)) => {
                return Err("workdir given but no worktree configured".into());
            }
            (None, None) => {}
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("failed to spawn command: {e}"))?;
        let mut stdout = child.stdout.take().expect("stdout piped");
        let mut stderr = child.stderr.take().expect("stderr piped");

        let timeout = args
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let status = tokio::select! {
            status = async {
                let _ = tokio::join!(
                    stdout.read_to_end(&mut out_buf),
                    stderr.read_to_end(&mut err_buf),
                );
                child.wait().await
            } => Some(status.map_err(|e| format!("wait failed: {e}"))?),
            _ = tokio::time::sleep(timeout) => None,
        };

        let Some(status) = status else {
            // Ask the child to stop, then make sure it is gone.
            let _ = child.start_kill();
            if tokio::time::timeout(self.kill_grace, child.wait())
                .await
                .is_err()
            {
                let _ = child.kill().await;
            }
            return Err(format!(
                "command timed out after {} ms",
                timeout.as_millis()
            ));
        };

        out_buf.truncate(OUTPUT_CAP_BYTES);
        err_buf.truncate(OUTPUT_CAP_BYTES);
        Ok(json!({
            "exit_code": status.code(),
            "stdout": String::from_utf8_lossy(&out_buf),
            "stderr": String::from_utf8_lossy(&err_buf),
            "timed_out": false,
        }))
    }
}

pub fn definition(config: &ToolsConfig) -> ToolDefinition {
    ToolDefinition::new(
        "bash",
        "Run a shell command inside the session worktree",
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "timeout_ms": { "type": "integer" },
                "workdir": { "type": "string" }
            },
            "required": ["command"]
        }),
        Arc::new(BashTool::new(config)),
    )
    .with_tags(vec!["exec".into()])
}
