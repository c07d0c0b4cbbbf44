//! File tools — read/write/edit constrained to the session worktree.
//!
//! Every path goes through [`resolve_in_worktree`]; writes are atomic
//! (tmp sibling, then rename).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::types::{ToolContext, ToolDefinition, ToolHandler};
use crate::worktree::resolve_in_worktree;

fn worktree_path(ctx: &ToolContext, requested: &str) -> Result<PathBuf, String> {
    let root = ctx
        .worktree_root
        .as_ref()
        .ok_or_else(|| "no worktree configured for this session".to_owned())?;
    resolve_in_worktree(root, requested)
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("cannot create parent of '{}': {e}", path.display()))?;
    }
    let tmp = path.with_extension("pi-tmp");
    let mut file = fs::File::create(&tmp)
        .await
        .map_err(|e| format!("cannot create '{}': {e}", tmp.display()))?;
    file.write_all(contents.as_bytes())
        .await
        .map_err(|e| format!("write failed: {e}"))?;
    file.sync_all().await.map_err(|e| format!("sync failed: {e}"))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| format!("rename failed: {e}"))?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ReadArgs {
    path: String,
    /// Line number to start from (0-indexed).
    #[serde(default)]
    offset: Option<usize>,
    /// Maximum number of lines to return.
    #[serde(default)]
    limit: Option<usize>,
}

pub struct ReadTool;

#[async_trait::async_trait]
impl ToolHandler for ReadTool {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, String> {
        let args: ReadArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let path = worktree_path(ctx, &args.path)?;

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| format!("failed to read '{}': {e}", args.path))?;

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        let offset = args.offset.unwrap_or(0);
        let limit = args.limit.unwrap_or(total_lines.saturating_sub(offset));
        let selected: Vec<&str> = lines.into_iter().skip(offset).take(limit).collect();

        Ok(json!({
            "path": args.path,
            "content": selected.join("\n"),
            "total_lines": total_lines,
            "offset": offset,
            "lines_returned": selected.len(),
        }))
    }
}

pub fn read_definition() -> ToolDefinition {
    ToolDefinition::new(
        "read",
        "Read a file from the session worktree",
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Worktree-relative path" },
                "offset": { "type": "integer" },
                "limit": { "type": "integer" }
            },
            "required": ["path"]
        }),
        Arc::new(ReadTool),
    )
    .with_tags(vec!["fs".into()])
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

pub struct WriteTool;

#[async_trait::async_trait]
impl ToolHandler for WriteTool {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, String> {
        let args: WriteArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let path = worktree_path(ctx, &args.path)?;
        write_atomic(&path, &args.content).await?;
        Ok(json!({
            "path": args.path,
            "bytes_written": args.content.len(),
        }))
    }
}

pub fn write_definition() -> ToolDefinition {
    ToolDefinition::new(
        "write",
        "Create or overwrite a file in the session worktree",
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        }),
        Arc::new(WriteTool),
    )
    .with_tags(vec!["fs".into()])
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// edit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct EditArgs {
    path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

pub struct EditTool;

#[async_trait::async_trait]
impl ToolHandler for EditTool {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, String> {
        let args: EditArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let path = worktree_path(ctx, &args.path)?;

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| format!("failed to read '{}': {e}", args.path))?;

        let occurrences = content.matches(&args.old_string).count();
        if occurrences == 0 {
            return Err(format!("old_string not found in '{}'", args.path));
        }
        if occurrences > 1 && !args.replace_all {
            return Err(format!(
                "old_string appears {occurrences} times in '{}'; pass replace_all to replace every occurrence",
                args.path
            ));
        }

        let replaced = if args.replace_all {
            content.replace(&args.old_string, &args.new_string)
        } else {
            content.replacen(&args.old_string, &args.new_string, 1)
        };
        write_atomic(&path, &replaced).await?;

        Ok(json!({
            "path": args.path,
            "replacements": if args.replace_all { occurrences } else { 1 },
        }))
    }
}

pub fn edit_definition() -> ToolDefinition {
    ToolDefinition::new(
        "edit",
        "Replace an exact string in a worktree file",
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "old_string": { "type": "string" },
                "new_string": { "type": "string" },
                "replace_all": { "type": "boolean" }
            },
            "required": ["path", "old_string", "new_string"]
        }),
        Arc::new(EditTool),
    )
    .with_tags(vec!["fs".into()])
}
