//! Session todo tool — the model's own scratchpad of planned work.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::types::{TodoItem, TodoStore, ToolContext, ToolDefinition, ToolHandler};

#[derive(Debug, Deserialize)]
struct TodoWriteArgs {
    todos: Vec<TodoItem>,
}

pub struct TodoWriteTool {
    store: Arc<TodoStore>,
}

impl TodoWriteTool {
    pub fn new(store: Arc<TodoStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ToolHandler for TodoWriteTool {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, String> {
        let args: TodoWriteArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let count = args.todos.len();
        self.store.replace(&ctx.session_id, args.todos);
        Ok(json!({ "written": count }))
    }
}

pub fn definition(store: Arc<TodoStore>) -> ToolDefinition {
    ToolDefinition::new(
        "todo_write",
        "Replace the session's todo list",
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": { "enum": ["pending", "in_progress", "completed"] }
                        },
                        "required": ["id", "content", "status"]
                    }
                }
            },
            "required": ["todos"]
        }),
        Arc::new(TodoWriteTool::new(store)),
    )
    .with_tags(vec!["planning".into()])
}
