//! Tree navigation tool — lets the model inspect and move around its own
//! conversation tree.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use pi_tree::TreeManager;

use crate::types::{ToolContext, ToolDefinition, ToolHandler};

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum NavigateArgs {
    Current,
    ListBranches,
    SwitchBranch { branch_id: String },
    Navigate { node_id: String },
    Search { query: String },
}

pub struct TreeNavigateTool {
    trees: Arc<TreeManager>,
}

impl TreeNavigateTool {
    pub fn new(trees: Arc<TreeManager>) -> Self {
        Self { trees }
    }
}

#[async_trait::async_trait]
impl ToolHandler for TreeNavigateTool {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, String> {
        let args: NavigateArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let session_id = &ctx.session_id;

        match args {
            NavigateArgs::Current => {
                let tree = self
                    .trees
                    .get_tree(session_id)
                    .ok_or_else(|| format!("no tree for session '{session_id}'"))?;
                Ok(json!({
                    "current_node_id": tree.current_node_id,
                    "current_branch_id": tree.current_branch_id,
                    "total_nodes": tree.metadata.total_nodes,
                    "total_tokens": tree.metadata.total_tokens,
                }))
            }
            NavigateArgs::ListBranches => {
                let branches = self
                    .trees
                    .list_branches(session_id)
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "branches": branches }))
            }
            NavigateArgs::SwitchBranch { branch_id } => {
                self.trees
                    .switch_branch(session_id, &branch_id)
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "switched_to": branch_id }))
            }
            NavigateArgs::Navigate { node_id } => {
                self.trees
                    .navigate_to_node(session_id, &node_id)
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "current_node_id": node_id }))
            }
            NavigateArgs::Search { query } => {
                let hits = self
                    .trees
                    .search_nodes(session_id, &query)
                    .map_err(|e| e.to_string())?;
                let results: Vec<Value> = hits
                    .iter()
                    .map(|n| {
                        json!({
                            "node_id": n.id,
                            "role": n.role,
                            "preview": n.content.chars().take(80).collect::<String>(),
                        })
                    })
                    .collect();
                Ok(json!({ "matches": results }))
            }
        }
    }
}

pub fn definition(trees: Arc<TreeManager>) -> ToolDefinition {
    ToolDefinition::new(
        "tree_navigate",
        "Inspect and navigate the session conversation tree",
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "enum": ["current", "list_branches", "switch_branch", "navigate", "search"]
                },
                "branch_id": { "type": "string" },
                "node_id": { "type": "string" },
                "query": { "type": "string" }
            },
            "required": ["action"]
        }),
        Arc::new(TreeNavigateTool::new(trees)),
    )
    .with_tags(vec!["tree".into()])
}
