//! Built-in tools: file I/O under worktree containment, shell execution
//! with a denylist, session todos, and tree navigation.

mod bash;
mod fs;
mod navigate;
mod todo;

pub use bash::BashTool;
pub use fs::{EditTool, ReadTool, WriteTool};
pub use navigate::TreeNavigateTool;
pub use todo::TodoWriteTool;

use std::sync::Arc;
use std::time::Duration;

use pi_domain::config::ToolsConfig;
use pi_tree::TreeManager;

use crate::types::{TodoStore, ToolDefinition};

/// Construct the standard tool set.
pub fn builtin_tools(
    config: &ToolsConfig,
    todos: Arc<TodoStore>,
    trees: Option<Arc<TreeManager>>,
) -> Vec<ToolDefinition> {
    let timeout = Duration::from_millis(config.default_timeout_ms);
    let mut tools = vec![
        fs::read_definition().with_timeout(timeout),
        fs::write_definition().with_timeout(timeout),
        fs::edit_definition().with_timeout(timeout),
        bash::definition(config).with_timeout(timeout),
        todo::definition(todos).with_timeout(timeout),
    ];
    if let Some(trees) = trees {
        tools.push(navigate::definition(trees).with_timeout(timeout));
    }
    tools
}
