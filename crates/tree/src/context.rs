//! Context materialization — turns a root-to-node path into the message
//! list a worker call expects, under a token budget.
//!
//! The budget keeps the most recent suffix of the path: older messages fall
//! off first.  Compacted nodes contribute their summary instead of their
//! original content.

use pi_domain::message::{ContextMessage, Role};
use pi_domain::Result;

use crate::node::{ConversationTree, TreeNode};

/// Materialize messages for the path ending at `node_id`.
///
/// Returns the longest suffix of the root-to-node path whose combined token
/// size fits `max_tokens`, in conversation order.  Assistant nodes carry
/// their tool-call list; tool nodes expand to one message per tool result
/// so each carries its correlation id.
pub fn messages_for_context(
    tree: &ConversationTree,
    node_id: &str,
    max_tokens: u64,
) -> Result<Vec<ContextMessage>> {
    let path = tree.path_to_root(node_id)?;

    // Walk from the tail backwards, keeping whole nodes while they fit.
    let mut included = 0u64;
    let mut keep_from = path.len();
    for (idx, node) in path.iter().enumerate().rev() {
        let cost = node.context_tokens();
        if included + cost > max_tokens {
            break;
        }
        included += cost;
        keep_from = idx;
    }

    let mut messages = Vec::new();
    for node in &path[keep_from..] {
        render(node, &mut messages);
    }
    Ok(messages)
}

fn render(node: &TreeNode, out: &mut Vec<ContextMessage>) {
    let content = if node.compacted {
        node.summary.clone().unwrap_or_default()
    } else {
        node.content.clone()
    };

    match node.role {
        Role::Assistant => {
            if let Some(calls) = &node.tool_calls {
                out.push(ContextMessage::assistant_with_tools(content, calls.clone()));
            } else {
                out.push(ContextMessage::text(Role::Assistant, content));
            }
        }
        Role::Tool => {
            if let Some(results) = &node.tool_results {
                for result in results {
                    out.push(ContextMessage {
                        role: Role::Tool,
                        content: serde_json::to_string(&result.content).unwrap_or_default(),
                        tool_calls: None,
                        tool_call_id: Some(result.tool_call_id.clone()),
                    });
                }
            } else {
                out.push(ContextMessage::tool_result("", content));
            }
        }
        role => out.push(ContextMessage::text(role, content)),
    }
}
