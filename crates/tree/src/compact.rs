//! History compaction — collapses the older half of the active conversation
//! path into short summaries so the context window stays healthy after many
//! turns.  Compacted nodes keep their structure; only their contribution to
//! materialized context shrinks.

use serde::Serialize;

use pi_domain::trace::TraceEvent;
use pi_domain::message::Role;
use pi_domain::Result;

use crate::node::ConversationTree;

/// How much of a compacted node's content survives as its summary.
const SUMMARY_PREVIEW_CHARS: usize = 120;

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompactionReport {
    pub nodes_compacted: usize,
    pub tokens_saved: u64,
    pub total_tokens_before: u64,
    pub total_tokens_after: u64,
}

/// Compact the first half of the root-to-current path when the tree has
/// grown past `threshold` tokens.
///
/// Skipped nodes: an empty root, system messages, the final two nodes of
/// the path, and anything already compacted.  Returns a zero-work report
/// when under the threshold.
pub fn compact_history(tree: &mut ConversationTree, threshold: u64) -> Result<CompactionReport> {
    let before = tree.metadata.total_tokens;
    if before < threshold {
        return Ok(CompactionReport {
            total_tokens_before: before,
            total_tokens_after: before,
            ..Default::default()
        });
    }

    let path: Vec<String> = tree
        .path_to_root(&tree.current_node_id.clone())?
        .into_iter()
        .map(|n| n.id.clone())
        .collect();
    let half = path.len() / 2;
    let tail_guard = path.len().saturating_sub(2);

    let mut compacted = 0usize;
    let mut saved = 0u64;
    for (idx, id) in path.iter().enumerate() {
        if idx >= half || idx >= tail_guard {
            break;
        }
        let node = match tree.nodes.get_mut(id) {
            Some(n) => n,
            None => continue,
        };
        if node.compacted || node.role == Role::System {
            continue;
        }
        if node.parent_id.is_none() && node.content.is_empty() {
            continue;
        }

        node.compacted = true;
        node.summary = Some(preview(&node.content));
        saved += node.token_count;
        compacted += 1;
    }

    tree.metadata.total_tokens -= saved;
    if compacted > 0 {
        tree.metadata.compaction_count += 1;
        tree.metadata.version += 1;
        tree.metadata.updated_at = chrono::Utc::now();
        TraceEvent::TreeCompacted {
            session_id: tree.session_id.clone(),
            nodes_compacted: compacted,
            tokens_saved: saved,
        }
        .emit();
    }

    Ok(CompactionReport {
        nodes_compacted: compacted,
        tokens_saved: saved,
        total_tokens_before: before,
        total_tokens_after: tree.metadata.total_tokens,
    })
}

fn preview(content: &str) -> String {
    if content.chars().count() <= SUMMARY_PREVIEW_CHARS {
        return content.to_owned();
    }
    let cut: String = content.chars().take(SUMMARY_PREVIEW_CHARS).collect();
    format!("{cut}…")
}
