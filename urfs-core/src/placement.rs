//! Placement of new uploads on storage nodes.
//!
//! Greedy least-loaded by record count: every discovered node starts at zero,
//! each index record adds one to its owner, and the lowest count wins with ties
//! going to the node discovered first. Byte sizes are not considered.

use crate::error::{Result, UrfsError};
use crate::index::FileIndex;
use crate::node::NodeRef;

pub fn select_storage_node(
    index: &FileIndex,
    candidates: &[NodeRef],
    default_node: Option<&NodeRef>,
) -> Result<NodeRef> {
    if index.is_empty() {
        if let Some(default_node) = default_node {
            return Ok(default_node.clone());
        }
    }

    let load = index.load_by_node();
    let mut best: Option<(&NodeRef, usize)> = None;
    for candidate in candidates {
        let count = load.get(&candidate.node_id).copied().unwrap_or(0);
        match best {
            Some((_, best_count)) if best_count <= count => {}
            _ => best = Some((candidate, count)),
        }
    }

    match (best, default_node) {
        (Some((node, count)), _) => {
            tracing::debug!("Placing upload on {} (holds {} files)", node, count);
            Ok(node.clone())
        }
        (None, Some(default_node)) => Ok(default_node.clone()),
        (None, None) => Err(UrfsError::InvalidReference(
            "no storage node available for upload".to_string(),
        )),
    }
}
