//! Whole-tree invariant checker.
//!
//! Walks every node of one collection and fails with
//! [`TreeError::Corrupt`] on the first broken invariant. Used by tests and
//! by the workload binary after a run; it reads every node, so it is not
//! meant for hot paths.

use crate::tree::node::{ChildRef, NO_NODE, Node, NodeBody, NodeId};
use crate::tree::ops::Fanout;
use crate::tree::store::NodeStore;
use crate::tree::TreeError;

/// Shape of a verified tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeReport {
    /// Number of levels, `0` for an empty tree.
    pub height: usize,
    pub nodes: usize,
    pub values: u64,
}

fn corrupt(message: String) -> TreeError {
    TreeError::Corrupt(message)
}

fn check_size(node: &Node, fanout: Fanout) -> Result<(), TreeError> {
    let len = node.len();
    let min = match (&node.body, node.is_root()) {
        (NodeBody::Leaf { .. }, true) => 1,
        (NodeBody::Inner { .. }, true) => 2,
        (_, false) => fanout.min_children,
    };
    if len < min || len > fanout.max_children {
        return Err(corrupt(format!(
            "node {} holds {len} entries, allowed {min}..={}",
            node.id, fanout.max_children
        )));
    }
    Ok(())
}

fn check_order(node: &Node) -> Result<(), TreeError> {
    match &node.body {
        NodeBody::Leaf { values } => {
            if let Some(pair) = values.windows(2).find(|w| w[0] >= w[1]) {
                return Err(corrupt(format!(
                    "leaf {} is not strictly increasing at {} then {}",
                    node.id, pair[0], pair[1]
                )));
            }
        }
        NodeBody::Inner { children } => {
            if let Some(child) = children.iter().find(|c| c.min > c.max || c.count == 0) {
                return Err(corrupt(format!(
                    "node {} has a malformed entry for child {}",
                    node.id, child.id
                )));
            }
            if let Some(pair) = children.windows(2).find(|w| w[0].max >= w[1].min) {
                return Err(corrupt(format!(
                    "children {} and {} of node {} overlap or are out of order",
                    pair[0].id, pair[1].id, node.id
                )));
            }
        }
    }
    Ok(())
}

/// Verify the tree reachable from the store's root.
pub fn verify(store: &mut NodeStore<'_>, fanout: Fanout) -> Result<TreeReport, TreeError> {
    let root = store.root()?;
    if root == NO_NODE {
        return Ok(TreeReport::default());
    }

    let mut report = TreeReport::default();
    let mut leaf_depth: Option<usize> = None;
    // (node id, expected parent, expected entry in the parent, depth)
    let mut pending: Vec<(NodeId, NodeId, Option<ChildRef>, usize)> = vec![(root, NO_NODE, None, 1)];

    while let Some((id, parent, expected, depth)) = pending.pop() {
        let node = store.read_node(id)?;
        report.nodes += 1;

        if node.parent != parent {
            return Err(corrupt(format!(
                "node {id} names parent {} but is listed under {parent}",
                node.parent
            )));
        }
        check_size(&node, fanout)?;
        check_order(&node)?;
        if let Some(expected) = expected {
            if node.summary() != Some(expected) {
                return Err(corrupt(format!(
                    "entry for node {id} in {parent} is {expected:?}, subtree has {:?}",
                    node.summary()
                )));
            }
        }

        match &node.body {
            NodeBody::Leaf { values } => {
                report.values += values.len() as u64;
                match leaf_depth {
                    None => leaf_depth = Some(depth),
                    Some(known) if known != depth => {
                        return Err(corrupt(format!(
                            "leaf {id} at depth {depth}, other leaves at {known}"
                        )));
                    }
                    Some(_) => {}
                }
            }
            NodeBody::Inner { children } => {
                for child in children {
                    pending.push((child.id, id, Some(*child), depth + 1));
                }
            }
        }
    }

    report.height = leaf_depth.unwrap_or(0);
    Ok(report)
}
