//! Node-level tree operations.
//!
//! These work on one collection's [`NodeStore`] and keep the aggregate
//! invariant: each inner node's entry for a child holds the exact minimum,
//! maximum, and value count of that child's subtree. The rebalancing
//! *policy* (when to split, when to fix underflow) lives in the directory.

use crate::tree::node::{ChildRef, Entry, NO_NODE, Node, NodeBody, NodeId};
use crate::tree::store::NodeStore;
use crate::tree::{KeyRange, TreeError};

/// Size bounds derived from the fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fanout {
    pub min_children: usize,
    pub max_children: usize,
}

impl Fanout {
    #[must_use]
    pub const fn new(max_branch: usize) -> Self {
        Self {
            min_children: max_branch / 2,
            max_children: max_branch - 1,
        }
    }
}

/// Which neighbour of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

fn children_of(node: &Node) -> Result<&[ChildRef], TreeError> {
    match &node.body {
        NodeBody::Inner { children } => Ok(children),
        NodeBody::Leaf { .. } => Err(TreeError::Corrupt(format!(
            "leaf {} used as an inner node",
            node.id
        ))),
    }
}

fn children_of_mut(node: &mut Node) -> Result<&mut Vec<ChildRef>, TreeError> {
    let id = node.id;
    match &mut node.body {
        NodeBody::Inner { children } => Ok(children),
        NodeBody::Leaf { .. } => Err(TreeError::Corrupt(format!(
            "leaf {id} used as an inner node"
        ))),
    }
}

fn summary_of(node: &Node) -> Result<ChildRef, TreeError> {
    node.summary()
        .ok_or_else(|| TreeError::Corrupt(format!("node {} is empty", node.id)))
}

fn position_in(parent: &Node, child: NodeId) -> Result<usize, TreeError> {
    parent.child_position(child).ok_or(TreeError::MissingChild {
        parent: parent.id,
        child,
    })
}

/// Index of the child of an inner node whose range should hold `key`.
///
/// Keys below the second child's minimum go to the first child and keys at
/// or above the last child's minimum go to the last child. Otherwise the
/// child `i` with `children[i].min <= key < children[i + 1].min`.
#[must_use]
pub fn child_index(children: &[ChildRef], key: i64) -> usize {
    let n = children.len();
    if n <= 1 || key < children[1].min {
        return 0;
    }
    if key >= children[n - 1].min {
        return n - 1;
    }
    children[1..n - 1].partition_point(|c| c.min <= key)
}

/// Descend from the root to the leaf that holds, or would hold, `key`.
///
/// The tree must not be empty.
pub fn search(store: &mut NodeStore<'_>, key: i64) -> Result<Node, TreeError> {
    let root = store.root()?;
    let mut node = store.read_node(root)?;
    loop {
        let next = match &node.body {
            NodeBody::Leaf { .. } => None,
            NodeBody::Inner { children } => Some(
                children
                    .get(child_index(children, key))
                    .ok_or(TreeError::InvalidNode {
                        id: node.id,
                        children: 0,
                    })?
                    .id,
            ),
        };
        match next {
            None => return Ok(node),
            Some(id) => node = store.read_node(id)?,
        }
    }
}

/// Point `id`'s parent reference at `parent`.
fn reparent(store: &mut NodeStore<'_>, id: NodeId, parent: NodeId) -> Result<(), TreeError> {
    let mut node = store.read_node(id)?;
    if node.parent != parent {
        node.parent = parent;
        store.write_node(node)?;
    }
    Ok(())
}

/// Refresh the entries for `id` in each ancestor, stopping at the first
/// entry that is already exact.
pub fn propagate(store: &mut NodeStore<'_>, id: NodeId) -> Result<(), TreeError> {
    let mut node = store.read_node(id)?;
    while !node.is_root() {
        let summary = summary_of(&node)?;
        let mut parent = store.read_node(node.parent)?;
        let position = position_in(&parent, node.id)?;
        let children = children_of_mut(&mut parent)?;
        if children[position] == summary {
            break;
        }
        children[position] = summary;
        store.write_node(parent.clone())?;
        node = parent;
    }
    Ok(())
}

/// Split an overfull node in two by position.
///
/// The lower half keeps the node's id; the upper half moves to a new node
/// inserted right after it in the parent. A root split grows a new root.
/// Returns the id of the parent, which may now be overfull itself.
pub fn split(store: &mut NodeStore<'_>, id: NodeId) -> Result<NodeId, TreeError> {
    let mut node = store.read_node(id)?;
    let right_id = store.allocate_node_id()?;
    let mut right = Node {
        id: right_id,
        parent: node.parent,
        body: node.split_off_upper(),
    };
    for child in right.child_ids() {
        reparent(store, child, right_id)?;
    }

    let left_summary = summary_of(&node)?;
    let right_summary = summary_of(&right)?;

    if node.is_root() {
        let root_id = store.allocate_node_id()?;
        node.parent = root_id;
        right.parent = root_id;
        store.write_node(node)?;
        store.write_node(right)?;
        store.write_node(Node::inner(
            root_id,
            NO_NODE,
            vec![left_summary, right_summary],
        ))?;
        store.set_root(root_id)?;
        tracing::debug!("split root {id} into {id} and {right_id} under new root {root_id}");
        return Ok(root_id);
    }

    let parent_id = node.parent;
    let mut parent = store.read_node(parent_id)?;
    let position = position_in(&parent, id)?;
    let children = children_of_mut(&mut parent)?;
    children[position] = left_summary;
    children.insert(position + 1, right_summary);

    store.write_node(node)?;
    store.write_node(right)?;
    store.write_node(parent)?;
    propagate(store, parent_id)?;
    tracing::debug!("split node {id} into {id} and {right_id} under {parent_id}");
    Ok(parent_id)
}

/// The node adjacent to `node` on the same level, or `None` at the edge of
/// the tree.
///
/// Climbs to the nearest ancestor where the path is not on the requested
/// edge, crosses to the neighbouring subtree, and descends along its
/// opposite edge. The result may have a different parent than `node`.
pub fn sibling(
    store: &mut NodeStore<'_>,
    node: &Node,
    side: Side,
) -> Result<Option<Node>, TreeError> {
    let mut child_id = node.id;
    let mut parent_id = node.parent;
    let mut depth = 0usize;

    while parent_id != NO_NODE {
        let parent = store.read_node(parent_id)?;
        let children = children_of(&parent)?;
        let position = position_in(&parent, child_id)?;
        let neighbour = match side {
            Side::Left => position.checked_sub(1),
            Side::Right => Some(position + 1).filter(|&i| i < children.len()),
        };

        if let Some(index) = neighbour {
            let mut current = store.read_node(children[index].id)?;
            for _ in 0..depth {
                let edge = children_of(&current)?;
                let next = match side {
                    Side::Left => edge.last(),
                    Side::Right => edge.first(),
                }
                .ok_or(TreeError::InvalidNode {
                    id: current.id,
                    children: 0,
                })?
                .id;
                current = store.read_node(next)?;
            }
            return Ok(Some(current));
        }

        child_id = parent_id;
        parent_id = parent.parent;
        depth += 1;
    }

    Ok(None)
}

/// Move one element from `from` into `into`, where `from` lies on `side`
/// of `into`. Writes both nodes and refreshes both ancestor chains.
pub fn borrow(
    store: &mut NodeStore<'_>,
    mut from: Node,
    mut into: Node,
    side: Side,
) -> Result<(), TreeError> {
    let entry = from
        .pop_edge(side == Side::Right)
        .ok_or_else(|| TreeError::Corrupt(format!("sibling {} is empty", from.id)))?;
    if !into.push_edge(entry, side == Side::Left) {
        return Err(TreeError::Corrupt(format!(
            "siblings {} and {} differ in kind",
            from.id, into.id
        )));
    }
    if let Entry::Child(child) = entry {
        reparent(store, child.id, into.id)?;
    }

    let (from_id, into_id) = (from.id, into.id);
    store.write_node(from)?;
    store.write_node(into)?;
    propagate(store, from_id)?;
    propagate(store, into_id)?;
    tracing::trace!("moved one entry from {from_id} into {into_id}");
    Ok(())
}

/// Fold `node` into `target`, where `target` lies on `side` of `node`, and
/// delete `node`.
///
/// Returns `node`'s parent with the entry removed. The parent is not
/// written: it may be left with a single child and must be fixed up by the
/// caller first.
pub fn merge(
    store: &mut NodeStore<'_>,
    node: Node,
    mut target: Node,
    side: Side,
) -> Result<Node, TreeError> {
    let (node_id, parent_id) = (node.id, node.parent);
    let moved = node.child_ids();

    match (&mut target.body, node.body) {
        (NodeBody::Leaf { values: kept }, NodeBody::Leaf { values: mut folded }) => {
            if side == Side::Left {
                kept.append(&mut folded);
            } else {
                folded.append(kept);
                *kept = folded;
            }
        }
        (NodeBody::Inner { children: kept }, NodeBody::Inner { children: mut folded }) => {
            if side == Side::Left {
                kept.append(&mut folded);
            } else {
                folded.append(kept);
                *kept = folded;
            }
        }
        _ => {
            return Err(TreeError::Corrupt(format!(
                "siblings {node_id} and {} differ in kind",
                target.id
            )));
        }
    }
    for child in moved {
        reparent(store, child, target.id)?;
    }

    let target_id = target.id;
    let target_summary = summary_of(&target)?;
    let shares_parent = target.parent == parent_id;
    store.write_node(target)?;
    store.clear_node(node_id);
    if !shares_parent {
        propagate(store, target_id)?;
    }

    let mut parent = store.read_node(parent_id)?;
    let position = position_in(&parent, node_id)?;
    let children = children_of_mut(&mut parent)?;
    children.remove(position);
    if shares_parent {
        let target_position = children
            .iter()
            .position(|c| c.id == target_id)
            .ok_or(TreeError::MissingChild {
                parent: parent_id,
                child: target_id,
            })?;
        children[target_position] = target_summary;
    }

    tracing::debug!("merged node {node_id} into {target_id}");
    Ok(parent)
}

/// Replace an inner root that has a single child with that child.
fn collapse_root(store: &mut NodeStore<'_>, root: &Node) -> Result<(), TreeError> {
    let child_id = children_of(root)?
        .first()
        .ok_or(TreeError::InvalidNode {
            id: root.id,
            children: 0,
        })?
        .id;
    let mut child = store.read_node(child_id)?;
    child.parent = NO_NODE;
    store.write_node(child)?;
    store.clear_node(root.id);
    store.set_root(child_id)?;
    tracing::debug!("collapsed root {} into {child_id}", root.id);
    Ok(())
}

/// Write `node`, which has just lost an element, and restore the fan-out
/// bounds from it upward.
///
/// An underfull node first borrows from its left sibling, then its right
/// sibling, when that sibling has more than the minimum; otherwise it is
/// merged into a sibling (left preferred) and its parent is checked next.
/// An inner root left with one child is collapsed.
pub fn rebalance(
    store: &mut NodeStore<'_>,
    fanout: Fanout,
    mut node: Node,
) -> Result<(), TreeError> {
    loop {
        if node.is_root() {
            let single_child = matches!(&node.body, NodeBody::Inner { children } if children.len() == 1);
            if single_child {
                return collapse_root(store, &node);
            }
            return store.write_node(node);
        }

        if node.len() >= fanout.min_children {
            let id = node.id;
            store.write_node(node)?;
            return propagate(store, id);
        }

        let left = sibling(store, &node, Side::Left)?;
        if let Some(left) = left.as_ref().filter(|n| n.len() > fanout.min_children) {
            return borrow(store, left.clone(), node, Side::Left);
        }
        let right = sibling(store, &node, Side::Right)?;
        if let Some(right) = right.as_ref().filter(|n| n.len() > fanout.min_children) {
            return borrow(store, right.clone(), node, Side::Right);
        }

        node = match (left, right) {
            (Some(target), _) => merge(store, node, target, Side::Left)?,
            (None, Some(target)) => merge(store, node, target, Side::Right)?,
            (None, None) => {
                return Err(TreeError::Corrupt(format!(
                    "non-root node {} has no siblings",
                    node.id
                )));
            }
        };
    }
}

fn count_values(values: &[i64], range: KeyRange) -> u64 {
    let lo = range
        .from
        .map_or(0, |from| values.partition_point(|&v| v < from));
    let hi = range
        .to
        .map_or(values.len(), |to| values.partition_point(|&v| v <= to));
    hi.saturating_sub(lo) as u64
}

/// Count values in `range` below `root`.
///
/// Children whose whole span lies inside the range contribute their cached
/// count without being read; only children straddling a bound are visited.
pub fn count_range(
    store: &mut NodeStore<'_>,
    root: NodeId,
    range: KeyRange,
) -> Result<u64, TreeError> {
    if root == NO_NODE || range.is_empty() {
        return Ok(0);
    }

    let mut total = 0;
    let mut pending = vec![root];
    while let Some(id) = pending.pop() {
        let node = store.read_node(id)?;
        match &node.body {
            NodeBody::Leaf { values } => total += count_values(values, range),
            NodeBody::Inner { children } => {
                for child in children {
                    if range.covers(child.min, child.max) {
                        total += child.count;
                    } else if range.overlaps(child.min, child.max) {
                        pending.push(child.id);
                    }
                }
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::tuple::{Element, Subspace};
    use crate::kv::{Database, KvConfig};
    use crate::tree::store::TreeKeys;

    fn child(id: NodeId, min: i64, max: i64) -> ChildRef {
        ChildRef {
            id,
            min,
            max,
            count: 1,
        }
    }

    fn keys() -> TreeKeys {
        TreeKeys::new(&Subspace::new(&[Element::from("ops")]), b"c")
    }

    #[test]
    fn test_fanout_bounds() {
        assert_eq!(
            Fanout::new(5),
            Fanout {
                min_children: 2,
                max_children: 4
            }
        );
        assert_eq!(Fanout::new(64).min_children, 32);
    }

    #[test]
    fn test_child_index_routes_by_minimum() {
        let children = [child(1, 0, 5), child(2, 10, 15), child(3, 20, 25), child(4, 30, 35)];
        assert_eq!(child_index(&children, -100), 0);
        assert_eq!(child_index(&children, 7), 0);
        assert_eq!(child_index(&children, 10), 1);
        assert_eq!(child_index(&children, 19), 1);
        assert_eq!(child_index(&children, 20), 2);
        assert_eq!(child_index(&children, 29), 2);
        assert_eq!(child_index(&children, 30), 3);
        assert_eq!(child_index(&children, i64::MAX), 3);
    }

    #[test]
    fn test_count_values_inclusive() {
        let values = [1, 3, 5, 7, 9];
        assert_eq!(count_values(&values, KeyRange::between(3, 7)), 3);
        assert_eq!(count_values(&values, KeyRange::from(8)), 1);
        assert_eq!(count_values(&values, KeyRange::to(0)), 0);
        assert_eq!(count_values(&values, KeyRange::all()), 5);
    }

    /// Root with leaves [1, 2] [5, 6] [9, 10] under ids 2, 3, 4.
    fn three_leaf_tree(store: &mut NodeStore<'_>) -> NodeId {
        let root = store.allocate_node_id().expect("allocate");
        let mut entries = Vec::new();
        for values in [vec![1, 2], vec![5, 6], vec![9, 10]] {
            let id = store.allocate_node_id().expect("allocate");
            let leaf = Node::leaf(id, root, values);
            entries.push(leaf.summary().expect("summary"));
            store.write_node(leaf).expect("write");
        }
        store
            .write_node(Node::inner(root, NO_NODE, entries))
            .expect("write");
        store.set_root(root).expect("set root");
        root
    }

    #[test]
    fn test_sibling_lookup_stops_at_edges() {
        let db = Database::in_memory(KvConfig::default());
        let mut txn = db.begin();
        let mut store = NodeStore::open(&mut txn, keys());
        three_leaf_tree(&mut store);

        let first = store.read_node(2).expect("read");
        let middle = store.read_node(3).expect("read");
        assert!(sibling(&mut store, &first, Side::Left).expect("lookup").is_none());
        assert_eq!(
            sibling(&mut store, &middle, Side::Left)
                .expect("lookup")
                .map(|n| n.id),
            Some(2)
        );
        assert_eq!(
            sibling(&mut store, &middle, Side::Right)
                .expect("lookup")
                .map(|n| n.id),
            Some(4)
        );
    }

    #[test]
    fn test_count_uses_cached_aggregates() {
        let db = Database::in_memory(KvConfig::default());
        let mut txn = db.begin();
        let mut store = NodeStore::open(&mut txn, keys());
        let root = three_leaf_tree(&mut store);

        // Leaf 3 is fully covered, so corrupting it must not change the count.
        store.write_node(Node::leaf(3, root, vec![])).expect("write");
        assert_eq!(
            count_range(&mut store, root, KeyRange::between(2, 9)).expect("count"),
            4
        );
        assert_eq!(
            count_range(&mut store, root, KeyRange::between(7, 3)).expect("count"),
            0
        );
    }

    #[test]
    fn test_borrow_moves_boundary_value() {
        let db = Database::in_memory(KvConfig::default());
        let mut txn = db.begin();
        let mut store = NodeStore::open(&mut txn, keys());
        let root = three_leaf_tree(&mut store);

        let from = store.read_node(3).expect("read");
        let into = Node::leaf(2, root, vec![1]);
        borrow(&mut store, from, into, Side::Right).expect("borrow");

        assert_eq!(store.read_node(2).expect("read").body, NodeBody::Leaf {
            values: vec![1, 5]
        });
        let root = store.read_node(root).expect("read");
        let entries = children_of(&root).expect("inner");
        assert_eq!((entries[0].min, entries[0].max, entries[0].count), (1, 5, 2));
        assert_eq!((entries[1].min, entries[1].max, entries[1].count), (6, 6, 1));
    }
}
