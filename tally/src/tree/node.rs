//! In-memory tree node model.
//!
//! A node is either a leaf holding sorted values or an inner node holding
//! sorted child summaries. Nodes refer to each other by integer id only:
//! the parent id lives in the node, child ids live in the parent's
//! [`ChildRef`] entries.

/// Node identifier, unique within one collection. `0` means "no node".
pub type NodeId = u64;

/// Id used for "no node": the parent of the root, or the root of an empty
/// tree.
pub const NO_NODE: NodeId = 0;

/// Aggregate over every value below one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRef {
    pub id: NodeId,
    pub min: i64,
    pub max: i64,
    pub count: u64,
}

/// Node contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeBody {
    /// Strictly increasing values.
    Leaf { values: Vec<i64> },
    /// Children sorted by `min`, with non-overlapping `[min, max]`.
    Inner { children: Vec<ChildRef> },
}

/// One element moved between nodes during borrowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Value(i64),
    Child(ChildRef),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub parent: NodeId,
    pub body: NodeBody,
}

impl Node {
    #[must_use]
    pub const fn leaf(id: NodeId, parent: NodeId, values: Vec<i64>) -> Self {
        Self {
            id,
            parent,
            body: NodeBody::Leaf { values },
        }
    }

    #[must_use]
    pub const fn inner(id: NodeId, parent: NodeId, children: Vec<ChildRef>) -> Self {
        Self {
            id,
            parent,
            body: NodeBody::Inner { children },
        }
    }

    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent == NO_NODE
    }

    /// Number of values (leaf) or children (inner).
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.body {
            NodeBody::Leaf { values } => values.len(),
            NodeBody::Inner { children } => children.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The parent's entry for this node, or `None` for an empty node.
    #[must_use]
    pub fn summary(&self) -> Option<ChildRef> {
        match &self.body {
            NodeBody::Leaf { values } => Some(ChildRef {
                id: self.id,
                min: *values.first()?,
                max: *values.last()?,
                count: values.len() as u64,
            }),
            NodeBody::Inner { children } => Some(ChildRef {
                id: self.id,
                min: children.first()?.min,
                max: children.last()?.max,
                count: children.iter().map(|c| c.count).sum(),
            }),
        }
    }

    /// Position of child `id` in an inner node.
    #[must_use]
    pub fn child_position(&self, id: NodeId) -> Option<usize> {
        match &self.body {
            NodeBody::Inner { children } => children.iter().position(|c| c.id == id),
            NodeBody::Leaf { .. } => None,
        }
    }

    /// Split off the upper half by position, keeping `len / 2` elements.
    #[must_use]
    pub fn split_off_upper(&mut self) -> NodeBody {
        match &mut self.body {
            NodeBody::Leaf { values } => NodeBody::Leaf {
                values: values.split_off(values.len() / 2),
            },
            NodeBody::Inner { children } => NodeBody::Inner {
                children: children.split_off(children.len() / 2),
            },
        }
    }

    /// Remove the first or last element.
    pub fn pop_edge(&mut self, front: bool) -> Option<Entry> {
        match &mut self.body {
            NodeBody::Leaf { values } if front => {
                (!values.is_empty()).then(|| Entry::Value(values.remove(0)))
            }
            NodeBody::Leaf { values } => values.pop().map(Entry::Value),
            NodeBody::Inner { children } if front => {
                (!children.is_empty()).then(|| Entry::Child(children.remove(0)))
            }
            NodeBody::Inner { children } => children.pop().map(Entry::Child),
        }
    }

    /// Insert an element at the front or back.
    ///
    /// Returns `false` (leaving the node untouched) if the element kind
    /// doesn't match the node kind.
    pub fn push_edge(&mut self, entry: Entry, front: bool) -> bool {
        match (&mut self.body, entry) {
            (NodeBody::Leaf { values }, Entry::Value(value)) => {
                if front {
                    values.insert(0, value);
                } else {
                    values.push(value);
                }
                true
            }
            (NodeBody::Inner { children }, Entry::Child(child)) => {
                if front {
                    children.insert(0, child);
                } else {
                    children.push(child);
                }
                true
            }
            _ => false,
        }
    }

    /// Ids of the children of an inner node; empty for a leaf.
    #[must_use]
    pub fn child_ids(&self) -> Vec<NodeId> {
        match &self.body {
            NodeBody::Inner { children } => children.iter().map(|c| c.id).collect(),
            NodeBody::Leaf { .. } => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(id: NodeId, min: i64, max: i64, count: u64) -> ChildRef {
        ChildRef {
            id,
            min,
            max,
            count,
        }
    }

    #[test]
    fn test_leaf_summary() {
        let node = Node::leaf(3, 1, vec![-4, 0, 9]);
        assert_eq!(node.summary(), Some(child(3, -4, 9, 3)));
        assert_eq!(Node::leaf(3, 1, Vec::new()).summary(), None);
    }

    #[test]
    fn test_inner_summary_sums_counts() {
        let node = Node::inner(7, 0, vec![child(1, 0, 4, 3), child(2, 10, 20, 5)]);
        assert_eq!(node.summary(), Some(child(7, 0, 20, 8)));
        assert_eq!(node.child_position(2), Some(1));
        assert_eq!(node.child_position(9), None);
    }

    #[test]
    fn test_split_keeps_lower_half() {
        let mut node = Node::leaf(1, 0, vec![1, 2, 3, 4, 5]);
        let upper = node.split_off_upper();
        assert_eq!(node.body, NodeBody::Leaf { values: vec![1, 2] });
        assert_eq!(
            upper,
            NodeBody::Leaf {
                values: vec![3, 4, 5]
            }
        );
    }

    #[test]
    fn test_edge_moves() {
        let mut left = Node::leaf(1, 0, vec![1, 2, 3]);
        let mut right = Node::leaf(2, 0, vec![7]);

        let moved = left.pop_edge(false).expect("non-empty");
        assert!(right.push_edge(moved, true));
        assert_eq!(right.body, NodeBody::Leaf { values: vec![3, 7] });

        let mut inner = Node::inner(3, 0, vec![child(4, 0, 1, 2)]);
        assert!(!inner.push_edge(Entry::Value(5), false));
        assert_eq!(inner.len(), 1);
    }
}
