//! Binary records for tree heads and nodes.
//!
//! Records are protobuf messages, so fields are tagged and unknown fields
//! are skipped on decode. The in-memory [`Node`] is a sum type; on the wire
//! the node kind is an enumeration field next to both payload fields.

use prost::Message;

use crate::tree::TreeError;
use crate::tree::node::{ChildRef, Node, NodeBody, NodeId};

/// Per-collection tree head.
#[derive(Clone, Copy, PartialEq, Eq, prost::Message)]
pub struct TreeHeadRecord {
    /// Root node id, `0` for an empty tree.
    #[prost(uint64, tag = "1")]
    pub root: u64,
    /// Next node id to hand out.
    #[prost(uint64, tag = "2")]
    pub counter: u64,
}

impl TreeHeadRecord {
    /// Head of a tree that has never held a node.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            root: 0,
            counter: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum NodeKind {
    Leaf = 0,
    Inner = 1,
}

#[derive(Clone, Copy, PartialEq, Eq, prost::Message)]
pub struct ChildRecord {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(sint64, tag = "2")]
    pub min: i64,
    #[prost(sint64, tag = "3")]
    pub max: i64,
    #[prost(uint64, tag = "4")]
    pub count: u64,
}

#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct TreeNodeRecord {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub parent: u64,
    #[prost(enumeration = "NodeKind", tag = "3")]
    pub kind: i32,
    #[prost(sint64, repeated, tag = "4")]
    pub values: Vec<i64>,
    #[prost(message, repeated, tag = "5")]
    pub children: Vec<ChildRecord>,
}

impl From<ChildRef> for ChildRecord {
    fn from(child: ChildRef) -> Self {
        Self {
            id: child.id,
            min: child.min,
            max: child.max,
            count: child.count,
        }
    }
}

impl From<ChildRecord> for ChildRef {
    fn from(record: ChildRecord) -> Self {
        Self {
            id: record.id,
            min: record.min,
            max: record.max,
            count: record.count,
        }
    }
}

impl From<&Node> for TreeNodeRecord {
    fn from(node: &Node) -> Self {
        match &node.body {
            NodeBody::Leaf { values } => Self {
                id: node.id,
                parent: node.parent,
                kind: NodeKind::Leaf.into(),
                values: values.clone(),
                children: Vec::new(),
            },
            NodeBody::Inner { children } => Self {
                id: node.id,
                parent: node.parent,
                kind: NodeKind::Inner.into(),
                values: Vec::new(),
                children: children.iter().copied().map(ChildRecord::from).collect(),
            },
        }
    }
}

/// Encode a node for storage.
#[must_use]
pub fn encode_node(node: &Node) -> Vec<u8> {
    TreeNodeRecord::from(node).encode_to_vec()
}

/// Decode a stored node, checking it is the node that was asked for.
pub fn decode_node(expected: NodeId, bytes: &[u8]) -> Result<Node, TreeError> {
    let record = TreeNodeRecord::decode(bytes)?;
    if record.id != expected {
        return Err(TreeError::Corrupt(format!(
            "record under node key {expected} carries id {}",
            record.id
        )));
    }
    let body = match NodeKind::try_from(record.kind) {
        Ok(NodeKind::Leaf) => NodeBody::Leaf {
            values: record.values,
        },
        Ok(NodeKind::Inner) => NodeBody::Inner {
            children: record.children.into_iter().map(ChildRef::from).collect(),
        },
        Err(_) => {
            return Err(TreeError::Corrupt(format!(
                "node {expected} has unknown kind {}",
                record.kind
            )));
        }
    };
    Ok(Node {
        id: record.id,
        parent: record.parent,
        body,
    })
}

#[must_use]
pub fn encode_head(head: &TreeHeadRecord) -> Vec<u8> {
    head.encode_to_vec()
}

pub fn decode_head(bytes: &[u8]) -> Result<TreeHeadRecord, TreeError> {
    Ok(TreeHeadRecord::decode(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_record_decodes_to_same_variant() {
        let inner = Node::inner(
            9,
            0,
            vec![
                ChildRef {
                    id: 1,
                    min: -5,
                    max: 3,
                    count: 4,
                },
                ChildRef {
                    id: 2,
                    min: 10,
                    max: 12,
                    count: 2,
                },
            ],
        );
        assert_eq!(decode_node(9, &encode_node(&inner)).expect("decode"), inner);

        let leaf = Node::leaf(4, 9, vec![i64::MIN, -1, i64::MAX]);
        assert_eq!(decode_node(4, &encode_node(&leaf)).expect("decode"), leaf);
    }

    #[test]
    fn test_decode_rejects_mismatched_id() {
        let bytes = encode_node(&Node::leaf(4, 0, vec![1]));
        assert!(matches!(decode_node(5, &bytes), Err(TreeError::Corrupt(_))));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        #[derive(Clone, PartialEq, prost::Message)]
        struct FutureHead {
            #[prost(uint64, tag = "1")]
            root: u64,
            #[prost(uint64, tag = "2")]
            counter: u64,
            #[prost(string, tag = "9")]
            note: String,
        }

        let bytes = FutureHead {
            root: 3,
            counter: 8,
            note: "added later".to_owned(),
        }
        .encode_to_vec();
        let head = decode_head(&bytes).expect("decode");
        assert_eq!(head.root, 3);
        assert_eq!(head.counter, 8);
    }
}
