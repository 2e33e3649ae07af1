//! Node store: tree records in the key-value store, cached per transaction.
//!
//! Every read goes through a [`NodeCache`] that lives for one transaction
//! and one collection. Writes stay in the cache until the transaction
//! commits; a pre-commit hook registered on the first write flushes them, so
//! a node rewritten many times during one operation costs one store write.
//!
//! The cache is kept in the transaction's extension slots between
//! operations. A [`NodeStore`] takes it out when opened and puts it back
//! when dropped, so consecutive operations on the same transaction see each
//! other's writes.

use std::collections::HashMap;

use crate::kv::Transaction;
use crate::kv::tuple::{Element, Subspace};
use crate::tree::TreeError;
use crate::tree::node::{Node, NodeBody, NodeId};
use crate::tree::record::{TreeHeadRecord, decode_head, decode_node, encode_head, encode_node};

/// Subspace tag of the head record.
pub const HEAD: i64 = 0;
/// Subspace tag of the node records.
pub const NODES: i64 = 1;

/// Store keys of one collection's tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreeKeys {
    collection: Subspace,
}

impl TreeKeys {
    #[must_use]
    pub fn new(space: &Subspace, collection: &[u8]) -> Self {
        Self {
            collection: space.subspace(&[Element::Bytes(collection.to_vec())]),
        }
    }

    #[must_use]
    pub fn head(&self) -> Vec<u8> {
        self.collection.pack(&[Element::Int(HEAD)])
    }

    // Ids are handed out from 1 upward and never approach i64::MAX
    #[allow(clippy::cast_possible_wrap)]
    #[must_use]
    pub fn node(&self, id: NodeId) -> Vec<u8> {
        self.collection
            .pack(&[Element::Int(NODES), Element::Int(id as i64)])
    }

    /// Key range holding every node record of this collection.
    #[must_use]
    pub fn nodes_range(&self) -> (Vec<u8>, Vec<u8>) {
        self.collection.subspace(&[Element::Int(NODES)]).range()
    }

    /// Extension slot holding this collection's cache.
    fn cache_slot(&self) -> Vec<u8> {
        self.collection.prefix().to_vec()
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Clean(Node),
    Dirty(Node),
    Cleared,
}

/// Reads and pending writes of one collection within one transaction.
#[derive(Debug, Default)]
pub struct NodeCache {
    head: Option<TreeHeadRecord>,
    head_dirty: bool,
    nodes: HashMap<NodeId, Slot>,
    hook_registered: bool,
}

impl NodeCache {
    /// Write every pending change into `txn`. Returns the number of keys
    /// written.
    fn flush(self, txn: &mut Transaction, keys: &TreeKeys) -> usize {
        let mut written = 0;

        let mut pending: Vec<(NodeId, Slot)> = self
            .nodes
            .into_iter()
            .filter(|(_, slot)| !matches!(slot, Slot::Clean(_)))
            .collect();
        pending.sort_unstable_by_key(|(id, _)| *id);

        for (id, slot) in pending {
            match slot {
                Slot::Dirty(node) => txn.set(keys.node(id), encode_node(&node)),
                Slot::Cleared => txn.clear(keys.node(id)),
                Slot::Clean(_) => continue,
            }
            written += 1;
        }

        if let (true, Some(head)) = (self.head_dirty, self.head) {
            txn.set(keys.head(), encode_head(&head));
            written += 1;
        }

        tracing::trace!("flushed {written} tree records");
        written
    }
}

/// Node-level access to one collection's tree inside a transaction.
pub struct NodeStore<'t> {
    txn: &'t mut Transaction,
    keys: TreeKeys,
    cache: NodeCache,
}

impl<'t> NodeStore<'t> {
    /// Open the store, resuming the transaction's cache for this collection.
    pub fn open(txn: &'t mut Transaction, keys: TreeKeys) -> Self {
        let cache = txn
            .take_extension::<NodeCache>(&keys.cache_slot())
            .unwrap_or_default();
        Self { txn, keys, cache }
    }

    #[must_use]
    pub const fn keys(&self) -> &TreeKeys {
        &self.keys
    }

    /// Read a node.
    ///
    /// A missing record means a parent or the head refers to a node that
    /// doesn't exist, which is never expected.
    pub fn read_node(&mut self, id: NodeId) -> Result<Node, TreeError> {
        match self.cache.nodes.get(&id) {
            Some(Slot::Clean(node) | Slot::Dirty(node)) => return Ok(node.clone()),
            Some(Slot::Cleared) => return Err(TreeError::MissingNode { id }),
            None => {}
        }

        let bytes = self
            .txn
            .get(&self.keys.node(id))?
            .ok_or(TreeError::MissingNode { id })?;
        let node = decode_node(id, &bytes)?;
        self.cache.nodes.insert(id, Slot::Clean(node.clone()));
        Ok(node)
    }

    /// Buffer a node write.
    pub fn write_node(&mut self, node: Node) -> Result<(), TreeError> {
        if let NodeBody::Inner { children } = &node.body {
            if children.len() < 2 {
                return Err(TreeError::InvalidNode {
                    id: node.id,
                    children: children.len(),
                });
            }
        }
        self.register_flush();
        self.cache.nodes.insert(node.id, Slot::Dirty(node));
        Ok(())
    }

    /// Buffer a node deletion.
    pub fn clear_node(&mut self, id: NodeId) {
        self.register_flush();
        self.cache.nodes.insert(id, Slot::Cleared);
    }

    /// Hand out a fresh node id.
    ///
    /// The incremented counter is written to the transaction right away, not
    /// buffered.
    pub fn allocate_node_id(&mut self) -> Result<NodeId, TreeError> {
        let mut head = self.head()?;
        let id = head.counter;
        head.counter += 1;
        self.cache.head = Some(head);
        self.txn.set(self.keys.head(), encode_head(&head));
        Ok(id)
    }

    /// Root node id, or [`NO_NODE`](crate::tree::NO_NODE) for an empty tree.
    pub fn root(&mut self) -> Result<NodeId, TreeError> {
        Ok(self.head()?.root)
    }

    pub fn set_root(&mut self, id: NodeId) -> Result<(), TreeError> {
        let mut head = self.head()?;
        head.root = id;
        self.cache.head = Some(head);
        self.cache.head_dirty = true;
        self.register_flush();
        Ok(())
    }

    fn head(&mut self) -> Result<TreeHeadRecord, TreeError> {
        if let Some(head) = self.cache.head {
            return Ok(head);
        }
        let head = match self.txn.get(&self.keys.head())? {
            Some(bytes) => decode_head(&bytes)?,
            None => TreeHeadRecord::empty(),
        };
        self.cache.head = Some(head);
        Ok(head)
    }

    fn register_flush(&mut self) {
        if self.cache.hook_registered {
            return;
        }
        self.cache.hook_registered = true;

        let keys = self.keys.clone();
        self.txn.on_pre_commit(Box::new(move |txn| {
            if let Some(cache) = txn.take_extension::<NodeCache>(&keys.cache_slot()) {
                cache.flush(txn, &keys);
            }
            Ok(())
        }));
    }
}

impl Drop for NodeStore<'_> {
    fn drop(&mut self) {
        let cache = std::mem::take(&mut self.cache);
        self.txn.put_extension(self.keys.cache_slot(), cache);
    }
}

impl std::fmt::Debug for NodeStore<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStore")
            .field("keys", &self.keys)
            .field("cached_nodes", &self.cache.nodes.len())
            .finish_non_exhaustive()
    }
}
