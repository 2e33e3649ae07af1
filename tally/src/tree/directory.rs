//! Public tree API: one B+ tree per collection under a shared subspace.

use crate::kv::Transaction;
use crate::kv::tuple::{Element, Subspace};
use crate::tree::node::{NO_NODE, Node, NodeBody};
use crate::tree::ops::{self, Fanout};
use crate::tree::store::{NodeStore, TreeKeys};
use crate::tree::verify::{self, TreeReport};
use crate::tree::{KeyRange, TreeError};

/// Entry point for tree operations.
///
/// Holds only configuration; all state is in the store, read through the
/// transaction passed to each call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeDirectory {
    space: Subspace,
    fanout: Fanout,
}

impl TreeDirectory {
    /// Smallest fan-out that keeps a split inner node at two or more
    /// children.
    pub const MIN_BRANCH: usize = 4;

    /// Directory under the default `("tally", "tree")` subspace.
    pub fn new(max_branch: usize) -> Result<Self, TreeError> {
        Self::with_subspace(
            Subspace::new(&[Element::from("tally"), Element::from("tree")]),
            max_branch,
        )
    }

    pub fn with_subspace(space: Subspace, max_branch: usize) -> Result<Self, TreeError> {
        if max_branch < Self::MIN_BRANCH {
            return Err(TreeError::InvalidBranch(max_branch));
        }
        Ok(Self {
            space,
            fanout: Fanout::new(max_branch),
        })
    }

    #[must_use]
    pub const fn fanout(&self) -> Fanout {
        self.fanout
    }

    #[must_use]
    pub const fn subspace(&self) -> &Subspace {
        &self.space
    }

    #[must_use]
    pub fn keys(&self, collection: &[u8]) -> TreeKeys {
        TreeKeys::new(&self.space, collection)
    }

    fn open<'t>(&self, txn: &'t mut Transaction, collection: &[u8]) -> NodeStore<'t> {
        NodeStore::open(txn, self.keys(collection))
    }

    /// Insert `key` into `collection`. Adding a key that is already present
    /// does nothing.
    pub fn add(
        &self,
        txn: &mut Transaction,
        collection: &[u8],
        key: i64,
    ) -> Result<(), TreeError> {
        let mut store = self.open(txn, collection);

        if store.root()? == NO_NODE {
            let id = store.allocate_node_id()?;
            store.write_node(Node::leaf(id, NO_NODE, vec![key]))?;
            store.set_root(id)?;
            tracing::debug!("started tree with root leaf {id}");
            return Ok(());
        }

        let mut leaf = ops::search(&mut store, key)?;
        let leaf_id = leaf.id;
        let NodeBody::Leaf { values } = &mut leaf.body else {
            return Err(TreeError::Corrupt(format!("search ended at inner node {leaf_id}")));
        };
        let Err(position) = values.binary_search(&key) else {
            return Ok(());
        };
        values.insert(position, key);
        store.write_node(leaf)?;
        ops::propagate(&mut store, leaf_id)?;

        let mut current = leaf_id;
        while store.read_node(current)?.len() > self.fanout.max_children {
            current = ops::split(&mut store, current)?;
        }
        Ok(())
    }

    /// Delete `key` from `collection`. Removing an absent key does nothing.
    pub fn remove(
        &self,
        txn: &mut Transaction,
        collection: &[u8],
        key: i64,
    ) -> Result<(), TreeError> {
        let mut store = self.open(txn, collection);
        if store.root()? == NO_NODE {
            return Ok(());
        }

        let mut leaf = ops::search(&mut store, key)?;
        let (leaf_id, is_root) = (leaf.id, leaf.is_root());
        let NodeBody::Leaf { values } = &mut leaf.body else {
            return Err(TreeError::Corrupt(format!("search ended at inner node {leaf_id}")));
        };
        let Ok(position) = values.binary_search(&key) else {
            return Ok(());
        };

        if is_root && values.len() == 1 {
            store.clear_node(leaf_id);
            store.set_root(NO_NODE)?;
            tracing::debug!("removed last key, tree is empty");
            return Ok(());
        }

        values.remove(position);
        ops::rebalance(&mut store, self.fanout, leaf)
    }

    /// Number of keys of `collection` inside `range`.
    pub fn count(
        &self,
        txn: &mut Transaction,
        collection: &[u8],
        range: KeyRange,
    ) -> Result<u64, TreeError> {
        let mut store = self.open(txn, collection);
        let root = store.root()?;
        ops::count_range(&mut store, root, range)
    }

    /// Check every structural invariant of `collection`'s tree.
    pub fn verify(
        &self,
        txn: &mut Transaction,
        collection: &[u8],
    ) -> Result<TreeReport, TreeError> {
        let mut store = self.open(txn, collection);
        verify::verify(&mut store, self.fanout)
    }
}
