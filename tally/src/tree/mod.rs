//! Order-statistics B+ tree stored inside the key-value store.
//!
//! One independent tree per collection. Every inner node keeps, for each
//! child, the minimum, maximum, and number of values below that child, so a
//! range count only descends into children that straddle a range bound.
//!
//! # Structure
//!
//! - [`node`]: sum-typed node model
//! - [`record`]: protobuf records for heads and nodes
//! - [`store`]: per-transaction node cache with buffered writes
//! - [`ops`]: search, split, borrow/merge, propagation, range count
//! - [`directory`]: public `add` / `remove` / `count`
//! - [`verify`]: whole-tree invariant checker
//!
//! # Key Layout
//!
//! Within a tree subspace:
//!
//! ```text
//! [collection, HEAD]              -> TreeHeadRecord
//! [collection, NODES, node_id]    -> TreeNodeRecord
//! ```
//!
//! # Usage
//!
//! ```
//! use tally::kv::{Database, KvConfig};
//! use tally::tree::{KeyRange, TreeDirectory, TreeError};
//!
//! let db = Database::in_memory(KvConfig::default());
//! let tree = TreeDirectory::new(8).unwrap();
//!
//! db.run(|txn| -> Result<(), TreeError> {
//!     for key in -50..50 {
//!         tree.add(txn, b"scores", key)?;
//!     }
//!     Ok(())
//! })
//! .unwrap();
//!
//! let mut txn = db.begin();
//! assert_eq!(tree.count(&mut txn, b"scores", KeyRange::between(-10, 9)).unwrap(), 20);
//! ```

pub mod directory;
pub mod node;
pub mod ops;
pub mod record;
pub mod store;
pub mod verify;

pub use directory::TreeDirectory;
pub use node::{ChildRef, NO_NODE, Node, NodeBody, NodeId};
pub use store::{NodeStore, TreeKeys};
pub use verify::TreeReport;

use crate::kv::{KvError, RetryableError};

/// Inclusive range of keys; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyRange {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl KeyRange {
    #[must_use]
    pub const fn new(from: Option<i64>, to: Option<i64>) -> Self {
        Self { from, to }
    }

    /// Every key.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            from: None,
            to: None,
        }
    }

    /// Keys `>= from`.
    #[must_use]
    pub const fn from(from: i64) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    /// Keys `<= to`.
    #[must_use]
    pub const fn to(to: i64) -> Self {
        Self {
            from: None,
            to: Some(to),
        }
    }

    /// Keys in `[from, to]`.
    #[must_use]
    pub const fn between(from: i64, to: i64) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    #[must_use]
    pub fn contains(&self, key: i64) -> bool {
        self.from.is_none_or(|from| key >= from) && self.to.is_none_or(|to| key <= to)
    }

    /// Whether every key in `[min, max]` is inside this range.
    #[must_use]
    pub fn covers(&self, min: i64, max: i64) -> bool {
        self.contains(min) && self.contains(max)
    }

    /// Whether some key in `[min, max]` is inside this range.
    #[must_use]
    pub fn overlaps(&self, min: i64, max: i64) -> bool {
        self.from.is_none_or(|from| max >= from) && self.to.is_none_or(|to| min <= to)
    }

    /// Whether no key can be inside this range.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!((self.from, self.to), (Some(from), Some(to)) if from > to)
    }
}

/// Errors that can occur during tree operations.
///
/// Everything except `Kv` means the stored tree is broken.
#[derive(Debug)]
pub enum TreeError {
    /// Store error, including transaction conflicts.
    Kv(KvError),
    /// A stored record could not be decoded.
    Decode(prost::DecodeError),
    /// A referenced node has no record.
    MissingNode { id: NodeId },
    /// An inner node with fewer than two children was about to be written.
    InvalidNode { id: NodeId, children: usize },
    /// A node's parent has no entry for it.
    MissingChild { parent: NodeId, child: NodeId },
    /// A structural invariant doesn't hold.
    Corrupt(String),
    /// Fan-out below the supported minimum.
    InvalidBranch(usize),
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kv(e) => write!(f, "store error: {e}"),
            Self::Decode(e) => write!(f, "record decode error: {e}"),
            Self::MissingNode { id } => write!(f, "missing node {id}"),
            Self::InvalidNode { id, children } => {
                write!(f, "inner node {id} has {children} children (need at least 2)")
            }
            Self::MissingChild { parent, child } => {
                write!(f, "node {parent} has no entry for child {child}")
            }
            Self::Corrupt(message) => write!(f, "corrupt tree: {message}"),
            Self::InvalidBranch(branch) => write!(
                f,
                "max branch {branch} is too small (minimum {})",
                TreeDirectory::MIN_BRANCH
            ),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Kv(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<KvError> for TreeError {
    fn from(e: KvError) -> Self {
        Self::Kv(e)
    }
}

impl From<prost::DecodeError> for TreeError {
    fn from(e: prost::DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl RetryableError for TreeError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Kv(e) if e.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_bounds_are_inclusive() {
        let range = KeyRange::between(43, 60);
        assert!(range.contains(43));
        assert!(range.contains(60));
        assert!(!range.contains(61));
        assert!(range.covers(43, 60));
        assert!(!range.covers(42, 60));
        assert!(range.overlaps(0, 43));
        assert!(!range.overlaps(61, 90));
    }

    #[test]
    fn test_open_ranges() {
        assert!(KeyRange::all().covers(i64::MIN, i64::MAX));
        assert!(KeyRange::from(5).covers(5, i64::MAX));
        assert!(!KeyRange::to(5).overlaps(6, 7));
        assert!(KeyRange::between(2, 1).is_empty());
        assert!(!KeyRange::between(1, 1).is_empty());
    }

    #[test]
    fn test_only_store_conflicts_are_retryable() {
        assert!(TreeError::Kv(KvError::Conflict).is_retryable());
        assert!(!TreeError::MissingNode { id: 3 }.is_retryable());
    }
}
