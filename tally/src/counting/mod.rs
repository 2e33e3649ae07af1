//! Counting collections over interchangeable index strategies.
//!
//! [`CountingIndex`] is the common interface: idempotent `add` / `remove`
//! and an inclusive range `count`. The B+ tree ([`TreeDirectory`]) is the
//! main implementation; [`FlatIndex`] and [`BucketIndex`] are simpler
//! layouts kept for comparison and cross-checking.
//!
//! A [`CountingCollection`] names one collection by a tuple and forwards to
//! any index.

mod bucket;
mod flat;

pub use bucket::BucketIndex;
pub use flat::FlatIndex;

use crate::kv::tuple::{self, Element, TupleError};
use crate::kv::{KvError, RetryableError, Transaction};
use crate::tree::{KeyRange, TreeDirectory, TreeError};

/// Errors that can occur during counting operations.
#[derive(Debug)]
pub enum CountError {
    /// Store error, including transaction conflicts.
    Kv(KvError),
    /// Tree index error.
    Tree(TreeError),
    /// The index only supports non-negative keys.
    NegativeKey(i64),
    /// A collection key is not a valid packed tuple.
    Tuple(TupleError),
    /// A bucket counter record is not eight bytes.
    CorruptCounter { bucket: i64 },
}

impl std::fmt::Display for CountError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kv(e) => write!(f, "store error: {e}"),
            Self::Tree(e) => write!(f, "tree error: {e}"),
            Self::NegativeKey(key) => write!(f, "negative key {key} is not supported"),
            Self::Tuple(e) => write!(f, "invalid collection key: {e}"),
            Self::CorruptCounter { bucket } => write!(f, "corrupt counter for bucket {bucket}"),
        }
    }
}

impl std::error::Error for CountError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Kv(e) => Some(e),
            Self::Tree(e) => Some(e),
            Self::Tuple(e) => Some(e),
            _ => None,
        }
    }
}

impl From<KvError> for CountError {
    fn from(e: KvError) -> Self {
        Self::Kv(e)
    }
}

impl From<TreeError> for CountError {
    fn from(e: TreeError) -> Self {
        Self::Tree(e)
    }
}

impl From<TupleError> for CountError {
    fn from(e: TupleError) -> Self {
        Self::Tuple(e)
    }
}

impl RetryableError for CountError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Kv(e) => e.is_retryable(),
            Self::Tree(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// An index that counts keys per collection.
pub trait CountingIndex {
    /// Insert `key`; a no-op if already present.
    fn add(&self, txn: &mut Transaction, collection: &[u8], key: i64) -> Result<(), CountError>;

    /// Delete `key`; a no-op if absent.
    fn remove(&self, txn: &mut Transaction, collection: &[u8], key: i64)
    -> Result<(), CountError>;

    /// Number of keys inside `range`.
    fn count(
        &self,
        txn: &mut Transaction,
        collection: &[u8],
        range: KeyRange,
    ) -> Result<u64, CountError>;
}

impl CountingIndex for TreeDirectory {
    fn add(&self, txn: &mut Transaction, collection: &[u8], key: i64) -> Result<(), CountError> {
        Ok(Self::add(self, txn, collection, key)?)
    }

    fn remove(
        &self,
        txn: &mut Transaction,
        collection: &[u8],
        key: i64,
    ) -> Result<(), CountError> {
        Ok(Self::remove(self, txn, collection, key)?)
    }

    fn count(
        &self,
        txn: &mut Transaction,
        collection: &[u8],
        range: KeyRange,
    ) -> Result<u64, CountError> {
        Ok(Self::count(self, txn, collection, range)?)
    }
}

/// Reject keys the flat and bucket layouts cannot hold.
pub(crate) const fn check_key(key: i64) -> Result<(), CountError> {
    if key < 0 {
        return Err(CountError::NegativeKey(key));
    }
    Ok(())
}

/// Non-negative inclusive bounds of `range`, or `None` if no
/// non-negative key is inside it.
pub(crate) fn non_negative_bounds(range: KeyRange) -> Option<(i64, i64)> {
    let from = range.from.unwrap_or(0).max(0);
    let to = range.to.unwrap_or(i64::MAX);
    (from <= to).then_some((from, to))
}

/// One collection, named by a tuple, bound to an index.
#[derive(Debug, Clone)]
pub struct CountingCollection<I> {
    index: I,
    elements: Vec<Element>,
    key: Vec<u8>,
}

impl<I: CountingIndex> CountingCollection<I> {
    #[must_use]
    pub fn new(index: I, elements: &[Element]) -> Self {
        Self {
            index,
            elements: elements.to_vec(),
            key: tuple::pack(elements),
        }
    }

    /// Bind to a collection by its packed key.
    pub fn from_key(index: I, key: &[u8]) -> Result<Self, CountError> {
        let elements = tuple::unpack(key)?;
        Ok(Self {
            index,
            elements,
            key: key.to_vec(),
        })
    }

    #[must_use]
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Packed collection key passed to the index.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    #[must_use]
    pub const fn index(&self) -> &I {
        &self.index
    }

    pub fn add(&self, txn: &mut Transaction, key: i64) -> Result<(), CountError> {
        self.index.add(txn, &self.key, key)
    }

    pub fn remove(&self, txn: &mut Transaction, key: i64) -> Result<(), CountError> {
        self.index.remove(txn, &self.key, key)
    }

    pub fn count(&self, txn: &mut Transaction, range: KeyRange) -> Result<u64, CountError> {
        self.index.count(txn, &self.key, range)
    }

    /// Whether any key `>= from` is present.
    pub fn has_any(&self, txn: &mut Transaction, from: i64) -> Result<bool, CountError> {
        Ok(self.count(txn, KeyRange::from(from))? > 0)
    }
}
