//! One store key per present element; counting is a range scan.

use crate::counting::{CountError, CountingIndex, check_key, non_negative_bounds};
use crate::kv::Transaction;
use crate::kv::tuple::{Element, Subspace};
use crate::tree::KeyRange;

/// Element-per-key index. Count cost grows with the number of keys in the
/// range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatIndex {
    space: Subspace,
}

impl FlatIndex {
    /// Index under the default `("tally", "flat")` subspace.
    #[must_use]
    pub fn new() -> Self {
        Self::with_subspace(Subspace::new(&[Element::from("tally"), Element::from("flat")]))
    }

    #[must_use]
    pub const fn with_subspace(space: Subspace) -> Self {
        Self { space }
    }

    fn collection(&self, collection: &[u8]) -> Subspace {
        self.space.subspace(&[Element::Bytes(collection.to_vec())])
    }
}

impl Default for FlatIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingIndex for FlatIndex {
    fn add(&self, txn: &mut Transaction, collection: &[u8], key: i64) -> Result<(), CountError> {
        check_key(key)?;
        txn.set(self.collection(collection).pack(&[Element::Int(key)]), Vec::new());
        Ok(())
    }

    fn remove(
        &self,
        txn: &mut Transaction,
        collection: &[u8],
        key: i64,
    ) -> Result<(), CountError> {
        check_key(key)?;
        txn.clear(self.collection(collection).pack(&[Element::Int(key)]));
        Ok(())
    }

    fn count(
        &self,
        txn: &mut Transaction,
        collection: &[u8],
        range: KeyRange,
    ) -> Result<u64, CountError> {
        let space = self.collection(collection);
        let (whole_begin, whole_end) = space.range();
        txn.add_read_conflict_range(&whole_begin, &whole_end);

        let Some((from, to)) = non_negative_bounds(range) else {
            return Ok(0);
        };
        let begin = space.pack(&[Element::Int(from)]);
        let mut end = space.pack(&[Element::Int(to)]);
        end.push(0x00);
        Ok(txn.snapshot_get_range(&begin, &end)?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{Database, KvConfig};

    #[test]
    fn test_flat_counts_inclusive_range() {
        let db = Database::in_memory(KvConfig::default());
        let index = FlatIndex::new();
        let mut txn = db.begin();
        for key in 0..50 {
            index.add(&mut txn, b"c", key).expect("add");
        }
        index.add(&mut txn, b"c", 7).expect("add twice");
        index.remove(&mut txn, b"c", 8).expect("remove");
        index.remove(&mut txn, b"c", 99).expect("remove absent");

        assert_eq!(index.count(&mut txn, b"c", KeyRange::all()).expect("count"), 49);
        assert_eq!(
            index.count(&mut txn, b"c", KeyRange::between(5, 10)).expect("count"),
            5
        );
        assert_eq!(index.count(&mut txn, b"c", KeyRange::to(-3)).expect("count"), 0);
        assert_eq!(index.count(&mut txn, b"other", KeyRange::all()).expect("count"), 0);
    }

    #[test]
    fn test_flat_rejects_negative_key_without_writing() {
        let db = Database::in_memory(KvConfig::default());
        let index = FlatIndex::new();
        let mut txn = db.begin();
        assert!(matches!(
            index.add(&mut txn, b"c", -1),
            Err(CountError::NegativeKey(-1))
        ));
        assert_eq!(txn.pending_writes(), 0);
    }
}
