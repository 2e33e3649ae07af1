//! Element keys plus one counter per fixed-width bucket of the key space.
//!
//! ```text
//! [collection, ELEMENTS, key]     -> ()
//! [collection, BUCKETS, bucket]   -> u64 little-endian
//! ```
//!
//! A count sums the counters of buckets that lie wholly inside the range
//! and scans element keys only in the two edge buckets.

use crate::counting::{CountError, CountingIndex, check_key, non_negative_bounds};
use crate::kv::Transaction;
use crate::kv::tuple::{Element, Subspace};
use crate::tree::KeyRange;

const ELEMENTS: i64 = 0;
const BUCKETS: i64 = 1;

/// Bucketed counter index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketIndex {
    space: Subspace,
    bucket_size: i64,
}

impl BucketIndex {
    pub const DEFAULT_BUCKET_SIZE: i64 = 64;

    /// Index under the default `("tally", "bucket")` subspace.
    ///
    /// A `bucket_size` below 1 is raised to 1.
    #[must_use]
    pub fn new(bucket_size: i64) -> Self {
        Self::with_subspace(
            Subspace::new(&[Element::from("tally"), Element::from("bucket")]),
            bucket_size,
        )
    }

    #[must_use]
    pub fn with_subspace(space: Subspace, bucket_size: i64) -> Self {
        Self {
            space,
            bucket_size: bucket_size.max(1),
        }
    }

    #[must_use]
    pub const fn bucket_size(&self) -> i64 {
        self.bucket_size
    }

    fn element_key(&self, collection: &[u8], key: i64) -> Vec<u8> {
        self.space.pack(&[
            Element::Bytes(collection.to_vec()),
            Element::Int(ELEMENTS),
            Element::Int(key),
        ])
    }

    fn bucket_key(&self, collection: &[u8], bucket: i64) -> Vec<u8> {
        self.space.pack(&[
            Element::Bytes(collection.to_vec()),
            Element::Int(BUCKETS),
            Element::Int(bucket),
        ])
    }

    fn read_counter(
        &self,
        txn: &mut Transaction,
        collection: &[u8],
        bucket: i64,
    ) -> Result<u64, CountError> {
        match txn.get(&self.bucket_key(collection, bucket))? {
            Some(bytes) => decode_counter(bucket, &bytes),
            None => Ok(0),
        }
    }

    fn write_counter(&self, txn: &mut Transaction, collection: &[u8], bucket: i64, value: u64) {
        let key = self.bucket_key(collection, bucket);
        if value == 0 {
            txn.clear(key);
        } else {
            txn.set(key, value.to_le_bytes().to_vec());
        }
    }

    /// Count element keys in `[from, to]`, all inside one bucket.
    fn scan_elements(
        &self,
        txn: &mut Transaction,
        collection: &[u8],
        from: i64,
        to: i64,
    ) -> Result<u64, CountError> {
        let begin = self.element_key(collection, from);
        let mut end = self.element_key(collection, to);
        end.push(0x00);
        Ok(txn.get_range(&begin, &end)?.len() as u64)
    }

    /// Sum the counters of buckets in `[first, last]`.
    fn sum_counters(
        &self,
        txn: &mut Transaction,
        collection: &[u8],
        first: i64,
        last: i64,
    ) -> Result<u64, CountError> {
        if first > last {
            return Ok(0);
        }
        let begin = self.bucket_key(collection, first);
        let mut end = self.bucket_key(collection, last);
        end.push(0x00);

        let mut total = 0;
        for (key, bytes) in txn.get_range(&begin, &end)? {
            let bucket = self
                .space
                .unpack(&key)?
                .last()
                .and_then(|element| match element {
                    Element::Int(bucket) => Some(*bucket),
                    _ => None,
                })
                .unwrap_or(first);
            total += decode_counter(bucket, &bytes)?;
        }
        Ok(total)
    }
}

impl Default for BucketIndex {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BUCKET_SIZE)
    }
}

fn decode_counter(bucket: i64, bytes: &[u8]) -> Result<u64, CountError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| CountError::CorruptCounter { bucket })?;
    Ok(u64::from_le_bytes(raw))
}

impl CountingIndex for BucketIndex {
    fn add(&self, txn: &mut Transaction, collection: &[u8], key: i64) -> Result<(), CountError> {
        check_key(key)?;
        let element = self.element_key(collection, key);
        if txn.get(&element)?.is_some() {
            return Ok(());
        }
        let bucket = key / self.bucket_size;
        let counter = self.read_counter(txn, collection, bucket)?;
        txn.set(element, Vec::new());
        self.write_counter(txn, collection, bucket, counter + 1);
        Ok(())
    }

    fn remove(
        &self,
        txn: &mut Transaction,
        collection: &[u8],
        key: i64,
    ) -> Result<(), CountError> {
        check_key(key)?;
        let element = self.element_key(collection, key);
        if txn.get(&element)?.is_none() {
            return Ok(());
        }
        let bucket = key / self.bucket_size;
        let counter = self.read_counter(txn, collection, bucket)?;
        txn.clear(element);
        self.write_counter(txn, collection, bucket, counter.saturating_sub(1));
        Ok(())
    }

    fn count(
        &self,
        txn: &mut Transaction,
        collection: &[u8],
        range: KeyRange,
    ) -> Result<u64, CountError> {
        let Some((from, to)) = non_negative_bounds(range) else {
            return Ok(0);
        };
        let (first, last) = (from / self.bucket_size, to / self.bucket_size);
        if first == last {
            return self.scan_elements(txn, collection, from, to);
        }

        let first_end = (first + 1) * self.bucket_size - 1;
        let last_start = last * self.bucket_size;
        let head = self.scan_elements(txn, collection, from, first_end)?;
        let middle = self.sum_counters(txn, collection, first + 1, last - 1)?;
        let tail = self.scan_elements(txn, collection, last_start, to)?;
        Ok(head + middle + tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{Database, KvConfig};

    #[test]
    fn test_bucket_counts_across_buckets() {
        let db = Database::in_memory(KvConfig::default());
        let index = BucketIndex::new(10);
        let mut txn = db.begin();
        for key in 0..100 {
            index.add(&mut txn, b"c", key).expect("add");
        }
        index.remove(&mut txn, b"c", 55).expect("remove");
        index.remove(&mut txn, b"c", 55).expect("remove twice");
        index.add(&mut txn, b"c", 3).expect("add twice");

        assert_eq!(index.count(&mut txn, b"c", KeyRange::all()).expect("count"), 99);
        assert_eq!(
            index.count(&mut txn, b"c", KeyRange::between(43, 60)).expect("count"),
            17
        );
        assert_eq!(
            index.count(&mut txn, b"c", KeyRange::between(12, 17)).expect("count"),
            6
        );
        assert_eq!(index.count(&mut txn, b"c", KeyRange::from(95)).expect("count"), 5);
    }

    #[test]
    fn test_bucket_counter_tracks_membership() {
        let db = Database::in_memory(KvConfig::default());
        let index = BucketIndex::new(4);
        let mut txn = db.begin();
        for key in [4, 5, 6] {
            index.add(&mut txn, b"c", key).expect("add");
        }
        index.add(&mut txn, b"c", 5).expect("add twice");
        assert_eq!(index.read_counter(&mut txn, b"c", 1).expect("counter"), 3);

        for key in [4, 5, 6] {
            index.remove(&mut txn, b"c", key).expect("remove");
        }
        assert_eq!(index.read_counter(&mut txn, b"c", 1).expect("counter"), 0);
        assert_eq!(
            txn.snapshot_get(&index.bucket_key(b"c", 1)).expect("get"),
            None,
            "empty bucket counter is deleted"
        );
    }

    #[test]
    fn test_bucket_rejects_negative_key_without_writing() {
        let db = Database::in_memory(KvConfig::default());
        let index = BucketIndex::default();
        let mut txn = db.begin();
        assert!(matches!(
            index.remove(&mut txn, b"c", -7),
            Err(CountError::NegativeKey(-7))
        ));
        assert_eq!(txn.pending_writes(), 0);
    }
}
