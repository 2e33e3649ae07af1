//! Common helpers for end-to-end tests.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::counting::{CountError, CountingIndex};
use crate::kv::Database;
use crate::tree::{KeyRange, TreeDirectory, TreeError};

/// Add every key in one transaction.
pub fn add_keys(db: &Database, tree: &TreeDirectory, collection: &[u8], keys: &[i64]) {
    db.run(|txn| -> Result<(), TreeError> {
        for &key in keys {
            tree.add(txn, collection, key)?;
        }
        Ok(())
    })
    .expect("add keys");
}

/// Count in a fresh transaction.
pub fn count(db: &Database, tree: &TreeDirectory, collection: &[u8], range: KeyRange) -> u64 {
    tree.count(&mut db.begin(), collection, range)
        .expect("count")
}

/// Count through any index in a fresh transaction.
pub fn index_count<I: CountingIndex>(
    db: &Database,
    index: &I,
    collection: &[u8],
    range: KeyRange,
) -> Result<u64, CountError> {
    index.count(&mut db.begin(), collection, range)
}

/// Expected count of `model` over `range`.
pub fn model_count(model: &BTreeSet<i64>, range: KeyRange) -> u64 {
    if range.is_empty() {
        return 0;
    }
    model
        .range(range.from.unwrap_or(i64::MIN)..=range.to.unwrap_or(i64::MAX))
        .count() as u64
}

/// A seeded stream of `(key, is_add)` operations over `0..key_space`.
pub fn operations(seed: u64, count: usize, key_space: i64) -> Vec<(i64, bool)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (rng.random_range(0..key_space), rng.random_bool(0.6)))
        .collect()
}

/// A seeded range over `0..key_space`, sometimes open on one side.
pub fn random_range(rng: &mut StdRng, key_space: i64) -> KeyRange {
    let from = rng.random_range(0..key_space);
    let to = from + rng.random_range(0..key_space);
    match rng.random_range(0..4) {
        0 => KeyRange::from(from),
        1 => KeyRange::to(to),
        _ => KeyRange::between(from, to),
    }
}
