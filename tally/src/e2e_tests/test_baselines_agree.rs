//! The tree and the baseline indexes give the same answers.

use std::collections::BTreeSet;

use rand::SeedableRng;
use rand::rngs::StdRng;

use super::helpers::{index_count, model_count, operations, random_range};
use crate::counting::{BucketIndex, CountError, CountingCollection, CountingIndex, FlatIndex};
use crate::kv::tuple::Element;
use crate::testing::{new_test_database, small_tree};
use crate::tree::KeyRange;

const C: &[u8] = b"agree";

#[test]
fn test_indexes_agree_on_random_workload() {
    let db = new_test_database();
    let tree = small_tree();
    let flat = FlatIndex::new();
    let bucket = BucketIndex::new(16);
    let mut model = BTreeSet::new();
    let mut rng = StdRng::seed_from_u64(3);

    for (step, (key, adding)) in operations(11, 1500, 500).into_iter().enumerate() {
        db.run(|txn| -> Result<(), CountError> {
            if adding {
                tree.add(txn, C, key)?;
                flat.add(txn, C, key)?;
                bucket.add(txn, C, key)?;
            } else {
                tree.remove(txn, C, key)?;
                flat.remove(txn, C, key)?;
                bucket.remove(txn, C, key)?;
            }
            Ok(())
        })
        .expect("apply operation");
        if adding {
            model.insert(key);
        } else {
            model.remove(&key);
        }

        if step % 50 == 0 {
            let range = random_range(&mut rng, 500);
            let expected = model_count(&model, range);
            assert_eq!(index_count(&db, &tree, C, range).expect("tree"), expected);
            assert_eq!(index_count(&db, &flat, C, range).expect("flat"), expected);
            assert_eq!(index_count(&db, &bucket, C, range).expect("bucket"), expected);
        }
    }

    let total = model.len() as u64;
    assert_eq!(index_count(&db, &tree, C, KeyRange::all()).expect("tree"), total);
    assert_eq!(index_count(&db, &bucket, C, KeyRange::all()).expect("bucket"), total);
    tree.verify(&mut db.begin(), C).expect("valid tree");
}

#[test]
fn test_baselines_reject_negative_keys() {
    let db = new_test_database();
    let tree = small_tree();
    let bucket = BucketIndex::default();

    let result = db.run(|txn| -> Result<(), CountError> {
        tree.add(txn, C, -5)?;
        bucket.add(txn, C, -5)?;
        Ok(())
    });
    assert!(matches!(result, Err(CountError::NegativeKey(-5))));

    // The whole transaction was dropped, tree write included.
    assert_eq!(index_count(&db, &tree, C, KeyRange::all()).expect("tree"), 0);

    db.run(|txn| tree.add(txn, C, -5)).expect("tree accepts negatives");
    assert_eq!(index_count(&db, &tree, C, KeyRange::to(0)).expect("tree"), 1);
}

#[test]
fn test_collections_bind_by_tuple() {
    let db = new_test_database();
    let name = [Element::from("scores"), Element::Int(2024)];
    let by_tree = CountingCollection::new(small_tree(), &name);
    let by_bucket = CountingCollection::new(BucketIndex::new(8), &name);

    db.run(|txn| -> Result<(), CountError> {
        for key in [1, 4, 9, 16, 25, 36] {
            by_tree.add(txn, key)?;
            by_bucket.add(txn, key)?;
        }
        Ok(())
    })
    .expect("add");

    let mut txn = db.begin();
    for range in [KeyRange::between(4, 25), KeyRange::from(17), KeyRange::to(3)] {
        assert_eq!(
            by_tree.count(&mut txn, range).expect("tree"),
            by_bucket.count(&mut txn, range).expect("bucket")
        );
    }
    assert!(by_tree.has_any(&mut txn, 36).expect("has_any"));
    assert!(!by_bucket.has_any(&mut txn, 37).expect("has_any"));

    let other = CountingCollection::new(small_tree(), &[Element::from("scores"), Element::Int(2025)]);
    assert_eq!(other.count(&mut txn, KeyRange::all()).expect("count"), 0);
}
