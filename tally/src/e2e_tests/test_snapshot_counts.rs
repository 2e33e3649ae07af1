//! Counts observe the transaction's snapshot plus its own writes.

use super::helpers::{add_keys, count};
use crate::testing::{new_test_database, small_tree};
use crate::tree::KeyRange;

const C: &[u8] = b"snap";

#[test]
fn test_count_reads_its_snapshot() {
    let db = new_test_database();
    let tree = small_tree();
    add_keys(&db, &tree, C, &(0..50).collect::<Vec<_>>());

    let mut reader = db.begin();
    add_keys(&db, &tree, C, &(50..100).collect::<Vec<_>>());

    assert_eq!(tree.count(&mut reader, C, KeyRange::all()).expect("count"), 50);
    assert_eq!(count(&db, &tree, C, KeyRange::all()), 100);
}

#[test]
fn test_count_sees_own_writes() {
    let db = new_test_database();
    let tree = small_tree();
    add_keys(&db, &tree, C, &[1, 2, 3]);

    let mut txn = db.begin();
    tree.add(&mut txn, C, 4).expect("add");
    tree.remove(&mut txn, C, 1).expect("remove");
    assert_eq!(tree.count(&mut txn, C, KeyRange::all()).expect("count"), 3);
    assert_eq!(tree.count(&mut txn, C, KeyRange::to(1)).expect("count"), 0);

    // Not committed: other transactions still see the old keys.
    assert_eq!(count(&db, &tree, C, KeyRange::to(1)), 1);
    drop(txn);
    assert_eq!(count(&db, &tree, C, KeyRange::all()), 3);
}

#[test]
fn test_read_only_count_commits_without_conflict() {
    let db = new_test_database();
    let tree = small_tree();
    add_keys(&db, &tree, C, &[1, 2, 3]);

    let mut reader = db.begin();
    assert_eq!(tree.count(&mut reader, C, KeyRange::all()).expect("count"), 3);
    add_keys(&db, &tree, C, &[4]);
    reader.commit().expect("read-only commit");
}
