//! Trees stored in a file-backed store survive reopening.

use std::io::Write;

use super::helpers::{add_keys, count};
use crate::testing::{TestStore, small_tree};
use crate::tree::{KeyRange, NO_NODE, NodeStore, TreeError};

const C: &[u8] = b"durable";

#[test]
fn test_tree_survives_reopen() {
    let store = TestStore::new().expect("temp store");
    let tree = small_tree();
    {
        let db = store.open().expect("open");
        let keys: Vec<i64> = (-100..100).collect();
        add_keys(&db, &tree, C, &keys);
    }

    let db = store.open().expect("reopen");
    assert_eq!(count(&db, &tree, C, KeyRange::all()), 200);
    assert_eq!(count(&db, &tree, C, KeyRange::between(-10, 10)), 21);
    let report = tree.verify(&mut db.begin(), C).expect("valid tree");
    assert_eq!(report.values, 200);

    add_keys(&db, &tree, C, &[500, 501]);
    drop(db);
    let db = store.open().expect("reopen again");
    assert_eq!(count(&db, &tree, C, KeyRange::from(100)), 2);
}

#[test]
fn test_torn_tail_is_discarded() {
    let store = TestStore::new().expect("temp store");
    let tree = small_tree();
    {
        let db = store.open().expect("open");
        add_keys(&db, &tree, C, &(0..50).collect::<Vec<_>>());
    }

    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(store.path())
            .expect("open log");
        file.write_all(&[0x20, 0, 0, 0, 0xDE, 0xAD]).expect("append garbage");
    }

    let db = store.open().expect("reopen with torn tail");
    assert_eq!(count(&db, &tree, C, KeyRange::all()), 50);
    add_keys(&db, &tree, C, &[50]);
    drop(db);

    let db = store.open().expect("reopen after repair");
    assert_eq!(count(&db, &tree, C, KeyRange::all()), 51);
}

#[test]
fn test_emptied_tree_reopens_empty() {
    let store = TestStore::new().expect("temp store");
    let tree = small_tree();
    {
        let db = store.open().expect("open");
        add_keys(&db, &tree, C, &[3, 1, 2]);
        db.run(|txn| -> Result<(), TreeError> {
            for key in [1, 2, 3] {
                tree.remove(txn, C, key)?;
            }
            Ok(())
        })
        .expect("remove");
    }

    let db = store.open().expect("reopen");
    let mut txn = db.begin();
    let mut nodes = NodeStore::open(&mut txn, tree.keys(C));
    assert_eq!(nodes.root().expect("root"), NO_NODE);
}
