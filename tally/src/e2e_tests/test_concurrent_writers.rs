//! Concurrent transactions on shared and separate trees.

use std::thread;

use super::helpers::{add_keys, count};
use crate::kv::{Database, KvConfig, KvError};
use crate::testing::{new_test_database, small_tree};
use crate::tree::{KeyRange, TreeError};
use crate::workload::{WorkloadConfig, run_collection};

#[test]
fn test_overlapping_tree_writes_conflict() {
    let db = new_test_database();
    let tree = small_tree();
    add_keys(&db, &tree, b"shared", &[1]);

    let mut first = db.begin();
    let mut second = db.begin();
    tree.add(&mut first, b"shared", 10).expect("add");
    tree.add(&mut second, b"shared", 20).expect("add");

    first.commit().expect("first commit");
    assert!(matches!(second.commit(), Err(KvError::Conflict)));
    assert_eq!(count(&db, &tree, b"shared", KeyRange::all()), 2);
}

#[test]
fn test_separate_collections_both_commit() {
    let db = new_test_database();
    let tree = small_tree();
    add_keys(&db, &tree, b"left", &[1, 2, 3]);
    add_keys(&db, &tree, b"right", &[1, 2, 3]);

    let mut first = db.begin();
    let mut second = db.begin();
    for key in 10..30 {
        tree.add(&mut first, b"left", key).expect("add");
        tree.add(&mut second, b"right", -key).expect("add");
    }
    first.commit().expect("first commit");
    second.commit().expect("second commit");

    assert_eq!(count(&db, &tree, b"left", KeyRange::all()), 23);
    assert_eq!(count(&db, &tree, b"right", KeyRange::to(0)), 20);
}

#[test]
fn test_threads_retry_into_one_consistent_tree() {
    let db = Database::in_memory(KvConfig {
        retry_limit: 10_000,
        ..KvConfig::default()
    });
    let tree = small_tree();

    thread::scope(|scope| {
        for worker in 0..4_i64 {
            let (db, tree) = (&db, &tree);
            scope.spawn(move || {
                for i in 0..100 {
                    db.run(|txn| tree.add(txn, b"shared", worker * 1000 + i))
                        .expect("add with retries");
                }
            });
        }
    });

    assert_eq!(count(&db, &tree, b"shared", KeyRange::all()), 400);
    assert_eq!(count(&db, &tree, b"shared", KeyRange::between(1000, 1099)), 100);
    let report = tree.verify(&mut db.begin(), b"shared").expect("valid tree");
    assert_eq!(report.values, 400);
}

#[test]
fn test_retry_limit_surfaces_conflict() {
    let db = Database::in_memory(KvConfig {
        retry_limit: 2,
        ..KvConfig::default()
    });
    let tree = small_tree();
    add_keys(&db, &tree, b"c", &[1]);

    let mut attempts = 0;
    let result = db.run(|txn| -> Result<(), TreeError> {
        attempts += 1;
        tree.add(txn, b"c", 100 + attempts)?;
        // Commit a competing write after this transaction has read the tree.
        let mut rival = db.begin();
        tree.add(&mut rival, b"c", -attempts)?;
        rival.commit()?;
        Ok(())
    });

    assert!(matches!(result, Err(TreeError::Kv(KvError::Conflict))));
    assert_eq!(attempts, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_workloads_in_parallel() {
    let db = new_test_database();
    let tree = small_tree();

    let mut tasks = tokio::task::JoinSet::new();
    for index in 0..3_u64 {
        let (db, tree) = (db.clone(), tree.clone());
        tasks.spawn_blocking(move || {
            let config = WorkloadConfig {
                key_space: 200,
                check_every: 25,
                ..WorkloadConfig::new(index, 400)
            };
            run_collection(&db, &tree, format!("w{index}").as_bytes(), &config)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let report = joined.expect("task").expect("workload");
        assert_eq!(report.adds + report.removes, 400);
    }
}
