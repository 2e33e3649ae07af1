//! Seeded random workload for exercising trees against an in-memory model.
//!
//! Each run drives one collection with a reproducible mix of adds and
//! removes, committing every operation through [`Database::run`], and
//! checks random range counts against a `BTreeSet` after every
//! `check_every` operations. The run ends with a full [`verify`] of the
//! tree.
//!
//! [`verify`]: TreeDirectory::verify

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::kv::Database;
use crate::tree::{KeyRange, TreeDirectory, TreeError, TreeReport};

/// Configuration for one workload run.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Number of add/remove operations.
    pub operations: usize,
    /// Keys are drawn from `-key_space..key_space`.
    pub key_space: i64,
    /// Probability that an operation is an add (0.0 - 1.0).
    pub add_rate: f64,
    /// Operations between count checks. `0` checks only at the end.
    pub check_every: usize,
}

impl WorkloadConfig {
    #[must_use]
    pub const fn new(seed: u64, operations: usize) -> Self {
        Self {
            seed,
            operations,
            key_space: 1000,
            add_rate: 0.6,
            check_every: 100,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadReport {
    pub adds: usize,
    pub removes: usize,
    pub checks: usize,
    pub tree: TreeReport,
}

/// Errors that can occur during a workload run.
#[derive(Debug)]
pub enum WorkloadError {
    /// A tree operation failed.
    Tree(TreeError),
    /// A count disagreed with the model.
    Mismatch {
        range: KeyRange,
        expected: u64,
        actual: u64,
    },
}

impl std::fmt::Display for WorkloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tree(e) => write!(f, "tree error: {e}"),
            Self::Mismatch {
                range,
                expected,
                actual,
            } => write!(
                f,
                "count over {:?}..={:?} returned {actual}, expected {expected}",
                range.from, range.to
            ),
        }
    }
}

impl std::error::Error for WorkloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tree(e) => Some(e),
            Self::Mismatch { .. } => None,
        }
    }
}

impl From<TreeError> for WorkloadError {
    fn from(e: TreeError) -> Self {
        Self::Tree(e)
    }
}

fn model_count(model: &BTreeSet<i64>, range: KeyRange) -> u64 {
    if range.is_empty() {
        return 0;
    }
    let from = range.from.unwrap_or(i64::MIN);
    let to = range.to.unwrap_or(i64::MAX);
    model.range(from..=to).count() as u64
}

fn check(
    db: &Database,
    tree: &TreeDirectory,
    collection: &[u8],
    model: &BTreeSet<i64>,
    range: KeyRange,
) -> Result<(), WorkloadError> {
    let actual = tree.count(&mut db.begin(), collection, range)?;
    let expected = model_count(model, range);
    if actual != expected {
        return Err(WorkloadError::Mismatch {
            range,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Remove every key a previous run with the same key space could have
/// left behind.
fn reset(
    db: &Database,
    tree: &TreeDirectory,
    collection: &[u8],
    key_space: i64,
) -> Result<(), WorkloadError> {
    let keys: Vec<i64> = (-key_space..key_space).collect();
    for batch in keys.chunks(256) {
        db.run(|txn| -> Result<(), TreeError> {
            for &key in batch {
                tree.remove(txn, collection, key)?;
            }
            Ok(())
        })?;
    }
    check(db, tree, collection, &BTreeSet::new(), KeyRange::all())
}

/// Drive `collection` with the configured random mix.
pub fn run_collection(
    db: &Database,
    tree: &TreeDirectory,
    collection: &[u8],
    config: &WorkloadConfig,
) -> Result<WorkloadReport, WorkloadError> {
    let key_space = config.key_space.max(1);
    reset(db, tree, collection, key_space)?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut model = BTreeSet::new();
    let (mut adds, mut removes, mut checks) = (0, 0, 0);

    for step in 1..=config.operations {
        let key = rng.random_range(-key_space..key_space);
        if rng.random_bool(config.add_rate.clamp(0.0, 1.0)) {
            db.run(|txn| tree.add(txn, collection, key))?;
            model.insert(key);
            adds += 1;
        } else {
            db.run(|txn| tree.remove(txn, collection, key))?;
            model.remove(&key);
            removes += 1;
        }

        if config.check_every > 0 && step % config.check_every == 0 {
            let from = rng.random_range(-key_space..key_space);
            let to = from + rng.random_range(0..key_space);
            check(db, tree, collection, &model, KeyRange::between(from, to))?;
            checks += 1;
            tracing::debug!("step {step}: {} keys, counts agree", model.len());
        }
    }

    check(db, tree, collection, &model, KeyRange::all())?;
    checks += 1;
    let report = tree.verify(&mut db.begin(), collection)?;

    Ok(WorkloadReport {
        adds,
        removes,
        checks,
        tree: report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvConfig;

    #[test]
    fn test_workload_matches_model() {
        let db = Database::in_memory(KvConfig::default());
        let tree = TreeDirectory::new(6).expect("valid branch");
        let config = WorkloadConfig {
            key_space: 100,
            check_every: 10,
            ..WorkloadConfig::new(42, 500)
        };

        let report = run_collection(&db, &tree, b"w", &config).expect("run");
        assert_eq!(report.adds + report.removes, 500);
        assert_eq!(report.checks, 51);
        assert!(report.tree.values <= 200);
    }

    #[test]
    fn test_workload_is_deterministic() {
        let tree = TreeDirectory::new(6).expect("valid branch");
        let config = WorkloadConfig {
            key_space: 50,
            ..WorkloadConfig::new(9, 300)
        };

        let first_db = Database::in_memory(KvConfig::default());
        let second_db = Database::in_memory(KvConfig::default());
        let first = run_collection(&first_db, &tree, b"w", &config).expect("run");
        let second = run_collection(&second_db, &tree, b"w", &config).expect("run");
        assert_eq!(first, second);
    }

    #[test]
    fn test_rerun_starts_from_empty_collection() {
        let db = Database::in_memory(KvConfig::default());
        let tree = TreeDirectory::new(5).expect("valid branch");
        let config = WorkloadConfig {
            key_space: 40,
            ..WorkloadConfig::new(1, 200)
        };

        let first = run_collection(&db, &tree, b"w", &config).expect("first run");
        let second = run_collection(&db, &tree, b"w", &config).expect("second run");
        assert_eq!(first, second);
    }

    #[test]
    fn test_model_count_handles_empty_range() {
        let model: BTreeSet<i64> = (0..10).collect();
        assert_eq!(model_count(&model, KeyRange::between(5, 2)), 0);
        assert_eq!(model_count(&model, KeyRange::from(7)), 3);
    }
}
