//! Shared store state: versioned data, commit validation, and the retry loop.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::kv::log::{CommitLog, CommitRecord, MutationRecord};
use crate::kv::transaction::Transaction;
use crate::kv::{KvConfig, KvError};

/// Errors that tell a transaction runtime whether to try again.
pub trait RetryableError {
    /// Whether running the whole transaction again may succeed.
    fn is_retryable(&self) -> bool;
}

/// A handle to an open store.
///
/// Cloning is cheap; all clones share the same data.
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

struct Shared {
    state: RwLock<State>,
    /// Only present for file-backed stores.
    log: Option<Mutex<CommitLog>>,
    config: KvConfig,
}

/// One committed value of a key. `None` is a deletion.
#[derive(Debug, Clone)]
struct Version {
    version: u64,
    value: Option<Vec<u8>>,
}

/// The keys written by one commit, kept while it can still conflict.
#[derive(Debug)]
struct CommittedWrites {
    version: u64,
    /// Sorted.
    keys: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    /// Version chains, oldest first.
    data: BTreeMap<Vec<u8>, Vec<Version>>,
    /// Latest committed version.
    version: u64,
    /// Commits newer than `horizon`, oldest first.
    recent: VecDeque<CommittedWrites>,
    /// Transactions must read at or above this version.
    horizon: u64,
}

impl State {
    fn check_horizon(&self, read_version: u64) -> Result<(), KvError> {
        if read_version < self.horizon {
            return Err(KvError::TransactionTooOld {
                read_version,
                horizon: self.horizon,
            });
        }
        Ok(())
    }

    fn value_at(&self, key: &[u8], read_version: u64) -> Option<&Vec<u8>> {
        visible(self.data.get(key)?, read_version)
    }

    /// Drop versions of `key` that no transaction at or above `horizon` can
    /// observe.
    fn prune(&mut self, key: &[u8]) {
        let horizon = self.horizon;
        let Some(chain) = self.data.get_mut(key) else {
            return;
        };
        let keep_from = chain
            .iter()
            .rposition(|v| v.version <= horizon)
            .unwrap_or(0);
        chain.drain(..keep_from);
        if chain.len() == 1 && chain[0].value.is_none() && chain[0].version <= horizon {
            self.data.remove(key);
        }
    }
}

fn visible(chain: &[Version], read_version: u64) -> Option<&Vec<u8>> {
    chain
        .iter()
        .rev()
        .find(|v| v.version <= read_version)
        .and_then(|v| v.value.as_ref())
}

/// Whether any key in sorted `keys` falls inside `[begin, end)`.
fn intersects(keys: &[Vec<u8>], begin: &[u8], end: &[u8]) -> bool {
    let idx = keys.partition_point(|k| k.as_slice() < begin);
    keys.get(idx).is_some_and(|k| k.as_slice() < end)
}

impl Database {
    /// Create an empty store that lives only in memory.
    #[must_use]
    pub fn in_memory(config: KvConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(State::default()),
                log: None,
                config,
            }),
        }
    }

    /// Open a file-backed store, replaying its commit log.
    ///
    /// The file is created if it doesn't exist.
    pub fn open(path: &Path, config: KvConfig) -> Result<Self, KvError> {
        let (log, records) = CommitLog::open(path, config.sync_on_commit)?;

        let mut state = State::default();
        for record in &records {
            for mutation in &record.mutations {
                match &mutation.value {
                    Some(value) => {
                        state.data.insert(
                            mutation.key.clone(),
                            vec![Version {
                                version: record.version,
                                value: Some(value.clone()),
                            }],
                        );
                    }
                    None => {
                        state.data.remove(&mutation.key);
                    }
                }
            }
            state.version = record.version;
        }
        state.horizon = state.version;

        tracing::info!(
            "opened store {}: {} commits replayed, {} keys, version {}",
            path.display(),
            records.len(),
            state.data.len(),
            state.version
        );

        Ok(Self {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
                log: Some(Mutex::new(log)),
                config,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &KvConfig {
        &self.shared.config
    }

    /// Begin a transaction reading the latest committed version.
    ///
    /// A poisoned lock is read through: state is only mutated after a commit
    /// has been fully validated.
    #[must_use]
    pub fn begin(&self) -> Transaction {
        let version = self
            .shared
            .state
            .read()
            .map_or_else(|poisoned| poisoned.into_inner().version, |state| state.version);
        Transaction::new(self.clone(), version)
    }

    /// Run `body` in a fresh transaction and commit it, retrying the whole
    /// transaction on conflicts.
    ///
    /// `body` may run several times and must not have side effects outside
    /// the transaction. Gives up after `retry_limit` attempts and returns the
    /// last error.
    pub fn run<T, E, F>(&self, mut body: F) -> Result<T, E>
    where
        F: FnMut(&mut Transaction) -> Result<T, E>,
        E: From<KvError> + RetryableError + std::fmt::Display,
    {
        let limit = self.shared.config.retry_limit.max(1);
        let mut attempt = 1;
        loop {
            let mut txn = self.begin();
            let error = match body(&mut txn) {
                Ok(value) => match txn.commit() {
                    Ok(_) => return Ok(value),
                    Err(e) => E::from(e),
                },
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= limit {
                return Err(error);
            }
            tracing::warn!("retrying transaction (attempt {attempt} of {limit}): {error}");
            attempt += 1;
        }
    }

    /// Latest committed version.
    pub fn version(&self) -> Result<u64, KvError> {
        Ok(self.read_state()?.version)
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, State>, KvError> {
        self.shared.state.read().map_err(|_| KvError::LockPoisoned)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, State>, KvError> {
        self.shared.state.write().map_err(|_| KvError::LockPoisoned)
    }

    pub(crate) fn read(&self, key: &[u8], read_version: u64) -> Result<Option<Vec<u8>>, KvError> {
        let state = self.read_state()?;
        state.check_horizon(read_version)?;
        Ok(state.value_at(key, read_version).cloned())
    }

    pub(crate) fn read_range(
        &self,
        begin: &[u8],
        end: &[u8],
        read_version: u64,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        if begin >= end {
            return Ok(Vec::new());
        }
        let state = self.read_state()?;
        state.check_horizon(read_version)?;
        Ok(state
            .data
            .range::<[u8], _>((
                std::ops::Bound::Included(begin),
                std::ops::Bound::Excluded(end),
            ))
            .filter_map(|(key, chain)| {
                visible(chain, read_version).map(|value| (key.clone(), value.clone()))
            })
            .collect())
    }

    /// Validate and apply a transaction's writes.
    ///
    /// Returns the commit version. Read-only transactions commit at their
    /// read version without validation.
    pub(crate) fn commit(
        &self,
        read_version: u64,
        read_conflicts: &[(Vec<u8>, Vec<u8>)],
        writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    ) -> Result<u64, KvError> {
        if writes.is_empty() {
            return Ok(read_version);
        }

        let mut state = self.write_state()?;
        state.check_horizon(read_version)?;

        let conflicted = state
            .recent
            .iter()
            .filter(|commit| commit.version > read_version)
            .any(|commit| {
                read_conflicts
                    .iter()
                    .any(|(begin, end)| intersects(&commit.keys, begin, end))
            });
        if conflicted {
            return Err(KvError::Conflict);
        }

        let version = state.version + 1;

        if let Some(log) = &self.shared.log {
            let record = CommitRecord {
                version,
                mutations: writes
                    .iter()
                    .map(|(key, value)| MutationRecord {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect(),
            };
            log.lock()
                .map_err(|_| KvError::LockPoisoned)?
                .append(&record)?;
        }

        let mut keys = Vec::with_capacity(writes.len());
        for (key, value) in writes {
            state
                .data
                .entry(key.clone())
                .or_default()
                .push(Version { version, value });
            keys.push(key);
        }
        state.version = version;
        state.recent.push_back(CommittedWrites { version, keys });

        while state.recent.len() > self.shared.config.conflict_window.max(1) {
            let Some(expired) = state.recent.pop_front() else {
                break;
            };
            state.horizon = expired.version;
            for key in &expired.keys {
                state.prune(key);
            }
        }

        tracing::debug!("committed version {version}");
        Ok(version)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.shared.config)
            .field("durable", &self.shared.log.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn put(db: &Database, key: &[u8], value: &[u8]) {
        let mut txn = db.begin();
        txn.set(key.to_vec(), value.to_vec());
        txn.commit().expect("commit");
    }

    #[test]
    fn test_snapshot_isolation() {
        let db = Database::in_memory(KvConfig::default());
        put(&db, b"a", b"1");

        let mut reader = db.begin();
        put(&db, b"a", b"2");

        assert_eq!(reader.get(b"a").expect("get"), Some(b"1".to_vec()));
        assert_eq!(db.begin().get(b"a").expect("get"), Some(b"2".to_vec()));
    }

    #[test]
    fn test_read_write_conflict_aborts() {
        let db = Database::in_memory(KvConfig::default());
        put(&db, b"counter", b"0");

        let mut first = db.begin();
        let mut second = db.begin();
        first.get(b"counter").expect("get");
        second.get(b"counter").expect("get");
        first.set(b"counter".to_vec(), b"1".to_vec());
        second.set(b"counter".to_vec(), b"2".to_vec());

        first.commit().expect("first commit");
        assert!(matches!(second.commit(), Err(KvError::Conflict)));
    }

    #[test]
    fn test_disjoint_transactions_both_commit() {
        let db = Database::in_memory(KvConfig::default());

        let mut first = db.begin();
        let mut second = db.begin();
        first.get(b"x").expect("get");
        second.get(b"y").expect("get");
        first.set(b"x".to_vec(), b"1".to_vec());
        second.set(b"y".to_vec(), b"1".to_vec());

        first.commit().expect("first commit");
        second.commit().expect("second commit");
    }

    #[test]
    fn test_range_read_conflicts_with_insert_inside_range() {
        let db = Database::in_memory(KvConfig::default());

        let mut scanner = db.begin();
        assert!(scanner.get_range(b"a", b"m").expect("range").is_empty());
        scanner.set(b"summary".to_vec(), b"0".to_vec());

        put(&db, b"c", b"phantom");
        assert!(matches!(scanner.commit(), Err(KvError::Conflict)));
    }

    #[test]
    fn test_snapshot_range_read_does_not_conflict() {
        let db = Database::in_memory(KvConfig::default());

        let mut scanner = db.begin();
        scanner.snapshot_get_range(b"a", b"m").expect("range");
        scanner.set(b"summary".to_vec(), b"0".to_vec());

        put(&db, b"c", b"phantom");
        scanner.commit().expect("snapshot reads register no conflict");
    }

    #[test]
    fn test_old_transaction_is_refused_past_window() {
        let config = KvConfig {
            conflict_window: 2,
            ..KvConfig::default()
        };
        let db = Database::in_memory(config);

        let mut stale = db.begin();
        for i in 0..4u8 {
            put(&db, &[i], b"v");
        }

        assert!(matches!(
            stale.get(b"anything"),
            Err(KvError::TransactionTooOld { .. })
        ));
    }

    #[test]
    fn test_pruning_keeps_latest_value() {
        let config = KvConfig {
            conflict_window: 1,
            ..KvConfig::default()
        };
        let db = Database::in_memory(config);
        for value in [b"1", b"2", b"3"] {
            put(&db, b"k", value);
        }
        let mut txn = db.begin();
        txn.clear(b"gone".to_vec());
        txn.commit().expect("commit");
        put(&db, b"other", b"x");

        assert_eq!(db.begin().get(b"k").expect("get"), Some(b"3".to_vec()));
        let state = db.read_state().expect("state");
        assert_eq!(state.data.get(b"k".as_slice()).map(Vec::len), Some(1));
        assert!(!state.data.contains_key(b"gone".as_slice()));
    }

    #[test]
    fn test_run_retries_conflicts() {
        let db = Database::in_memory(KvConfig::default());
        put(&db, b"n", b"0");

        let mut attempts = 0;
        let result: Result<(), KvError> = db.run(|txn| {
            attempts += 1;
            txn.get(b"n")?;
            if attempts == 1 {
                put(&db, b"n", b"interloper");
            }
            txn.set(b"n".to_vec(), b"mine".to_vec());
            Ok(())
        });

        result.expect("run");
        assert_eq!(attempts, 2);
        assert_eq!(db.begin().get(b"n").expect("get"), Some(b"mine".to_vec()));
    }

    #[test]
    fn test_run_gives_up_after_retry_limit() {
        let config = KvConfig {
            retry_limit: 3,
            ..KvConfig::default()
        };
        let db = Database::in_memory(config);

        let mut attempts = 0;
        let result: Result<(), KvError> = db.run(|_| {
            attempts += 1;
            Err(KvError::Conflict)
        });

        assert!(matches!(result, Err(KvError::Conflict)));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("store.log");

        {
            let db = Database::open(&path, KvConfig::default()).expect("open");
            put(&db, b"a", b"1");
            put(&db, b"b", b"2");
            let mut txn = db.begin();
            txn.clear(b"a".to_vec());
            txn.commit().expect("commit");
        }

        let db = Database::open(&path, KvConfig::default()).expect("reopen");
        let mut txn = db.begin();
        assert_eq!(txn.get(b"a").expect("get"), None);
        assert_eq!(txn.get(b"b").expect("get"), Some(b"2".to_vec()));
        assert_eq!(db.version().expect("version"), 3);
    }
}
