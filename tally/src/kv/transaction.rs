//! Optimistic transactions with read-your-own-writes.
//!
//! A transaction buffers its writes locally and reads a snapshot of the
//! store at its read version. Writes become visible to others only when
//! [`Transaction::commit`] succeeds.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use crate::kv::{Database, KvError};

/// A callback run by [`Transaction::commit`] before validation.
///
/// Hooks may read and write through the transaction, and may register
/// further hooks.
pub type PreCommitHook = Box<dyn FnOnce(&mut Transaction) -> Result<(), KvError> + Send>;

/// A single-owner transaction against a [`Database`].
pub struct Transaction {
    db: Database,
    read_version: u64,
    /// Pending writes. `None` clears the key.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// Half-open ranges whose contents this transaction depends on.
    read_conflicts: Vec<(Vec<u8>, Vec<u8>)>,
    pre_commit: Vec<PreCommitHook>,
    /// Per-transaction state owned by layers above the store.
    extensions: HashMap<Vec<u8>, Box<dyn Any + Send>>,
}

/// The smallest key strictly greater than `key`.
fn key_after(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0x00);
    next
}

impl Transaction {
    pub(crate) fn new(db: Database, read_version: u64) -> Self {
        Self {
            db,
            read_version,
            writes: BTreeMap::new(),
            read_conflicts: Vec::new(),
            pre_commit: Vec::new(),
            extensions: HashMap::new(),
        }
    }

    /// The committed version this transaction reads.
    #[must_use]
    pub const fn read_version(&self) -> u64 {
        self.read_version
    }

    /// Read a key, registering a conflict on it.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.read_conflicts.push((key.to_vec(), key_after(key)));
        self.snapshot_get(key)
    }

    /// Read a key without registering a conflict.
    pub fn snapshot_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        self.db.read(key, self.read_version)
    }

    /// Read every key in `[begin, end)`, registering a conflict on the whole
    /// range.
    pub fn get_range(
        &mut self,
        begin: &[u8],
        end: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        self.add_read_conflict_range(begin, end);
        self.snapshot_get_range(begin, end)
    }

    /// Read every key in `[begin, end)` without registering a conflict.
    pub fn snapshot_get_range(
        &self,
        begin: &[u8],
        end: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        if begin >= end {
            return Ok(Vec::new());
        }

        let committed = self.db.read_range(begin, end, self.read_version)?;
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = committed.into_iter().collect();
        for (key, pending) in self.writes.range::<[u8], _>((
            std::ops::Bound::Included(begin),
            std::ops::Bound::Excluded(end),
        )) {
            match pending {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Make this transaction conflict with any concurrent write inside
    /// `[begin, end)`.
    pub fn add_read_conflict_range(&mut self, begin: &[u8], end: &[u8]) {
        if begin < end {
            self.read_conflicts.push((begin.to_vec(), end.to_vec()));
        }
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    pub fn clear(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// Register a callback to run at the start of [`commit`](Self::commit).
    pub fn on_pre_commit(&mut self, hook: PreCommitHook) {
        self.pre_commit.push(hook);
    }

    /// Remove and return the extension stored under `key`.
    ///
    /// Returns `None` if nothing is stored there or it has a different type;
    /// a value of a different type stays in place.
    pub fn take_extension<T: Any + Send>(&mut self, key: &[u8]) -> Option<T> {
        let boxed = self.extensions.remove(key)?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.extensions.insert(key.to_vec(), other);
                None
            }
        }
    }

    /// Store an extension under `key`, replacing any previous one.
    pub fn put_extension<T: Any + Send>(&mut self, key: Vec<u8>, value: T) {
        self.extensions.insert(key, Box::new(value));
    }

    /// Number of pending key writes.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Run pre-commit hooks, then validate and apply the writes.
    ///
    /// Returns the commit version.
    pub fn commit(mut self) -> Result<u64, KvError> {
        while !self.pre_commit.is_empty() {
            let hooks = std::mem::take(&mut self.pre_commit);
            for hook in hooks {
                hook(&mut self)?;
            }
        }

        let writes = std::mem::take(&mut self.writes);
        let read_conflicts = std::mem::take(&mut self.read_conflicts);
        self.db.commit(self.read_version, &read_conflicts, writes)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.writes.is_empty() || !self.pre_commit.is_empty() {
            tracing::trace!(
                "transaction at version {} dropped with {} uncommitted writes",
                self.read_version,
                self.writes.len()
            );
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("read_version", &self.read_version)
            .field("writes", &self.writes.len())
            .field("read_conflicts", &self.read_conflicts.len())
            .field("pre_commit", &self.pre_commit.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::kv::KvConfig;

    #[test]
    fn test_read_your_own_writes() {
        let db = Database::in_memory(KvConfig::default());
        let mut txn = db.begin();

        txn.set(b"a".to_vec(), b"1".to_vec());
        txn.set(b"b".to_vec(), b"2".to_vec());
        txn.clear(b"b".to_vec());

        assert_eq!(txn.get(b"a").expect("get"), Some(b"1".to_vec()));
        assert_eq!(txn.get(b"b").expect("get"), None);
        assert_eq!(
            txn.get_range(b"a", b"z").expect("range"),
            vec![(b"a".to_vec(), b"1".to_vec())]
        );
    }

    #[test]
    fn test_range_merges_committed_and_pending() {
        let db = Database::in_memory(KvConfig::default());
        let mut setup = db.begin();
        setup.set(b"b".to_vec(), b"old".to_vec());
        setup.set(b"c".to_vec(), b"doomed".to_vec());
        setup.commit().expect("commit");

        let mut txn = db.begin();
        txn.set(b"a".to_vec(), b"new".to_vec());
        txn.set(b"b".to_vec(), b"updated".to_vec());
        txn.clear(b"c".to_vec());

        let keys: Vec<Vec<u8>> = txn
            .snapshot_get_range(b"a", b"d")
            .expect("range")
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_pre_commit_hook_writes_are_committed() {
        let db = Database::in_memory(KvConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut txn = db.begin();
        let seen = Arc::clone(&calls);
        txn.on_pre_commit(Box::new(move |txn| {
            seen.fetch_add(1, Ordering::SeqCst);
            txn.set(b"flushed".to_vec(), b"yes".to_vec());
            Ok(())
        }));
        txn.commit().expect("commit");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            db.begin().get(b"flushed").expect("get"),
            Some(b"yes".to_vec())
        );
    }

    #[test]
    fn test_extensions_are_typed() {
        let db = Database::in_memory(KvConfig::default());
        let mut txn = db.begin();

        txn.put_extension(b"slot".to_vec(), 7u32);
        assert_eq!(txn.take_extension::<String>(b"slot"), None);
        assert_eq!(txn.take_extension::<u32>(b"slot"), Some(7));
        assert_eq!(txn.take_extension::<u32>(b"slot"), None);
    }

    #[test]
    fn test_dropped_transaction_writes_nothing() {
        let db = Database::in_memory(KvConfig::default());
        {
            let mut txn = db.begin();
            txn.set(b"k".to_vec(), b"v".to_vec());
        }
        assert_eq!(db.begin().get(b"k").expect("get"), None);
    }
}
