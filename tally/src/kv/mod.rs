//! Ordered transactional key-value store.
//!
//! The store keeps every key in byte order and gives each transaction a
//! consistent snapshot of the committed data as of the moment it began.
//! Conflicts between concurrent transactions are detected optimistically at
//! commit time: a transaction aborts with [`KvError::Conflict`] when any key
//! range it read was written by a transaction that committed after it began.
//!
//! # Usage
//!
//! ```
//! use tally::kv::{Database, KvConfig, KvError};
//!
//! let db = Database::in_memory(KvConfig::default());
//!
//! db.run(|txn| -> Result<(), KvError> {
//!     txn.set(b"hello".to_vec(), b"world".to_vec());
//!     Ok(())
//! })
//! .unwrap();
//!
//! let mut txn = db.begin();
//! assert_eq!(txn.get(b"hello").unwrap(), Some(b"world".to_vec()));
//! ```
//!
//! Durability is optional: [`Database::open`] appends every commit to a
//! checksummed log file and replays it on the next open.

mod database;
mod log;
mod transaction;
pub mod tuple;

pub use database::{Database, RetryableError};
pub use log::{CommitLog, CommitRecord, MutationRecord};
pub use transaction::{PreCommitHook, Transaction};

/// Store tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvConfig {
    /// Maximum number of attempts `Database::run` makes before giving up.
    pub retry_limit: u32,
    /// Number of recent commits kept for conflict detection. Transactions
    /// older than this window fail with `TransactionTooOld`.
    pub conflict_window: usize,
    /// Whether each commit is fsynced to the log before it becomes visible.
    pub sync_on_commit: bool,
}

impl KvConfig {
    pub const DEFAULT_RETRY_LIMIT: u32 = 10;
    pub const DEFAULT_CONFLICT_WINDOW: usize = 10_000;
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            retry_limit: Self::DEFAULT_RETRY_LIMIT,
            conflict_window: Self::DEFAULT_CONFLICT_WINDOW,
            sync_on_commit: true,
        }
    }
}

/// Errors that can occur during store operations.
#[derive(Debug)]
pub enum KvError {
    /// Commit log I/O error.
    Io(std::io::Error),
    /// A key range read by this transaction was written by a transaction
    /// that committed after this one began.
    Conflict,
    /// The transaction began before the oldest commit still tracked for
    /// conflict detection.
    TransactionTooOld { read_version: u64, horizon: u64 },
    /// A store lock was poisoned by a panicking thread.
    LockPoisoned,
}

impl std::fmt::Display for KvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Conflict => write!(f, "transaction conflict"),
            Self::TransactionTooOld {
                read_version,
                horizon,
            } => write!(
                f,
                "transaction too old: read version {read_version} is below horizon {horizon}"
            ),
            Self::LockPoisoned => write!(f, "store lock poisoned"),
        }
    }
}

impl std::error::Error for KvError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KvError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl RetryableError for KvError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict | Self::TransactionTooOld { .. })
    }
}
