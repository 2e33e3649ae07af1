use std::path::{Path, PathBuf};

use crate::kv::{Database, KvConfig, KvError};
use crate::tree::TreeDirectory;

/// A file-backed store in its own temporary directory.
///
/// The directory and log file are deleted when this is dropped.
pub struct TestStore {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl TestStore {
    pub fn new() -> Result<Self, KvError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tally.log");
        Ok(Self { _dir: dir, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open (or reopen) the store. Commits are not fsynced.
    pub fn open(&self) -> Result<Database, KvError> {
        Database::open(
            &self.path,
            KvConfig {
                sync_on_commit: false,
                ..KvConfig::default()
            },
        )
    }
}

/// A fresh in-memory store with default settings.
#[must_use]
pub fn new_test_database() -> Database {
    Database::in_memory(KvConfig::default())
}

/// A tree small enough that a few dozen keys build several levels.
#[must_use]
pub fn small_tree() -> TreeDirectory {
    TreeDirectory::new(TreeDirectory::MIN_BRANCH + 1).expect("fan-out above minimum")
}
