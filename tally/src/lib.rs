#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]
// Layers, top to bottom:
//  - counting: tuple-named collections over any counting index
//  - tree: B+ tree with per-child (min, max, count) aggregates
//      directory -> ops -> store
//  - kv: ordered transactional store with optimistic conflict checks
//
// All tree state lives in the store. A tree operation reads and writes
// nodes through the caller's transaction and commits nothing itself.

pub mod config;
pub mod counting;
pub mod kv;
pub mod tree;
pub mod workload;

mod e2e_tests;
#[cfg(test)]
mod testing;

pub use config::{ConfigError, IndexConfig};
pub use counting::{BucketIndex, CountError, CountingCollection, CountingIndex, FlatIndex};
pub use kv::{Database, KvConfig, KvError, Transaction};
pub use tree::{KeyRange, TreeDirectory, TreeError};
