//! End-to-end tests through the public index API.
//!
//! Each test file covers one scenario across the store, tree, and counting
//! layers, using deterministic inputs.

#![cfg(test)]

mod helpers;

mod test_baselines_agree;
mod test_concurrent_writers;
mod test_persistence;
mod test_snapshot_counts;
