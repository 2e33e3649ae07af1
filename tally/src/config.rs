//! Index configuration module.
//!
//! This module provides configuration loading for the tally index and its
//! workload runner from environment variables.
//!
//! # Environment Variables
//!
//! - `TALLY_MAX_BRANCH`: Tree fan-out (default: `64`, at least `4`)
//! - `TALLY_DATA_FILE`: Commit log path (default: unset, in-memory store)
//! - `TALLY_RETRY_LIMIT`: Attempts per transaction (default: `10`)
//! - `TALLY_CONFLICT_WINDOW`: Commits kept for conflict checks (default: `10000`)
//! - `TALLY_SYNC_ON_COMMIT`: Fsync every commit (default: `true`)
//! - `TALLY_WORKLOAD_COLLECTIONS`: Collections driven by the runner (default: `4`)
//! - `TALLY_WORKLOAD_OPERATIONS`: Operations per collection (default: `10000`)
//! - `TALLY_WORKLOAD_SEED`: Seed of the runner's random mix (default: `42`)
//!
//! # Invariants
//!
//! - `max_branch >= TreeDirectory::MIN_BRANCH`
//! - `retry_limit`, `conflict_window`, and `workload_collections` are at least 1

use std::path::PathBuf;

use crate::kv::KvConfig;
use crate::tree::TreeDirectory;

/// Index configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Tree fan-out: inner nodes hold at most `max_branch - 1` children.
    pub max_branch: usize,
    /// Commit log file. `None` keeps the store in memory.
    pub data_file: Option<PathBuf>,
    /// Store settings.
    pub kv: KvConfig,
    pub workload_collections: usize,
    pub workload_operations: usize,
    pub workload_seed: u64,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_branch: Self::DEFAULT_MAX_BRANCH,
            data_file: None,
            kv: KvConfig::default(),
            workload_collections: Self::DEFAULT_WORKLOAD_COLLECTIONS,
            workload_operations: Self::DEFAULT_WORKLOAD_OPERATIONS,
            workload_seed: Self::DEFAULT_WORKLOAD_SEED,
        }
    }
}

impl IndexConfig {
    pub const DEFAULT_MAX_BRANCH: usize = 64;
    pub const DEFAULT_WORKLOAD_COLLECTIONS: usize = 4;
    pub const DEFAULT_WORKLOAD_OPERATIONS: usize = 10_000;
    pub const DEFAULT_WORKLOAD_SEED: u64 = 42;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but does not parse, or parses to
    /// a value outside its allowed range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup` instead of the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_branch = load_number(
            &lookup,
            "TALLY_MAX_BRANCH",
            Self::DEFAULT_MAX_BRANCH,
            TreeDirectory::MIN_BRANCH,
        )?;
        let data_file = lookup("TALLY_DATA_FILE")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let retry_limit = load_number(
            &lookup,
            "TALLY_RETRY_LIMIT",
            KvConfig::DEFAULT_RETRY_LIMIT,
            1,
        )?;
        let conflict_window = load_number(
            &lookup,
            "TALLY_CONFLICT_WINDOW",
            KvConfig::DEFAULT_CONFLICT_WINDOW,
            1,
        )?;
        let sync_on_commit = load_flag(&lookup, "TALLY_SYNC_ON_COMMIT", true)?;
        let workload_collections = load_number(
            &lookup,
            "TALLY_WORKLOAD_COLLECTIONS",
            Self::DEFAULT_WORKLOAD_COLLECTIONS,
            1,
        )?;
        let workload_operations = load_number(
            &lookup,
            "TALLY_WORKLOAD_OPERATIONS",
            Self::DEFAULT_WORKLOAD_OPERATIONS,
            0,
        )?;
        let workload_seed = load_number(
            &lookup,
            "TALLY_WORKLOAD_SEED",
            Self::DEFAULT_WORKLOAD_SEED,
            0,
        )?;

        Ok(Self {
            max_branch,
            data_file,
            kv: KvConfig {
                retry_limit,
                conflict_window,
                sync_on_commit,
            },
            workload_collections,
            workload_operations,
            workload_seed,
        })
    }
}

/// Parse a numeric variable, falling back to `default` when unset.
///
/// # Errors
///
/// Returns an error if the value is not a number or is below `min`.
fn load_number<F, T>(lookup: &F, name: &str, default: T, min: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let Some(value) = lookup(name) else {
        return Ok(default);
    };
    let parsed = value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        message: format!("'{value}' is not a valid number"),
    })?;
    if parsed < min {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("{parsed} is below the minimum of {min}"),
        });
    }
    Ok(parsed)
}

/// Parse a boolean variable (`true`/`false`/`1`/`0`).
fn load_flag<F>(lookup: &F, name: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).as_deref().map(str::trim) {
        None => Ok(default),
        Some("true" | "1") => Ok(true),
        Some("false" | "0") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{other}' is not a boolean (use true, false, 1 or 0)"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<IndexConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        IndexConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).expect("defaults");
        assert_eq!(config, IndexConfig::default());
        assert_eq!(config.max_branch, 64);
        assert_eq!(config.data_file, None);
        assert!(config.kv.sync_on_commit);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("TALLY_MAX_BRANCH", "5"),
            ("TALLY_DATA_FILE", "/tmp/tally.log"),
            ("TALLY_RETRY_LIMIT", "3"),
            ("TALLY_SYNC_ON_COMMIT", "0"),
            ("TALLY_WORKLOAD_SEED", "7"),
        ])
        .expect("valid");
        assert_eq!(config.max_branch, 5);
        assert_eq!(config.data_file, Some(PathBuf::from("/tmp/tally.log")));
        assert_eq!(config.kv.retry_limit, 3);
        assert!(!config.kv.sync_on_commit);
        assert_eq!(config.workload_seed, 7);
    }

    #[test]
    fn test_branch_below_minimum_is_rejected() {
        let error = load(&[("TALLY_MAX_BRANCH", "3")]).expect_err("too small");
        assert_eq!(
            error,
            ConfigError::InvalidValue {
                name: "TALLY_MAX_BRANCH".to_string(),
                message: "3 is below the minimum of 4".to_string(),
            }
        );
    }

    #[test]
    fn test_unparsable_values_are_rejected() {
        assert!(load(&[("TALLY_RETRY_LIMIT", "many")]).is_err());
        assert!(load(&[("TALLY_SYNC_ON_COMMIT", "yes")]).is_err());
        assert!(load(&[("TALLY_CONFLICT_WINDOW", "0")]).is_err());
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
