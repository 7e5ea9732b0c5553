//! Store configuration module.
//!
//! This module provides configuration loading for the maintenance tool and
//! embedders from environment variables.
//!
//! # Environment Variables
//!
//! - `OIDSTORE_DATABASE_PATH`: Path of the store file (default: `./data/store.odb`)
//! - `OIDSTORE_GC_RECLAIM`: Whether garbage collection frees unreachable objects
//!   or only reports them (default: `false`)
//! - `OIDSTORE_NODE_CAPACITY`: Node capacity for newly created indexes
//!   (default: `64`). The maintenance tool never creates indexes, so only
//!   embedders act on it.
//!
//! # Invariants
//!
//! - `database_path` is never empty (the file may not exist yet)
//! - `node_capacity` is always within `MIN_NODE_CAPACITY..=MAX_NODE_CAPACITY`

use std::path::PathBuf;

use crate::storage::btree::{DEFAULT_NODE_CAPACITY, MIN_NODE_CAPACITY};

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path of the store file.
    pub database_path: PathBuf,
    /// Free unreachable objects after a reachability pass.
    pub gc_reclaim: bool,
    /// Node capacity for indexes created from this configuration.
    pub node_capacity: u16,
}

impl std::fmt::Display for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "database_path={}, gc_reclaim={}, node_capacity={}",
            self.database_path.display(),
            self.gc_reclaim,
            self.node_capacity
        )
    }
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

const DATABASE_PATH_VAR: &str = "OIDSTORE_DATABASE_PATH";
const GC_RECLAIM_VAR: &str = "OIDSTORE_GC_RECLAIM";
const NODE_CAPACITY_VAR: &str = "OIDSTORE_NODE_CAPACITY";

impl StoreConfig {
    /// Default store file.
    pub const DEFAULT_DATABASE_PATH: &'static str = "./data/store.odb";
    /// Largest accepted node capacity.
    pub const MAX_NODE_CAPACITY: u16 = 1024;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that does not parse
    /// or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a
    /// variable or `None` if it is unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            database_path: Self::load_database_path(&lookup)?,
            gc_reclaim: Self::load_gc_reclaim(&lookup)?,
            node_capacity: Self::load_node_capacity(&lookup)?,
        })
    }

    fn load_database_path(lookup: impl Fn(&str) -> Option<String>) -> Result<PathBuf, ConfigError> {
        match lookup(DATABASE_PATH_VAR) {
            Some(value) if value.is_empty() => Err(ConfigError::InvalidValue {
                name: DATABASE_PATH_VAR.to_string(),
                message: "must not be empty".to_string(),
            }),
            Some(value) => Ok(PathBuf::from(value)),
            None => Ok(PathBuf::from(Self::DEFAULT_DATABASE_PATH)),
        }
    }

    fn load_gc_reclaim(lookup: impl Fn(&str) -> Option<String>) -> Result<bool, ConfigError> {
        let Some(value) = lookup(GC_RECLAIM_VAR) else {
            return Ok(false);
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                name: GC_RECLAIM_VAR.to_string(),
                message: format!("'{value}' is not one of true, false, 1, 0"),
            }),
        }
    }

    fn load_node_capacity(lookup: impl Fn(&str) -> Option<String>) -> Result<u16, ConfigError> {
        let Some(value) = lookup(NODE_CAPACITY_VAR) else {
            return Ok(DEFAULT_NODE_CAPACITY);
        };
        let invalid = || ConfigError::InvalidValue {
            name: NODE_CAPACITY_VAR.to_string(),
            message: format!(
                "'{value}' is not a node capacity (must be {MIN_NODE_CAPACITY}-{})",
                Self::MAX_NODE_CAPACITY
            ),
        };
        let capacity = value.parse::<u16>().map_err(|_| invalid())?;
        if (MIN_NODE_CAPACITY..=Self::MAX_NODE_CAPACITY).contains(&capacity) {
            Ok(capacity)
        } else {
            Err(invalid())
        }
    }
}
