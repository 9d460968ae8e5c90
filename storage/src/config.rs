//! # Storage Configuration
//!
//! [`DbConfig`] is the node-wide storage configuration, read from TOML:
//!
//! ```toml
//! dir = "/var/lib/chaindb"
//! db_type = "lsm"            # memory | lsm | sorted-kv | remote
//! state_trie_shards = 4
//! cache_size_mb = 512
//! open_files_limit = 1024
//!
//! [remote]
//! table_prefix = "chaindb"
//! endpoint = { kind = "memory" }
//! ```
//!
//! Every field has a default, so an empty file is a valid in-memory setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::remote::RemoteConfig;
use crate::store::DbType;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default number of shards for the state-trie entry types.
pub const DEFAULT_STATE_TRIE_SHARDS: usize = 4;

/// Largest supported shard count.
pub const MAX_STATE_TRIE_SHARDS: usize = 256;

/// Default node-wide cache budget in MiB, split across entry types by ratio.
pub const DEFAULT_CACHE_SIZE_MB: usize = 512;

/// Default node-wide open-file budget, split like the cache.
pub const DEFAULT_OPEN_FILES_LIMIT: usize = 1024;

/// Largest cache budget accepted, in MiB (16 TiB).
pub const MAX_CACHE_SIZE_MB: usize = 1 << 24;

/// Largest open-file budget accepted. RocksDB takes the limit as an `i32`.
pub const MAX_OPEN_FILES_LIMIT: usize = i32::MAX as usize;

/// Node-wide storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    /// Root directory. Each entry type lives in its own subdirectory.
    pub dir: PathBuf,
    /// Engine used for every entry type.
    pub db_type: DbType,
    /// Shard count for the state-trie entry types. Power of two.
    pub state_trie_shards: usize,
    pub cache_size_mb: usize,
    pub open_files_limit: usize,
    /// Used only when `db_type = "remote"`.
    pub remote: RemoteConfig,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("chaindb"),
            db_type: DbType::Memory,
            state_trie_shards: DEFAULT_STATE_TRIE_SHARDS,
            cache_size_mb: DEFAULT_CACHE_SIZE_MB,
            open_files_limit: DEFAULT_OPEN_FILES_LIMIT,
            remote: RemoteConfig::default(),
        }
    }
}

impl DbConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| StoreError::Config(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Config(format!("serialize config: {e}")))
    }

    pub fn validate(&self) -> StoreResult<()> {
        let shards = self.state_trie_shards;
        if shards == 0 || shards > MAX_STATE_TRIE_SHARDS || !shards.is_power_of_two() {
            return Err(StoreError::Config(format!(
                "state_trie_shards must be a power of two in 1..={MAX_STATE_TRIE_SHARDS}, got {shards}"
            )));
        }
        if self.cache_size_mb > MAX_CACHE_SIZE_MB {
            return Err(StoreError::Config(format!(
                "cache_size_mb must be at most {MAX_CACHE_SIZE_MB}, got {}",
                self.cache_size_mb
            )));
        }
        if self.open_files_limit > MAX_OPEN_FILES_LIMIT {
            return Err(StoreError::Config(format!(
                "open_files_limit must be at most {MAX_OPEN_FILES_LIMIT}, got {}",
                self.open_files_limit
            )));
        }
        let on_disk = matches!(self.db_type, DbType::Lsm | DbType::SortedKv);
        if on_disk && self.dir.as_os_str().is_empty() {
            return Err(StoreError::Config("dir must be set for on-disk engines".into()));
        }
        if self.db_type == DbType::Remote {
            self.remote.validate()?;
        }
        Ok(())
    }
}
