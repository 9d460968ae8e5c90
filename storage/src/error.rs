//! # Storage Errors
//!
//! Every store operation returns a [`StoreError`] on failure. The taxonomy is
//! small enough that callers can match on it without knowing which engine
//! sits behind the [`Store`](crate::Store) they hold:
//!
//! | Variant               | Meaning                                              |
//! |-----------------------|------------------------------------------------------|
//! | `NotFound`            | Key absent. An expected outcome, never logged.       |
//! | `Io`                  | Genuine backend failure (disk, network, encoding).   |
//! | `Closed`              | Operation issued after `close`.                      |
//! | `PartialBatchFailure` | Sharded batch applied on some shards but not others. |
//! | `Config`              | Invalid configuration; startup must fail fast.       |
//!
//! Retryable remote failures never appear here. The remote adapter retries
//! them internally and only escalates to `Io` once its retry budget is spent.

use thiserror::Error;

/// Errors returned by stores, batches, and the database manager.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key has no stored value.
    #[error("data not found")]
    NotFound,

    /// The backend failed to complete the operation.
    #[error("storage i/o error: {0}")]
    Io(String),

    /// The store was closed before this operation was issued.
    #[error("store is closed")]
    Closed,

    /// A multi-shard batch failed on some shards. Shards not listed were
    /// applied and are not rolled back.
    #[error("batch failed on shards {:?}", failed_indices(.failures))]
    PartialBatchFailure {
        /// Failing shard index paired with the error that shard returned.
        failures: Vec<(usize, StoreError)>,
    },

    /// Configuration rejected at construction time.
    #[error("invalid storage configuration: {0}")]
    Config(String),
}

fn failed_indices(failures: &[(usize, StoreError)]) -> Vec<usize> {
    failures.iter().map(|(idx, _)| *idx).collect()
}

impl StoreError {
    /// True for the absence outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Indices of the shards that failed, for `PartialBatchFailure`. Empty
    /// for every other variant.
    pub fn failed_shards(&self) -> Vec<usize> {
        match self {
            Self::PartialBatchFailure { failures } => failed_indices(failures),
            _ => Vec::new(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Io(format!("rocksdb: {e}"))
    }
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        Self::Io(format!("sled: {e}"))
    }
}

/// Shorthand result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
