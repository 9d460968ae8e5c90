//! # Remote Durable Engine
//!
//! A store backed by two cooperating remote resources:
//!
//! - a **metadata table** mapping each key to an [`Item`] (empty marker,
//!   inline bytes, or a pointer to a payload object), and
//! - a **payload bucket** holding values too large to inline.
//!
//! Both live in object storage reached through a [`RemoteClient`] (in-memory,
//! local directory, or any S3-compatible endpoint).
//!
//! ## Write path
//!
//! ```text
//! put/delete ──► bounded mpsc queue ──► single write worker ──► bucket, then table
//!   (returns once enqueued)              (FIFO, retries transient failures)
//! ```
//!
//! The worker is the only writer for a store, so mutations reach the remote
//! side in exactly the order they were enqueued. Failures that outlive the
//! retry budget are remembered per key and surface as `Io` on the next read
//! of that key and on the next `flush` or `close`.
//!
//! ## Read path and consistency
//!
//! `get`/`has` read the table (and bucket) directly, bypassing the queue. A
//! read issued right after a `put` may not see it yet. Once
//! [`RemoteStore::flush`] or `close` has returned, every earlier write is
//! visible: read-your-writes holds after a flush, eventual consistency
//! before it.
//!
//! ## Resource lifecycle
//!
//! A [`RemoteHandle`] owns the client, the resources, and a one-time
//! provisioning guard. Any number of stores opened through one handle create
//! the table and bucket exactly once. Resources are removed only by
//! [`RemoteHandle::decommission`]; closing a store never touches them.

mod handle;
mod resources;
mod store;
mod worker;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StoreError;

pub use handle::RemoteHandle;
pub use resources::{Item, MetaTable, ObjectStoreBucket, ObjectStoreTable, PayloadBucket, RemoteClient};
pub use store::{RemoteBatch, RemoteStore};

/// Largest value stored inline in the metadata table. Larger values go to
/// the payload bucket. Mirrors the 400 KiB item ceiling of managed tables,
/// minus room for the key and item framing.
pub const DEFAULT_INLINE_LIMIT: usize = 400 * 1024 - 1024;

/// Default capacity of the write queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure talking to a remote resource. Never returned to store callers:
/// transient failures are retried and everything that escapes becomes
/// [`StoreError::Io`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Worth retrying: throttling, timeouts, connection resets.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// Retrying will not help: bad credentials, corrupt data, invalid paths.
    #[error("remote failure: {0}")]
    Fatal(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<RemoteError> for StoreError {
    fn from(e: RemoteError) -> Self {
        StoreError::Io(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Bounded exponential backoff for transient remote failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per remote call, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Where the remote resources live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RemoteEndpoint {
    /// Process-local object store. Data lives as long as the client.
    Memory,
    /// Directory on the local filesystem.
    Local { path: PathBuf },
    /// S3-compatible service.
    S3 {
        bucket: String,
        region: String,
        /// Custom endpoint URL (MinIO, LocalStack). AWS when omitted.
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
        #[serde(default)]
        allow_http: bool,
    },
}

/// Settings shared by every remote store of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Prefix for per-entry-type table and bucket names.
    pub table_prefix: String,
    /// Write queue capacity. Producers block once this many writes are pending.
    pub queue_capacity: usize,
    /// Largest value kept inline in the table.
    pub inline_limit: usize,
    pub endpoint: RemoteEndpoint,
    pub retry: RetryPolicy,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            table_prefix: "chaindb".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            inline_limit: DEFAULT_INLINE_LIMIT,
            endpoint: RemoteEndpoint::Memory,
            retry: RetryPolicy::default(),
        }
    }
}

impl RemoteConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        validate_namespace(&self.table_prefix)?;
        if self.queue_capacity == 0 {
            return Err(StoreError::Config("remote queue_capacity must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(StoreError::Config("remote retry.max_attempts must be positive".into()));
        }
        Ok(())
    }
}

/// Table and bucket names must be usable as object path segments and as
/// managed-table names: lowercase ASCII letters, digits, `-` and `_`.
pub fn validate_namespace(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::Config(format!("invalid remote namespace {name:?}")))
    }
}
