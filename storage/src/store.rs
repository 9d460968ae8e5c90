//! # Store Contract
//!
//! The [`Store`] and [`Batch`] traits are the single contract every engine
//! implements. Upper layers (trie, chain indexer, account state) only ever
//! see these traits, so swapping RocksDB for sled or for the remote engine
//! is a configuration change, not a code change.
//!
//! ## Values and absence
//!
//! Engines disagree about empty values: some cannot store a zero-length
//! value at all, others conflate "stored empty" with "missing". The adapters
//! normalize that at their boundary through [`Slot`]:
//!
//! ```text
//! engine-native read ──► Slot::{Absent, Empty, Present} ──► Result<Vec<u8>>
//!                                                          Absent → NotFound
//!                                                          Empty  → Ok(vec![])
//! ```
//!
//! ## Lifecycle
//!
//! A store is open once its constructor returns. `close` is terminal: every
//! later call, including writing a batch created earlier, fails with
//! [`StoreError::Closed`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Buffered byte size at which upstream writers are expected to flush a batch.
pub const IDEAL_BATCH_SIZE: usize = 100 * 1024;

// ---------------------------------------------------------------------------
// DbType
// ---------------------------------------------------------------------------

/// Engine kind behind a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DbType {
    /// Mapping-backed engine. Default for tests and ephemeral nodes.
    Memory,
    /// Embedded log-structured engine (RocksDB).
    Lsm,
    /// Embedded sorted key-value engine (sled).
    SortedKv,
    /// Remote metadata table plus payload bucket.
    Remote,
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Memory => "memory",
            Self::Lsm => "lsm",
            Self::SortedKv => "sorted-kv",
            Self::Remote => "remote",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// Engine-independent result of a point read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// No value stored under the key.
    Absent,
    /// A zero-length value is stored under the key.
    Empty,
    /// A non-empty value is stored under the key.
    Present(Vec<u8>),
}

impl Slot {
    /// Classify an engine read that distinguishes "missing" from "stored",
    /// but may hand back a zero-length buffer for a stored empty value.
    pub fn from_native<V: AsRef<[u8]>>(raw: Option<V>) -> Self {
        match raw {
            None => Self::Absent,
            Some(v) if v.as_ref().is_empty() => Self::Empty,
            Some(v) => Self::Present(v.as_ref().to_vec()),
        }
    }

    /// Classify a value about to be written.
    pub fn for_write(value: &[u8]) -> Self {
        if value.is_empty() {
            Self::Empty
        } else {
            Self::Present(value.to_vec())
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, Self::Absent)
    }

    /// Convert into the caller-facing `get` result.
    pub fn into_value(self) -> StoreResult<Vec<u8>> {
        match self {
            Self::Absent => Err(StoreError::NotFound),
            Self::Empty => Ok(Vec::new()),
            Self::Present(v) => Ok(v),
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Uniform key-value contract implemented by every engine adapter.
///
/// Implementations are safe to share across tasks without external locking.
/// For any single key, operations are linearizable: a `get` issued after a
/// `put` returned observes that put (the remote engine relaxes this until
/// its queue has been flushed).
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    /// Engine kind of this store.
    fn kind(&self) -> DbType;

    /// Store `value` under `key`, overwriting unconditionally. A zero-length
    /// value is a real value, distinct from absence.
    async fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Fetch the value under `key`. Absence is `Err(StoreError::NotFound)`.
    async fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>>;

    /// Whether a value (possibly empty) is stored under `key`.
    async fn has(&self, key: &[u8]) -> StoreResult<bool>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &[u8]) -> StoreResult<()>;

    /// Start a batch of buffered writes against this store.
    fn new_batch(&self) -> Box<dyn Batch>;

    /// Wait until every write accepted so far is durable and visible to
    /// reads. Engines that apply writes synchronously have nothing to do.
    async fn flush(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Release the store's resources. Terminal.
    async fn close(&self) -> StoreResult<()>;
}

/// Ordered buffer of pending writes against one store.
///
/// Nothing is visible until [`Batch::write`] succeeds. Operations apply in
/// buffered order, so the last operation touching a key decides its value.
/// `write` leaves the buffer intact; call [`Batch::reset`] to reuse it.
#[async_trait]
pub trait Batch: Send + fmt::Debug {
    /// Buffer a put.
    fn put(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Buffer a delete.
    fn delete(&mut self, key: &[u8]) -> StoreResult<()>;

    /// Approximate buffered payload size in bytes. Puts count their value
    /// length, deletes count one byte.
    fn value_size(&self) -> usize;

    /// Apply every buffered operation to the backing store.
    async fn write(&mut self) -> StoreResult<()>;

    /// Drop every buffered operation.
    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// Op buffer
// ---------------------------------------------------------------------------

/// A single buffered mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered op list with size accounting, shared by the batch implementations
/// that replay ops onto their engine.
#[derive(Debug, Default, Clone)]
pub struct OpBuffer {
    ops: Vec<BatchOp>,
    size: usize,
}

impl OpBuffer {
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.size += value.len();
        self.ops.push(BatchOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        });
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.size += 1;
        self.ops.push(BatchOp::Delete { key: key.to_vec() });
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
        self.size = 0;
    }
}

/// Run a blocking engine call (fsync, compaction-sized batch) on tokio's
/// blocking pool so it does not stall the executor thread.
pub(crate) async fn run_blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(format!("blocking storage task failed: {e}")))?
}
