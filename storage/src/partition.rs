//! # Partition Router
//!
//! [`PartitionedStore`] presents N same-kind shards as one [`Store`]. Keys
//! routed through it are content hashes (trie node hashes, account address
//! hashes), so their leading bits are already uniformly distributed and the
//! router uses them directly instead of hashing again:
//!
//! ```text
//! shard = leading 60 bits of key (15 hex nibbles, big-endian)  mod  N
//! ```
//!
//! Keys shorter than 15 nibbles use the nibbles they have; the empty key
//! lands on shard 0. N is fixed at construction and must be a power of two.
//! Changing it requires an offline migration; nothing here rehashes.
//!
//! ## Batches
//!
//! A [`PartitionedBatch`] keeps one sub-batch per shard. `write` flushes all
//! of them, keeps going past failures, and reports every failing shard in
//! [`StoreError::PartialBatchFailure`]. Shards that succeeded stay applied:
//! multi-shard batches are best-effort per shard, never all-or-nothing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::error::{StoreError, StoreResult};
use crate::store::{Batch, DbType, Store};

/// Number of leading hex nibbles of a key used for routing.
const ROUTING_NIBBLES: usize = 15;

/// Shard index for `key` among `shards` shards.
///
/// # Panics
///
/// Panics if `shards` is zero. [`PartitionedStore::new`] never allows that.
pub fn shard_index(key: &[u8], shards: usize) -> usize {
    assert!(shards > 0, "shard count must be positive");
    let seed = key
        .iter()
        .flat_map(|b| [b >> 4, b & 0x0f])
        .take(ROUTING_NIBBLES)
        .fold(0u64, |acc, nibble| (acc << 4) | u64::from(nibble));
    (seed % shards as u64) as usize
}

/// N same-kind shards behind one [`Store`].
#[derive(Debug, Clone)]
pub struct PartitionedStore {
    shards: Vec<Arc<dyn Store>>,
    kind: DbType,
}

impl PartitionedStore {
    /// Build a router over `shards`.
    ///
    /// Fails when there are no shards, when the count is not a power of two,
    /// or when the shards are not all the same engine kind.
    pub fn new(shards: Vec<Arc<dyn Store>>) -> StoreResult<Self> {
        let Some(first) = shards.first() else {
            return Err(StoreError::Config("partitioned store needs at least one shard".into()));
        };
        if !shards.len().is_power_of_two() {
            return Err(StoreError::Config(format!(
                "shard count must be a power of two, got {}",
                shards.len()
            )));
        }
        let kind = first.kind();
        if let Some(odd) = shards.iter().find(|s| s.kind() != kind) {
            return Err(StoreError::Config(format!(
                "shards must share one engine kind: found {} alongside {}",
                odd.kind(),
                kind
            )));
        }
        debug!(shards = shards.len(), %kind, "partitioned store created");
        Ok(Self { shards, kind })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard that owns `key`.
    pub fn shard_for(&self, key: &[u8]) -> usize {
        shard_index(key, self.shards.len())
    }

    /// Direct access to one shard.
    pub fn shard(&self, index: usize) -> Option<&Arc<dyn Store>> {
        self.shards.get(index)
    }

    fn route(&self, key: &[u8]) -> &Arc<dyn Store> {
        &self.shards[self.shard_for(key)]
    }
}

#[async_trait]
impl Store for PartitionedStore {
    fn kind(&self) -> DbType {
        self.kind
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.route(key).put(key, value).await
    }

    async fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.route(key).get(key).await
    }

    async fn has(&self, key: &[u8]) -> StoreResult<bool> {
        self.route(key).has(key).await
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.route(key).delete(key).await
    }

    fn new_batch(&self) -> Box<dyn Batch> {
        Box::new(PartitionedBatch {
            batches: self.shards.iter().map(|s| s.new_batch()).collect(),
        })
    }

    /// Flush every shard, even after one fails, and return the first error.
    async fn flush(&self) -> StoreResult<()> {
        let mut first_err = None;
        for (idx, shard) in self.shards.iter().enumerate() {
            if let Err(e) = shard.flush().await {
                error!(shard = idx, error = %e, "failed to flush shard");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Close every shard, even after one fails, and return the first error.
    async fn close(&self) -> StoreResult<()> {
        let mut first_err = None;
        for (idx, shard) in self.shards.iter().enumerate() {
            if let Err(e) = shard.close().await {
                error!(shard = idx, error = %e, "failed to close shard");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Batch spanning every shard of a [`PartitionedStore`].
#[derive(Debug)]
pub struct PartitionedBatch {
    batches: Vec<Box<dyn Batch>>,
}

impl PartitionedBatch {
    fn sub_batch(&mut self, key: &[u8]) -> &mut Box<dyn Batch> {
        let idx = shard_index(key, self.batches.len());
        &mut self.batches[idx]
    }
}

#[async_trait]
impl Batch for PartitionedBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.sub_batch(key).put(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> StoreResult<()> {
        self.sub_batch(key).delete(key)
    }

    fn value_size(&self) -> usize {
        self.batches.iter().map(|b| b.value_size()).sum()
    }

    async fn write(&mut self) -> StoreResult<()> {
        let mut failures = Vec::new();
        for (idx, batch) in self.batches.iter_mut().enumerate() {
            if let Err(e) = batch.write().await {
                error!(shard = idx, error = %e, "shard batch write failed");
                failures.push((idx, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StoreError::PartialBatchFailure { failures })
        }
    }

    fn reset(&mut self) {
        for batch in &mut self.batches {
            batch.reset();
        }
    }
}
