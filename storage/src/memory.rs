//! In-memory engine.
//!
//! A `HashMap` behind a `parking_lot::RwLock`. This is the reference
//! implementation of the [`Store`] contract: the conformance suite runs every
//! other engine against the same expectations this one satisfies trivially.
//! Batches apply under a single write lock, so they are atomic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::store::{Batch, BatchOp, DbType, OpBuffer, Slot, Store};

#[derive(Debug, Default)]
struct MemoryInner {
    map: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryInner {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

/// Mapping-backed [`Store`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys. Zero once closed.
    pub fn len(&self) -> usize {
        self.inner.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn kind(&self) -> DbType {
        DbType::Memory
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.inner.ensure_open()?;
        self.inner.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.inner.ensure_open()?;
        let map = self.inner.map.read();
        Slot::from_native(map.get(key)).into_value()
    }

    async fn has(&self, key: &[u8]) -> StoreResult<bool> {
        self.inner.ensure_open()?;
        Ok(self.inner.map.read().contains_key(key))
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.inner.ensure_open()?;
        self.inner.map.write().remove(key);
        Ok(())
    }

    async fn flush(&self) -> StoreResult<()> {
        self.inner.ensure_open()
    }

    fn new_batch(&self) -> Box<dyn Batch> {
        Box::new(MemoryBatch {
            inner: Arc::clone(&self.inner),
            buf: OpBuffer::default(),
        })
    }

    async fn close(&self) -> StoreResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Closed);
        }
        self.inner.map.write().clear();
        Ok(())
    }
}

/// Batch for [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryBatch {
    inner: Arc<MemoryInner>,
    buf: OpBuffer,
}

#[async_trait]
impl Batch for MemoryBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.buf.put(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> StoreResult<()> {
        self.buf.delete(key);
        Ok(())
    }

    fn value_size(&self) -> usize {
        self.buf.size()
    }

    async fn write(&mut self) -> StoreResult<()> {
        self.inner.ensure_open()?;
        let mut map = self.inner.map.write();
        for op in self.buf.ops() {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    map.remove(key);
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_value_reads_back_as_empty() {
        let db = MemoryStore::new();
        db.put(b"k", b"").await.unwrap();
        assert_eq!(db.get(b"k").await.unwrap(), Vec::<u8>::new());
        assert!(db.has(b"k").await.unwrap());
        assert!(matches!(db.get(b"other").await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn returned_value_is_an_owned_copy() {
        let db = MemoryStore::new();
        db.put(b"k", b"?").await.unwrap();
        let mut v = db.get(b"k").await.unwrap();
        v[0] = 0xff;
        assert_eq!(db.get(b"k").await.unwrap(), b"?".to_vec());
    }

    #[tokio::test]
    async fn batch_is_invisible_until_written() {
        let db = MemoryStore::new();
        let mut batch = db.new_batch();
        batch.put(b"a", b"1").unwrap();
        batch.put(b"a", b"2").unwrap();
        batch.put(b"b", b"x").unwrap();
        batch.delete(b"b").unwrap();
        assert!(!db.has(b"a").await.unwrap());

        batch.write().await.unwrap();
        assert_eq!(db.get(b"a").await.unwrap(), b"2".to_vec());
        assert!(!db.has(b"b").await.unwrap());
        assert_eq!(db.len(), 1);
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let db = MemoryStore::new();
        db.put(b"k", b"v").await.unwrap();
        let mut batch = db.new_batch();
        batch.put(b"k2", b"v").unwrap();

        db.close().await.unwrap();
        assert!(matches!(db.get(b"k").await, Err(StoreError::Closed)));
        assert!(matches!(db.put(b"k", b"v").await, Err(StoreError::Closed)));
        assert!(matches!(db.has(b"k").await, Err(StoreError::Closed)));
        assert!(matches!(db.delete(b"k").await, Err(StoreError::Closed)));
        assert!(matches!(batch.write().await, Err(StoreError::Closed)));
        assert!(matches!(db.close().await, Err(StoreError::Closed)));
    }
}
