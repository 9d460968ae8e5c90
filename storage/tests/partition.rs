//! Cross-shard batch behavior when some shards fail.

use std::sync::Arc;

use async_trait::async_trait;

use chaindb_storage::memory::MemoryStore;
use chaindb_storage::partition::shard_index;
use chaindb_storage::{Batch, DbType, PartitionedStore, Store, StoreError, StoreResult};

/// Memory store whose batches always fail to write.
#[derive(Debug, Default)]
struct BrokenShard {
    inner: MemoryStore,
}

#[derive(Debug)]
struct BrokenBatch {
    ops: usize,
}

#[async_trait]
impl Batch for BrokenBatch {
    fn put(&mut self, _key: &[u8], _value: &[u8]) -> StoreResult<()> {
        self.ops += 1;
        Ok(())
    }

    fn delete(&mut self, _key: &[u8]) -> StoreResult<()> {
        self.ops += 1;
        Ok(())
    }

    fn value_size(&self) -> usize {
        self.ops
    }

    async fn write(&mut self) -> StoreResult<()> {
        Err(StoreError::Io("disk full".into()))
    }

    fn reset(&mut self) {
        self.ops = 0;
    }
}

#[async_trait]
impl Store for BrokenShard {
    fn kind(&self) -> DbType {
        DbType::Memory
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.inner.put(key, value).await
    }

    async fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.inner.get(key).await
    }

    async fn has(&self, key: &[u8]) -> StoreResult<bool> {
        self.inner.has(key).await
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.inner.delete(key).await
    }

    fn new_batch(&self) -> Box<dyn Batch> {
        Box::new(BrokenBatch { ops: 0 })
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.close().await
    }
}

/// First key (single byte) routed to `shard` among `shards`.
fn key_for(shard: usize, shards: usize) -> Vec<u8> {
    (0u8..=255)
        .map(|b| vec![b])
        .find(|k| shard_index(k, shards) == shard)
        .expect("some byte routes to every shard")
}

#[tokio::test]
async fn partial_batch_failure_names_failing_shards_and_keeps_the_rest() {
    let shards: Vec<Arc<dyn Store>> = vec![
        Arc::new(MemoryStore::new()),
        Arc::new(BrokenShard::default()),
        Arc::new(MemoryStore::new()),
        Arc::new(BrokenShard::default()),
    ];
    let store = PartitionedStore::new(shards).unwrap();

    let keys: Vec<Vec<u8>> = (0..4).map(|i| key_for(i, 4)).collect();
    let mut batch = store.new_batch();
    for k in &keys {
        batch.put(k, b"v").unwrap();
    }

    let err = batch.write().await.unwrap_err();
    assert_eq!(err.failed_shards(), vec![1, 3]);
    match &err {
        StoreError::PartialBatchFailure { failures } => {
            assert!(failures.iter().all(|(_, e)| matches!(e, StoreError::Io(_))));
        }
        other => panic!("expected partial failure, got {other:?}"),
    }

    assert_eq!(store.get(&keys[0]).await.unwrap(), b"v".to_vec());
    assert_eq!(store.get(&keys[2]).await.unwrap(), b"v".to_vec());
    assert!(!store.has(&keys[1]).await.unwrap());
    assert!(!store.has(&keys[3]).await.unwrap());
}

#[tokio::test]
async fn healthy_batch_spanning_shards_applies_everywhere() {
    let shards: Vec<Arc<dyn Store>> = (0..8).map(|_| Arc::new(MemoryStore::new()) as Arc<dyn Store>).collect();
    let store = PartitionedStore::new(shards).unwrap();

    let mut batch = store.new_batch();
    for i in 0..8 {
        batch.put(&key_for(i, 8), &[i as u8]).unwrap();
    }
    batch.write().await.unwrap();

    for i in 0..8 {
        let k = key_for(i, 8);
        assert_eq!(store.shard(i).unwrap().get(&k).await.unwrap(), vec![i as u8]);
    }
}

#[tokio::test]
async fn close_closes_every_shard() {
    let a = Arc::new(MemoryStore::new());
    let b = Arc::new(MemoryStore::new());
    let store = PartitionedStore::new(vec![a.clone() as Arc<dyn Store>, b.clone() as Arc<dyn Store>]).unwrap();

    store.close().await.unwrap();
    assert!(matches!(a.get(b"k").await, Err(StoreError::Closed)));
    assert!(matches!(b.get(b"k").await, Err(StoreError::Closed)));
    assert!(matches!(store.close().await, Err(StoreError::Closed)));
}
