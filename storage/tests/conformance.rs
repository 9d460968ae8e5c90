//! Runs the shared conformance suite against every engine kind, alone and
//! behind a partition router.
//!
//! Each test owns its own temporary directory or in-memory namespace and
//! runs on a multi-threaded runtime so the concurrent checks overlap.

use std::sync::Arc;

use chaindb_storage::conformance::conformance;
use chaindb_storage::lsm::{LsmOptions, LsmStore};
use chaindb_storage::memory::MemoryStore;
use chaindb_storage::remote::{RemoteClient, RemoteConfig, RemoteHandle, RemoteStore};
use chaindb_storage::sorted_kv::SortedKvStore;
use chaindb_storage::{PartitionedStore, Store};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

async fn remote_store(client: &RemoteClient, namespace: &str) -> RemoteStore {
    let handle = RemoteHandle::new(client, RemoteConfig::default(), namespace).expect("remote handle");
    RemoteStore::open(&handle).await.expect("open remote store")
}

fn lsm_store(dir: &tempfile::TempDir, name: &str) -> LsmStore {
    LsmStore::open(dir.path().join(name), &LsmOptions::default()).expect("open lsm store")
}

// ---------------------------------------------------------------------------
// Single engines
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn memory_conforms() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    conformance(Arc::clone(&store)).await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn lsm_conforms() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn Store> = Arc::new(lsm_store(&dir, "lsm"));
    conformance(Arc::clone(&store)).await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn sorted_kv_conforms() {
    let store: Arc<dyn Store> = Arc::new(SortedKvStore::open_temporary().unwrap());
    conformance(Arc::clone(&store)).await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn remote_conforms() {
    let client = RemoteClient::in_memory();
    let store: Arc<dyn Store> = Arc::new(remote_store(&client, "conformance").await);
    conformance(Arc::clone(&store)).await.unwrap();
    store.close().await.unwrap();
}

// ---------------------------------------------------------------------------
// Partitioned
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn partitioned_memory_conforms() {
    let shards: Vec<Arc<dyn Store>> = (0..4).map(|_| Arc::new(MemoryStore::new()) as Arc<dyn Store>).collect();
    let store: Arc<dyn Store> = Arc::new(PartitionedStore::new(shards).unwrap());
    conformance(Arc::clone(&store)).await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn partitioned_lsm_conforms() {
    let dir = tempfile::tempdir().unwrap();
    let shards: Vec<Arc<dyn Store>> = (0..2)
        .map(|i| Arc::new(lsm_store(&dir, &i.to_string())) as Arc<dyn Store>)
        .collect();
    let store: Arc<dyn Store> = Arc::new(PartitionedStore::new(shards).unwrap());
    conformance(Arc::clone(&store)).await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn partitioned_sorted_kv_conforms() {
    let shards: Vec<Arc<dyn Store>> = (0..4)
        .map(|_| Arc::new(SortedKvStore::open_temporary().unwrap()) as Arc<dyn Store>)
        .collect();
    let store: Arc<dyn Store> = Arc::new(PartitionedStore::new(shards).unwrap());
    conformance(Arc::clone(&store)).await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn partitioned_remote_conforms() {
    let client = RemoteClient::in_memory();
    let mut shards: Vec<Arc<dyn Store>> = Vec::new();
    for i in 0..4 {
        shards.push(Arc::new(remote_store(&client, &format!("shard-{i}")).await));
    }
    let store: Arc<dyn Store> = Arc::new(PartitionedStore::new(shards).unwrap());
    conformance(Arc::clone(&store)).await.unwrap();
    store.close().await.unwrap();
}
