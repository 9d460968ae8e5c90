// Store throughput benchmarks.
//
// Covers single puts and gets per engine, batch writes at the ideal batch
// size, and shard routing.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use chaindb_storage::lsm::{LsmOptions, LsmStore};
use chaindb_storage::memory::MemoryStore;
use chaindb_storage::partition::shard_index;
use chaindb_storage::sorted_kv::SortedKvStore;
use chaindb_storage::{Store, IDEAL_BATCH_SIZE};

const VALUE_LEN: usize = 128;

fn runtime() -> Runtime {
    Runtime::new().expect("tokio runtime")
}

/// Trie-node-like 32-byte key for index `i`.
fn node_key(i: u64) -> Vec<u8> {
    let mut key = [0u8; 32];
    key[..8].copy_from_slice(&i.wrapping_mul(0x9e37_79b9_7f4a_7c15).to_be_bytes());
    key[24..].copy_from_slice(&i.to_be_bytes());
    key.to_vec()
}

fn engines(dir: &tempfile::TempDir) -> Vec<(&'static str, Arc<dyn Store>)> {
    vec![
        ("memory", Arc::new(MemoryStore::new())),
        (
            "lsm",
            Arc::new(LsmStore::open(dir.path().join("lsm"), &LsmOptions::default()).expect("lsm")),
        ),
        ("sorted-kv", Arc::new(SortedKvStore::open_temporary().expect("sled"))),
    ]
}

fn bench_put_get(c: &mut Criterion) {
    let rt = runtime();
    let dir = tempfile::tempdir().expect("tempdir");
    let value = vec![0x5au8; VALUE_LEN];
    let mut group = c.benchmark_group("store/put_get");
    group.throughput(Throughput::Bytes(VALUE_LEN as u64));

    for (name, store) in engines(&dir) {
        let mut i = 0u64;
        group.bench_with_input(BenchmarkId::new("put", name), &store, |b, store| {
            b.to_async(&rt).iter(|| {
                i += 1;
                let key = node_key(i);
                let store = Arc::clone(store);
                let value = value.clone();
                async move { store.put(&key, &value).await.unwrap() }
            });
        });

        let hot = node_key(1);
        rt.block_on(store.put(&hot, &value)).unwrap();
        group.bench_with_input(BenchmarkId::new("get", name), &store, |b, store| {
            b.to_async(&rt).iter(|| async { store.get(&hot).await.unwrap() });
        });
    }
    group.finish();
}

fn bench_batch_write(c: &mut Criterion) {
    let rt = runtime();
    let dir = tempfile::tempdir().expect("tempdir");
    let value = vec![0xa5u8; VALUE_LEN];
    let ops = IDEAL_BATCH_SIZE / VALUE_LEN;
    let mut group = c.benchmark_group("store/batch_write");
    group.throughput(Throughput::Elements(ops as u64));

    for (name, store) in engines(&dir) {
        group.bench_with_input(BenchmarkId::from_parameter(name), &store, |b, store| {
            b.to_async(&rt).iter(|| async {
                let mut batch = store.new_batch();
                for i in 0..ops as u64 {
                    batch.put(&node_key(i), &value).unwrap();
                }
                batch.write().await.unwrap();
            });
        });
    }
    group.finish();
}

fn bench_shard_routing(c: &mut Criterion) {
    let key = node_key(42);
    c.bench_function("partition/shard_index", |b| {
        b.iter(|| shard_index(&key, 16));
    });
}

criterion_group!(benches, bench_put_get, bench_batch_write, bench_shard_routing);
criterion_main!(benches);
