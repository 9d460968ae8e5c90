//! Conformance tests for [`Store`] implementations.
//!
//! Every engine, and a partitioned store over any engine, must pass these.
//! Each check writes under its own key prefix, so they can run in sequence
//! against one store. Reads after writes go through [`Store::flush`] so
//! engines with deferred writes are held to the same expectations.
//!
//! The concurrent checks spawn tasks, so run the suite on a multi-threaded
//! runtime for them to overlap.

use std::sync::Arc;

use tokio::task::JoinSet;

use crate::error::{StoreError, StoreResult};
use crate::store::Store;

/// Run all conformance checks against `store`. Leaves the store open.
pub async fn conformance(store: Arc<dyn Store>) -> StoreResult<()> {
    test_nil_value(store.as_ref()).await?;
    test_not_found(store.as_ref()).await?;
    test_put_get(store.as_ref()).await?;
    test_delete_is_idempotent(store.as_ref()).await?;
    test_batch_order(store.as_ref()).await?;
    test_batch_reuse(store.as_ref()).await?;
    test_parallel_put_get(Arc::clone(&store)).await?;
    test_contended_key(store).await?;
    Ok(())
}

/// Keys and values exercised by the point-operation checks.
pub fn test_values() -> Vec<Vec<u8>> {
    vec![
        b"".to_vec(),
        b"a".to_vec(),
        b"1251".to_vec(),
        b"\x00123\x00".to_vec(),
    ]
}

fn key(prefix: &str, suffix: &[u8]) -> Vec<u8> {
    let mut k = prefix.as_bytes().to_vec();
    k.extend_from_slice(suffix);
    k
}

/// An empty value is stored, found, and read back as empty, both through
/// `put` and through a batch.
pub async fn test_nil_value(store: &dyn Store) -> StoreResult<()> {
    let direct = key("nil/", b"direct");
    store.put(&direct, b"").await?;
    store.flush().await?;
    assert!(store.has(&direct).await?);
    assert_eq!(store.get(&direct).await?, Vec::<u8>::new());

    let batched = key("nil/", b"batch");
    let mut batch = store.new_batch();
    batch.put(&batched, b"")?;
    batch.write().await?;
    store.flush().await?;
    assert!(store.has(&batched).await?);
    assert_eq!(store.get(&batched).await?, Vec::<u8>::new());
    Ok(())
}

/// Absent keys read as `NotFound`, never as an empty value.
pub async fn test_not_found(store: &dyn Store) -> StoreResult<()> {
    let missing = key("missing/", b"\x91\xd6\xf7");
    match store.get(&missing).await {
        Err(StoreError::NotFound) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert!(!store.has(&missing).await?);
    Ok(())
}

/// Put, overwrite, and delete each test value. Mutating a returned value
/// never changes what is stored.
pub async fn test_put_get(store: &dyn Store) -> StoreResult<()> {
    let values = test_values();

    for v in &values {
        store.put(&key("pg/", v), v).await?;
    }
    store.flush().await?;
    for v in &values {
        let k = key("pg/", v);
        let mut got = store.get(&k).await?;
        assert_eq!(&got, v);
        if let Some(first) = got.first_mut() {
            *first ^= 0xff;
        }
        assert_eq!(&store.get(&k).await?, v);
    }

    for v in &values {
        store.put(&key("pg/", v), b"?").await?;
    }
    store.flush().await?;
    for v in &values {
        assert_eq!(store.get(&key("pg/", v)).await?, b"?".to_vec());
    }

    for v in &values {
        store.delete(&key("pg/", v)).await?;
    }
    store.flush().await?;
    for v in &values {
        let k = key("pg/", v);
        assert!(store.get(&k).await.unwrap_err().is_not_found());
        assert!(!store.has(&k).await?);
    }
    Ok(())
}

/// Deleting an absent key succeeds, as does deleting twice.
pub async fn test_delete_is_idempotent(store: &dyn Store) -> StoreResult<()> {
    let k = key("del/", b"k");
    store.delete(&k).await?;
    store.put(&k, b"v").await?;
    store.delete(&k).await?;
    store.delete(&k).await?;
    store.flush().await?;
    assert!(!store.has(&k).await?);
    Ok(())
}

/// Batched operations apply in order and stay invisible until written.
pub async fn test_batch_order(store: &dyn Store) -> StoreResult<()> {
    let a = key("bo/", b"a");
    let b = key("bo/", b"b");
    let c = key("bo/", b"c");
    store.put(&c, b"old").await?;
    store.flush().await?;

    let mut batch = store.new_batch();
    batch.put(&a, b"1")?;
    batch.put(&a, b"2")?;
    batch.put(&b, b"x")?;
    batch.delete(&b)?;
    batch.delete(&c)?;
    assert_eq!(batch.value_size(), 1 + 1 + 1 + 1 + 1);
    assert!(!store.has(&a).await?);

    batch.write().await?;
    store.flush().await?;
    assert_eq!(store.get(&a).await?, b"2".to_vec());
    assert!(!store.has(&b).await?);
    assert!(!store.has(&c).await?);
    Ok(())
}

/// `write` keeps the buffer; `reset` empties it.
pub async fn test_batch_reuse(store: &dyn Store) -> StoreResult<()> {
    let k = key("br/", b"k");
    let mut batch = store.new_batch();
    batch.put(&k, b"value")?;
    batch.write().await?;
    assert_eq!(batch.value_size(), 5);

    store.delete(&k).await?;
    batch.write().await?;
    store.flush().await?;
    assert_eq!(store.get(&k).await?, b"value".to_vec());

    batch.reset();
    assert_eq!(batch.value_size(), 0);
    batch.write().await?;
    Ok(())
}

async fn join_workers(mut workers: JoinSet<StoreResult<()>>) -> StoreResult<()> {
    while let Some(joined) = workers.join_next().await {
        joined.map_err(|e| StoreError::Io(format!("conformance worker failed: {e}")))??;
    }
    Ok(())
}

/// Eight tasks over disjoint keys, each running put, get, delete, get on
/// its own keys while the others do the same.
pub async fn test_parallel_put_get(store: Arc<dyn Store>) -> StoreResult<()> {
    const WORKERS: usize = 8;
    const PER_WORKER: usize = 16;

    let mut workers = JoinSet::new();
    for w in 0..WORKERS {
        let store = Arc::clone(&store);
        workers.spawn(async move {
            for i in 0..PER_WORKER {
                let k = key("par/", format!("{w}-{i}").as_bytes());
                store.put(&k, &k).await?;
                store.flush().await?;
                assert_eq!(store.get(&k).await?, k);

                store.delete(&k).await?;
                store.flush().await?;
                assert!(store.get(&k).await.unwrap_err().is_not_found());
                assert!(!store.has(&k).await?);
            }
            Ok::<_, StoreError>(())
        });
    }
    join_workers(workers).await
}

/// Eight tasks overwrite one key at once. The key ends up holding exactly
/// one of the written values, never a mix or a missing value.
pub async fn test_contended_key(store: Arc<dyn Store>) -> StoreResult<()> {
    const WORKERS: u8 = 8;
    const ROUNDS: u8 = 16;

    let k = key("contended/", b"k");
    let mut workers = JoinSet::new();
    for w in 0..WORKERS {
        let store = Arc::clone(&store);
        let k = k.clone();
        workers.spawn(async move {
            for round in 0..ROUNDS {
                store.put(&k, &[w; 32]).await?;
                if round % 4 == 0 {
                    let mut batch = store.new_batch();
                    batch.put(&k, &[w; 32])?;
                    batch.write().await?;
                }
            }
            Ok::<_, StoreError>(())
        });
    }
    join_workers(workers).await?;
    store.flush().await?;

    let value = store.get(&k).await?;
    assert_eq!(value.len(), 32);
    assert!(value[0] < WORKERS);
    assert!(value.iter().all(|b| *b == value[0]));
    Ok(())
}
