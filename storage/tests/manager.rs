//! Database manager: directory layout, reopen, fail-fast startup, and the
//! remote namespace lifecycle.

use chaindb_storage::remote::{Item, MetaTable, ObjectStoreTable, RemoteClient, RemoteEndpoint};
use chaindb_storage::{DbConfig, DbManager, DbType, EntryType, RatioTable, StoreError};

fn on_disk(db_type: DbType, dir: &tempfile::TempDir) -> DbConfig {
    DbConfig {
        dir: dir.path().to_path_buf(),
        db_type,
        state_trie_shards: 2,
        cache_size_mb: 64,
        open_files_limit: 256,
        ..DbConfig::default()
    }
}

#[tokio::test]
async fn sorted_kv_layout_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let manager = DbManager::open(on_disk(DbType::SortedKv, &dir)).await.unwrap();

    for t in EntryType::ALL {
        manager.store(t).put(b"genesis", t.base_dir().as_bytes()).await.unwrap();
    }
    manager.close().await.unwrap();

    assert!(dir.path().join("header").is_dir());
    assert!(dir.path().join("statetrie").join("0").is_dir());
    assert!(dir.path().join("statetrie").join("1").is_dir());
    assert!(dir.path().join("statetrie_migrated").join("1").is_dir());

    let reopened = DbManager::open(on_disk(DbType::SortedKv, &dir)).await.unwrap();
    for t in EntryType::ALL {
        assert_eq!(
            reopened.store(t).get(b"genesis").await.unwrap(),
            t.base_dir().as_bytes().to_vec()
        );
    }
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn entry_types_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let manager = DbManager::open(on_disk(DbType::Lsm, &dir)).await.unwrap();

    manager.store(EntryType::Header).put(b"k", b"header").await.unwrap();
    assert!(!manager.store(EntryType::Body).has(b"k").await.unwrap());
    assert!(manager
        .store(EntryType::Receipts)
        .get(b"k")
        .await
        .unwrap_err()
        .is_not_found());
    manager.close().await.unwrap();
}

#[tokio::test]
async fn startup_fails_fast_when_a_store_cannot_open() {
    let dir = tempfile::tempdir().unwrap();
    let first = DbManager::open(on_disk(DbType::Lsm, &dir)).await.unwrap();

    // The directory locks are held by `first`.
    let second = DbManager::open(on_disk(DbType::Lsm, &dir)).await;
    assert!(matches!(second, Err(StoreError::Io(_))));

    first.store(EntryType::Misc).put(b"still", b"usable").await.unwrap();
    assert_eq!(first.store(EntryType::Misc).get(b"still").await.unwrap(), b"usable".to_vec());
    first.close().await.unwrap();
    drop(first);

    // The aborted open released whatever it had opened.
    let third = DbManager::open(on_disk(DbType::Lsm, &dir)).await.unwrap();
    assert_eq!(third.store(EntryType::Misc).get(b"still").await.unwrap(), b"usable".to_vec());
    third.close().await.unwrap();
}

#[tokio::test]
async fn remote_manager_uses_one_namespace_per_entry_and_shard() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = RemoteEndpoint::Local {
        path: dir.path().join("remote"),
    };
    let mut config = DbConfig {
        db_type: DbType::Remote,
        state_trie_shards: 2,
        ..DbConfig::default()
    };
    config.remote.endpoint = endpoint.clone();

    let manager = DbManager::open(config.clone()).await.unwrap();
    assert_eq!(manager.remote_handles().len(), 7 + 2 * 2);
    manager.store(EntryType::TxLookup).put(b"tx", b"block-7").await.unwrap();
    manager.close().await.unwrap();

    let client = RemoteClient::connect(&endpoint).unwrap();
    let table = ObjectStoreTable::new(&client, "chaindb-txlookup");
    assert_eq!(table.get_item(b"tx").await.unwrap(), Some(Item::Inline(b"block-7".to_vec())));

    DbManager::decommission_remote(&config, &RatioTable::default()).await.unwrap();
    assert_eq!(table.get_item(b"tx").await.unwrap(), None);
}

#[tokio::test]
async fn decommission_requires_remote_engine() {
    let err = DbManager::decommission_remote(&DbConfig::default(), &RatioTable::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Config(_)));
}
