//! # Database Manager
//!
//! Opens one store per [`EntryType`] according to a [`DbConfig`] and a
//! [`RatioTable`]:
//!
//! ```text
//! <dir>/misc                 one store
//! <dir>/header               one store
//! ...
//! <dir>/statetrie/0..N       N shards behind a PartitionedStore
//! <dir>/statetrie_migrated/0..N
//! ```
//!
//! Remote engines use namespaces `<prefix>-<entry dir>` and
//! `<prefix>-<entry dir>-<shard>` instead of directories. The cache and
//! open-file budgets are split by ratio first, then evenly across shards.
//!
//! Startup is fail-fast: if any store fails to open, every store opened so
//! far is closed again and the error is returned.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::DbConfig;
use crate::entry::{EntrySpec, EntryType, RatioTable};
use crate::error::{StoreError, StoreResult};
use crate::lsm::{LsmOptions, LsmStore};
use crate::memory::MemoryStore;
use crate::partition::PartitionedStore;
use crate::remote::{RemoteClient, RemoteHandle, RemoteStore};
use crate::sorted_kv::{SortedKvOptions, SortedKvStore};
use crate::store::{DbType, Store};

/// Where one physical store lives.
#[derive(Debug, Clone)]
struct Placement {
    path: PathBuf,
    namespace: String,
    cache_mb: usize,
    open_files: usize,
}

/// Every entry-type store of a node.
#[derive(Debug)]
pub struct DbManager {
    config: DbConfig,
    ratios: RatioTable,
    stores: HashMap<EntryType, Arc<dyn Store>>,
    handles: Vec<RemoteHandle>,
}

impl DbManager {
    /// Open with the default ratio table.
    pub async fn open(config: DbConfig) -> StoreResult<Self> {
        Self::open_with_ratios(config, RatioTable::default()).await
    }

    pub async fn open_with_ratios(config: DbConfig, ratios: RatioTable) -> StoreResult<Self> {
        config.validate()?;
        let client = match config.db_type {
            DbType::Remote => Some(RemoteClient::connect(&config.remote.endpoint)?),
            _ => None,
        };

        let mut opener = Opener {
            config: &config,
            client: client.as_ref(),
            handles: Vec::new(),
        };
        let mut opened: Vec<(EntryType, Arc<dyn Store>)> = Vec::new();
        for spec in ratios.entries() {
            match opener.open_entry(&ratios, spec).await {
                Ok(store) => opened.push((spec.entry_type, store)),
                Err(e) => {
                    error!(entry = %spec.entry_type, error = %e, "failed to open store, closing opened stores");
                    for (entry, store) in &opened {
                        if let Err(close_err) = store.close().await {
                            warn!(entry = %entry, error = %close_err, "failed to close store after aborted open");
                        }
                    }
                    return Err(e);
                }
            }
        }

        info!(
            db_type = %config.db_type,
            dir = %config.dir.display(),
            state_trie_shards = config.state_trie_shards,
            "storage opened"
        );
        let handles = opener.handles;
        Ok(Self {
            config,
            ratios,
            stores: opened.into_iter().collect(),
            handles,
        })
    }

    /// Store for `entry_type`.
    pub fn store(&self, entry_type: EntryType) -> Arc<dyn Store> {
        // Every entry type of a validated ratio table is opened.
        Arc::clone(&self.stores[&entry_type])
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn ratios(&self) -> &RatioTable {
        &self.ratios
    }

    /// Remote handles in open order. Empty unless the engine is remote.
    pub fn remote_handles(&self) -> &[RemoteHandle] {
        &self.handles
    }

    /// Close every store, continuing past failures. Returns the first error.
    pub async fn close(&self) -> StoreResult<()> {
        let mut first_err = None;
        for spec in self.ratios.entries() {
            if let Err(e) = self.store(spec.entry_type).close().await {
                error!(entry = %spec.entry_type, error = %e, "failed to close store");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Remote namespaces `config` would open, in open order.
    pub fn remote_namespaces(config: &DbConfig, ratios: &RatioTable) -> Vec<String> {
        ratios
            .entries()
            .iter()
            .flat_map(|spec| {
                shard_slots(config, spec)
                    .map(|shard| namespace(&config.remote.table_prefix, &spec.dir, shard))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Delete every remote table and bucket `config` refers to. Stores must
    /// not be open against them.
    pub async fn decommission_remote(config: &DbConfig, ratios: &RatioTable) -> StoreResult<()> {
        if config.db_type != DbType::Remote {
            return Err(StoreError::Config(format!(
                "decommission needs a remote engine, configured {}",
                config.db_type
            )));
        }
        config.validate()?;
        let client = RemoteClient::connect(&config.remote.endpoint)?;
        for name in Self::remote_namespaces(config, ratios) {
            RemoteHandle::new(&client, config.remote.clone(), &name)?
                .decommission()
                .await?;
            info!(namespace = %name, "remote namespace decommissioned");
        }
        Ok(())
    }
}

/// `None` for an unpartitioned entry, `Some(i)` for each shard otherwise.
fn shard_slots(config: &DbConfig, spec: &EntrySpec) -> impl Iterator<Item = Option<usize>> {
    let slots: Vec<Option<usize>> = if spec.entry_type.is_partitioned() {
        (0..config.state_trie_shards).map(Some).collect()
    } else {
        vec![None]
    };
    slots.into_iter()
}

fn namespace(prefix: &str, dir: &str, shard: Option<usize>) -> String {
    match shard {
        Some(i) => format!("{prefix}-{dir}-{i}"),
        None => format!("{prefix}-{dir}"),
    }
}

struct Opener<'a> {
    config: &'a DbConfig,
    client: Option<&'a RemoteClient>,
    handles: Vec<RemoteHandle>,
}

impl Opener<'_> {
    async fn open_entry(&mut self, ratios: &RatioTable, spec: &EntrySpec) -> StoreResult<Arc<dyn Store>> {
        let slots: Vec<Option<usize>> = shard_slots(self.config, spec).collect();
        let divisor = slots.len().max(1);
        let cache_mb = ratios.share(spec.entry_type, self.config.cache_size_mb) / divisor;
        let open_files = ratios.share(spec.entry_type, self.config.open_files_limit) / divisor;

        let base = self.config.dir.join(&spec.dir);
        let placement = |shard: Option<usize>| Placement {
            path: shard.map_or_else(|| base.clone(), |i| base.join(i.to_string())),
            namespace: namespace(&self.config.remote.table_prefix, &spec.dir, shard),
            cache_mb,
            open_files,
        };
        let placements: Vec<Placement> = slots.iter().map(|s| placement(*s)).collect();

        if !spec.entry_type.is_partitioned() {
            return self.open_one(&placements[0]).await;
        }

        let mut shards = Vec::with_capacity(placements.len());
        for place in &placements {
            match self.open_one(place).await {
                Ok(store) => shards.push(store),
                Err(e) => {
                    for (i, shard) in shards.iter().enumerate() {
                        if let Err(close_err) = shard.close().await {
                            warn!(entry = %spec.entry_type, shard = i, error = %close_err, "failed to close shard after aborted open");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(Arc::new(PartitionedStore::new(shards)?))
    }

    async fn open_one(&mut self, place: &Placement) -> StoreResult<Arc<dyn Store>> {
        let store: Arc<dyn Store> = match self.config.db_type {
            DbType::Memory => Arc::new(MemoryStore::new()),
            DbType::Lsm => {
                let open_files = i32::try_from(place.open_files).unwrap_or(i32::MAX);
                Arc::new(LsmStore::open(&place.path, &LsmOptions::with_budget(place.cache_mb, open_files))?)
            }
            DbType::SortedKv => Arc::new(SortedKvStore::open(
                &place.path,
                &SortedKvOptions::with_cache_mb(place.cache_mb),
            )?),
            DbType::Remote => {
                let client = self
                    .client
                    .ok_or_else(|| StoreError::Config("remote engine without a client".into()))?;
                let handle = RemoteHandle::new(client, self.config.remote.clone(), &place.namespace)?;
                let store = RemoteStore::open(&handle).await?;
                self.handles.push(handle);
                Arc::new(store)
            }
        };
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_every_entry_type_in_memory() {
        let manager = DbManager::open(DbConfig::default()).await.unwrap();
        for t in EntryType::ALL {
            let store = manager.store(t);
            store.put(b"key", t.base_dir().as_bytes()).await.unwrap();
        }
        for t in EntryType::ALL {
            assert_eq!(manager.store(t).get(b"key").await.unwrap(), t.base_dir().as_bytes());
        }
        manager.close().await.unwrap();
    }

    #[test]
    fn remote_namespaces_are_distinct_per_entry_and_shard() {
        let config = DbConfig {
            db_type: DbType::Remote,
            state_trie_shards: 2,
            ..DbConfig::default()
        };
        let names = DbManager::remote_namespaces(&config, &RatioTable::default());
        assert_eq!(names.len(), 7 + 2 * 2);
        assert!(names.contains(&"chaindb-misc".to_string()));
        assert!(names.contains(&"chaindb-statetrie-1".to_string()));
        assert!(names.contains(&"chaindb-statetrie_migrated-0".to_string()));

        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[tokio::test]
    async fn rejects_bad_shard_count() {
        let config = DbConfig {
            state_trie_shards: 6,
            ..DbConfig::default()
        };
        assert!(matches!(DbManager::open(config).await, Err(StoreError::Config(_))));
    }
}
