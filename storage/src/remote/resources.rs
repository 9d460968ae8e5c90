//! Remote resources: the metadata table, the payload bucket, and the client
//! that reaches them.
//!
//! Both resources are namespaces inside one object store:
//!
//! ```text
//! tables/<table>/meta/provisioned      provisioning marker
//! tables/<table>/items/k<hex(key)>     bincode-encoded Item
//! buckets/<bucket>/meta/provisioned
//! buckets/<bucket>/objects/o<hex(key)>-<epoch>-<seq>  raw payload bytes
//! ```
//!
//! The `k`/`o` prefixes keep the empty key addressable. Every payload write
//! goes to a new object; see [`object_name`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutPayload};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{RemoteEndpoint, RemoteError};
use crate::error::{StoreError, StoreResult};
use crate::store::Slot;

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// Metadata table record for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Item {
    /// A zero-length value.
    Empty,
    /// A value small enough to live in the table.
    Inline(Vec<u8>),
    /// A value stored in the payload bucket under `object`.
    External { object: String, len: u64 },
}

impl Item {
    pub fn encode(&self) -> Result<Vec<u8>, RemoteError> {
        bincode::serialize(self).map_err(|e| RemoteError::Fatal(format!("encode item: {e}")))
    }

    pub fn decode(raw: &[u8]) -> Result<Self, RemoteError> {
        bincode::deserialize(raw).map_err(|e| RemoteError::Fatal(format!("corrupt item: {e}")))
    }

    /// The slot this item stands for, if it can be resolved without the bucket.
    pub fn inline_slot(&self) -> Option<Slot> {
        match self {
            Self::Empty => Some(Slot::Empty),
            Self::Inline(v) => Some(Slot::for_write(v)),
            Self::External { .. } => None,
        }
    }
}

/// A fresh bucket object name for a new payload of `key`.
///
/// Names are never reused: the process start time keeps names from
/// different processes apart and a counter keeps names within one process
/// apart. An object is therefore written once and never changes under an
/// item that points at it.
pub fn object_name(key: &[u8]) -> String {
    static EPOCH: OnceLock<u64> = OnceLock::new();
    static SEQ: AtomicU64 = AtomicU64::new(0);

    let epoch = *EPOCH.get_or_init(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64)
    });
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("o{}-{epoch:x}-{seq:x}", hex::encode(key))
}

// ---------------------------------------------------------------------------
// Resource traits
// ---------------------------------------------------------------------------

/// Keyed item storage with single-item reads and writes.
#[async_trait]
pub trait MetaTable: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Create the table unless it already exists.
    async fn create_if_missing(&self) -> Result<(), RemoteError>;

    async fn put_item(&self, key: &[u8], item: &Item) -> Result<(), RemoteError>;

    async fn get_item(&self, key: &[u8]) -> Result<Option<Item>, RemoteError>;

    /// Remove an item. Removing a missing item succeeds.
    async fn delete_item(&self, key: &[u8]) -> Result<(), RemoteError>;

    /// Remove the table and everything in it.
    async fn drop_table(&self) -> Result<(), RemoteError>;
}

/// Named blob storage for values too large for the table.
#[async_trait]
pub trait PayloadBucket: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Create the bucket unless it already exists.
    async fn create_if_missing(&self) -> Result<(), RemoteError>;

    async fn put_object(&self, object: &str, data: Vec<u8>) -> Result<(), RemoteError>;

    async fn get_object(&self, object: &str) -> Result<Option<Vec<u8>>, RemoteError>;

    /// Remove an object. Removing a missing object succeeds.
    async fn delete_object(&self, object: &str) -> Result<(), RemoteError>;

    /// Remove the bucket and every object in it.
    async fn drop_bucket(&self) -> Result<(), RemoteError>;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Connection to the object store that hosts tables and buckets.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    store: Arc<dyn ObjectStore>,
}

impl RemoteClient {
    /// Connect to `endpoint`. No request is made until a resource is used.
    pub fn connect(endpoint: &RemoteEndpoint) -> StoreResult<Self> {
        let store: Arc<dyn ObjectStore> = match endpoint {
            RemoteEndpoint::Memory => Arc::new(InMemory::new()),
            RemoteEndpoint::Local { path } => {
                std::fs::create_dir_all(path)?;
                let fs = LocalFileSystem::new_with_prefix(path)
                    .map_err(|e| StoreError::Config(format!("local endpoint {}: {e}", path.display())))?;
                Arc::new(fs)
            }
            RemoteEndpoint::S3 {
                bucket,
                region,
                url,
                access_key_id,
                secret_access_key,
                allow_http,
            } => {
                let mut builder = AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .with_region(region)
                    .with_allow_http(*allow_http);
                if let Some(url) = url {
                    builder = builder.with_endpoint(url);
                }
                if let Some(id) = access_key_id {
                    builder = builder.with_access_key_id(id);
                }
                if let Some(secret) = secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }
                let s3 = builder
                    .build()
                    .map_err(|e| StoreError::Config(format!("s3 endpoint {bucket}: {e}")))?;
                Arc::new(s3)
            }
        };
        debug!(store = %store, "remote client connected");
        Ok(Self { store })
    }

    /// Process-local client, mostly for tests and ephemeral nodes.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
        }
    }

    /// Wrap an already-configured object store.
    pub fn from_object_store(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

// ---------------------------------------------------------------------------
// Object-store backed resources
// ---------------------------------------------------------------------------

fn classify(e: object_store::Error) -> RemoteError {
    match e {
        object_store::Error::Generic { .. } => RemoteError::Transient(e.to_string()),
        other => RemoteError::Fatal(other.to_string()),
    }
}

async fn read_optional(store: &dyn ObjectStore, path: &Path) -> Result<Option<Bytes>, RemoteError> {
    match store.get(path).await {
        Ok(res) => Ok(Some(res.bytes().await.map_err(classify)?)),
        Err(object_store::Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(classify(e)),
    }
}

async fn delete_optional(store: &dyn ObjectStore, path: &Path) -> Result<(), RemoteError> {
    match store.delete(path).await {
        Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
        Err(e) => Err(classify(e)),
    }
}

async fn delete_prefix(store: &dyn ObjectStore, prefix: &Path) -> Result<usize, RemoteError> {
    let listed: Vec<ObjectMeta> = store.list(Some(prefix)).try_collect().await.map_err(classify)?;
    for meta in &listed {
        delete_optional(store, &meta.location).await?;
    }
    Ok(listed.len())
}

async fn ensure_marker(store: &dyn ObjectStore, marker: &Path, name: &str) -> Result<bool, RemoteError> {
    match store.head(marker).await {
        Ok(_) => Ok(false),
        Err(object_store::Error::NotFound { .. }) => {
            store
                .put(marker, PutPayload::from(name.as_bytes().to_vec()))
                .await
                .map_err(classify)?;
            Ok(true)
        }
        Err(e) => Err(classify(e)),
    }
}

/// [`MetaTable`] stored as one object per item.
#[derive(Debug, Clone)]
pub struct ObjectStoreTable {
    store: Arc<dyn ObjectStore>,
    name: String,
    root: Path,
}

impl ObjectStoreTable {
    pub fn new(client: &RemoteClient, name: &str) -> Self {
        Self {
            store: Arc::clone(client.object_store()),
            name: name.to_string(),
            root: Path::from_iter(["tables", name]),
        }
    }

    fn item_path(&self, key: &[u8]) -> Path {
        self.root.child("items").child(format!("k{}", hex::encode(key)))
    }

    fn marker(&self) -> Path {
        self.root.child("meta").child("provisioned")
    }
}

#[async_trait]
impl MetaTable for ObjectStoreTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_if_missing(&self) -> Result<(), RemoteError> {
        if ensure_marker(self.store.as_ref(), &self.marker(), &self.name).await? {
            debug!(table = %self.name, "metadata table created");
        }
        Ok(())
    }

    async fn put_item(&self, key: &[u8], item: &Item) -> Result<(), RemoteError> {
        let payload = PutPayload::from(item.encode()?);
        self.store
            .put(&self.item_path(key), payload)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn get_item(&self, key: &[u8]) -> Result<Option<Item>, RemoteError> {
        read_optional(self.store.as_ref(), &self.item_path(key))
            .await?
            .map(|raw| Item::decode(&raw))
            .transpose()
    }

    async fn delete_item(&self, key: &[u8]) -> Result<(), RemoteError> {
        delete_optional(self.store.as_ref(), &self.item_path(key)).await
    }

    async fn drop_table(&self) -> Result<(), RemoteError> {
        let removed = delete_prefix(self.store.as_ref(), &self.root).await?;
        debug!(table = %self.name, removed, "metadata table dropped");
        Ok(())
    }
}

/// [`PayloadBucket`] stored under its own object-store prefix.
#[derive(Debug, Clone)]
pub struct ObjectStoreBucket {
    store: Arc<dyn ObjectStore>,
    name: String,
    root: Path,
}

impl ObjectStoreBucket {
    pub fn new(client: &RemoteClient, name: &str) -> Self {
        Self {
            store: Arc::clone(client.object_store()),
            name: name.to_string(),
            root: Path::from_iter(["buckets", name]),
        }
    }

    fn object_path(&self, object: &str) -> Path {
        self.root.child("objects").child(object)
    }

    fn marker(&self) -> Path {
        self.root.child("meta").child("provisioned")
    }
}

#[async_trait]
impl PayloadBucket for ObjectStoreBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_if_missing(&self) -> Result<(), RemoteError> {
        if ensure_marker(self.store.as_ref(), &self.marker(), &self.name).await? {
            debug!(bucket = %self.name, "payload bucket created");
        }
        Ok(())
    }

    async fn put_object(&self, object: &str, data: Vec<u8>) -> Result<(), RemoteError> {
        self.store
            .put(&self.object_path(object), PutPayload::from(data))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn get_object(&self, object: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        Ok(read_optional(self.store.as_ref(), &self.object_path(object))
            .await?
            .map(|b| b.to_vec()))
    }

    async fn delete_object(&self, object: &str) -> Result<(), RemoteError> {
        delete_optional(self.store.as_ref(), &self.object_path(object)).await
    }

    async fn drop_bucket(&self) -> Result<(), RemoteError> {
        let removed = delete_prefix(self.store.as_ref(), &self.root).await?;
        debug!(bucket = %self.name, removed, "payload bucket dropped");
        Ok(())
    }
}
