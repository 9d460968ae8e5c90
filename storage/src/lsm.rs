//! # LSM Engine Adapter
//!
//! Wraps a single RocksDB instance. RocksDB stores zero-length values
//! natively and reports misses as `Ok(None)`, so the adapter's job is mostly
//! error translation and lifecycle:
//!
//! - `rocksdb::Error` becomes [`StoreError::Io`]; a miss becomes `NotFound`.
//! - Batches are native `rocksdb::WriteBatch`es, applied atomically.
//! - `close` flushes memtables and drops the handle, which releases the
//!   directory lock so the same path can be reopened.
//!
//! Cache and file-handle budgets come from the entry-type ratio table (see
//! [`crate::entry`]) and arrive here already scaled via [`LsmOptions`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rocksdb::{BlockBasedOptions, Cache, Options, WriteBatch, DB};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{run_blocking, Batch, BatchOp, DbType, OpBuffer, Slot, Store};

/// Smallest block cache handed to RocksDB, regardless of ratio scaling.
const MIN_CACHE_BYTES: usize = 8 * 1024 * 1024;

/// Smallest open-file budget handed to RocksDB.
const MIN_OPEN_FILES: i32 = 16;

/// Tuning knobs for one RocksDB instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsmOptions {
    /// Block cache capacity in bytes.
    pub cache_bytes: usize,
    /// Maximum number of open table files.
    pub max_open_files: i32,
    /// Memtable size in bytes.
    pub write_buffer_bytes: usize,
}

impl Default for LsmOptions {
    fn default() -> Self {
        Self {
            cache_bytes: 64 * 1024 * 1024,
            max_open_files: 256,
            write_buffer_bytes: 16 * 1024 * 1024,
        }
    }
}

impl LsmOptions {
    /// Options sized from a cache budget in MiB and a file-handle budget.
    pub fn with_budget(cache_mb: usize, open_files: i32) -> Self {
        let cache_bytes = cache_mb.saturating_mul(1024 * 1024).max(MIN_CACHE_BYTES);
        Self {
            cache_bytes,
            max_open_files: open_files.max(MIN_OPEN_FILES),
            // A quarter of the cache budget goes to the memtable.
            write_buffer_bytes: (cache_bytes / 4).max(MIN_CACHE_BYTES / 2),
        }
    }

    fn to_rocksdb(&self) -> Options {
        let mut table = BlockBasedOptions::default();
        table.set_block_cache(&Cache::new_lru_cache(self.cache_bytes));

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(self.max_open_files);
        opts.set_write_buffer_size(self.write_buffer_bytes);
        opts.set_block_based_table_factory(&table);
        opts
    }
}

struct LsmInner {
    db: RwLock<Option<DB>>,
    path: PathBuf,
}

impl fmt::Debug for LsmInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LsmInner")
            .field("path", &self.path)
            .field("open", &self.db.read().is_some())
            .finish()
    }
}

impl LsmInner {
    fn with_db<T>(&self, f: impl FnOnce(&DB) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        f(db)
    }
}

/// RocksDB-backed [`Store`].
#[derive(Debug, Clone)]
pub struct LsmStore {
    inner: Arc<LsmInner>,
}

impl LsmStore {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P, options: &LsmOptions) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        let db = DB::open(&options.to_rocksdb(), &path)?;
        debug!(path = %path.display(), cache_bytes = options.cache_bytes, "lsm store opened");
        Ok(Self {
            inner: Arc::new(LsmInner {
                db: RwLock::new(Some(db)),
                path,
            }),
        })
    }

    /// Filesystem location of this store.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

#[async_trait]
impl Store for LsmStore {
    fn kind(&self) -> DbType {
        DbType::Lsm
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.inner.with_db(|db| Ok(db.put(key, value)?))
    }

    async fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.inner
            .with_db(|db| Ok(Slot::from_native(db.get_pinned(key)?)))?
            .into_value()
    }

    async fn has(&self, key: &[u8]) -> StoreResult<bool> {
        self.inner.with_db(|db| Ok(db.get_pinned(key)?.is_some()))
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.inner.with_db(|db| Ok(db.delete(key)?))
    }

    fn new_batch(&self) -> Box<dyn Batch> {
        Box::new(LsmBatch {
            inner: Arc::clone(&self.inner),
            buf: OpBuffer::default(),
        })
    }

    async fn flush(&self) -> StoreResult<()> {
        let inner = Arc::clone(&self.inner);
        run_blocking(move || inner.with_db(|db| Ok(db.flush()?))).await
    }

    async fn close(&self) -> StoreResult<()> {
        let db = self.inner.db.write().take().ok_or(StoreError::Closed)?;
        let flushed = run_blocking(move || {
            let flushed = db.flush();
            drop(db);
            Ok(flushed?)
        })
        .await;
        debug!(path = %self.inner.path.display(), "lsm store closed");
        flushed
    }
}

/// Batch for [`LsmStore`], applied as one native `WriteBatch`.
#[derive(Debug)]
pub struct LsmBatch {
    inner: Arc<LsmInner>,
    buf: OpBuffer,
}

#[async_trait]
impl Batch for LsmBatch {
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
        let mut native = WriteBatch::default();
        for op in self.buf.ops() {
            match op {
                BatchOp::Put { key, value } => native.put(key, value),
                BatchOp::Delete { key } => native.delete(key),
            }
        }
        let inner = Arc::clone(&self.inner);
        run_blocking(move || inner.with_db(|db| Ok(db.write(native)?))).await
    }

    fn reset(&mut self) {
        self.buf.clear();
    }
}
