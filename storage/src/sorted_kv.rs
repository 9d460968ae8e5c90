//! # Sorted-KV Engine Adapter
//!
//! Wraps a sled database. Engines of this class cannot be trusted with
//! zero-length values (value-log separated engines in particular drop or
//! reject them), so this adapter never hands the engine a raw value. Every
//! value is stored behind a one-byte tag:
//!
//! | Tag    | Layout          | Decodes to        |
//! |--------|-----------------|-------------------|
//! | `0x00` | `[0x00]`        | `Slot::Empty`     |
//! | `0x01` | `[0x01, v...]`  | `Slot::Present(v)`|
//!
//! The stored representation is therefore never empty, and a raw value
//! without a known tag is reported as corruption (`Io`) rather than being
//! passed through.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sled::{Db, IVec};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{run_blocking, Batch, BatchOp, DbType, OpBuffer, Slot, Store};

const TAG_EMPTY: u8 = 0x00;
const TAG_PRESENT: u8 = 0x01;

/// Encode a caller value into its stored form.
pub fn encode_value(value: &[u8]) -> Vec<u8> {
    if value.is_empty() {
        return vec![TAG_EMPTY];
    }
    let mut out = Vec::with_capacity(value.len() + 1);
    out.push(TAG_PRESENT);
    out.extend_from_slice(value);
    out
}

/// Decode a stored value read back from sled.
pub fn decode_value(raw: Option<&[u8]>) -> StoreResult<Slot> {
    match raw {
        None => Ok(Slot::Absent),
        Some([TAG_EMPTY]) => Ok(Slot::Empty),
        Some([TAG_PRESENT, rest @ ..]) if !rest.is_empty() => Ok(Slot::Present(rest.to_vec())),
        Some(other) => Err(StoreError::Io(format!(
            "sled: corrupt value encoding ({} bytes, tag {:?})",
            other.len(),
            other.first()
        ))),
    }
}

/// Tuning knobs for one sled instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedKvOptions {
    /// Page cache capacity in bytes.
    pub cache_bytes: u64,
    /// Background flush interval in milliseconds. `None` disables it.
    pub flush_every_ms: Option<u64>,
}

impl Default for SortedKvOptions {
    fn default() -> Self {
        Self {
            cache_bytes: 64 * 1024 * 1024,
            flush_every_ms: Some(500),
        }
    }
}

impl SortedKvOptions {
    pub fn with_cache_mb(cache_mb: usize) -> Self {
        Self {
            cache_bytes: (cache_mb as u64).saturating_mul(1024 * 1024).max(4 * 1024 * 1024),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct SortedKvInner {
    db: RwLock<Option<Db>>,
    path: PathBuf,
}

impl SortedKvInner {
    fn with_db<T>(&self, f: impl FnOnce(&Db) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        f(db)
    }
}

/// sled-backed [`Store`] with tagged value encoding.
#[derive(Debug, Clone)]
pub struct SortedKvStore {
    inner: Arc<SortedKvInner>,
}

impl SortedKvStore {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P, options: &SortedKvOptions) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::Config::new()
            .path(&path)
            .cache_capacity(options.cache_bytes)
            .flush_every_ms(options.flush_every_ms)
            .open()?;
        debug!(path = %path.display(), cache_bytes = options.cache_bytes, "sorted-kv store opened");
        Ok(Self::from_db(db, path))
    }

    /// A store that lives in a temporary directory removed on drop.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::from_db(db, PathBuf::new()))
    }

    fn from_db(db: Db, path: PathBuf) -> Self {
        Self {
            inner: Arc::new(SortedKvInner {
                db: RwLock::new(Some(db)),
                path,
            }),
        }
    }

    /// Raw stored bytes under `key`, bypassing decoding.
    pub fn raw(&self, key: &[u8]) -> StoreResult<Option<IVec>> {
        self.inner.with_db(|db| Ok(db.get(key)?))
    }
}

#[async_trait]
impl Store for SortedKvStore {
    fn kind(&self) -> DbType {
        DbType::SortedKv
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.inner.with_db(|db| {
            db.insert(key, encode_value(value))?;
            Ok(())
        })
    }

    async fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        let raw = self.raw(key)?;
        decode_value(raw.as_deref())?.into_value()
    }

    async fn has(&self, key: &[u8]) -> StoreResult<bool> {
        let raw = self.raw(key)?;
        Ok(decode_value(raw.as_deref())?.is_present())
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.inner.with_db(|db| {
            db.remove(key)?;
            Ok(())
        })
    }

    fn new_batch(&self) -> Box<dyn Batch> {
        Box::new(SortedKvBatch {
            inner: Arc::clone(&self.inner),
            buf: OpBuffer::default(),
        })
    }

    async fn flush(&self) -> StoreResult<()> {
        let inner = Arc::clone(&self.inner);
        run_blocking(move || {
            inner.with_db(|db| {
                db.flush()?;
                Ok(())
            })
        })
        .await
    }

    async fn close(&self) -> StoreResult<()> {
        let db = self.inner.db.write().take().ok_or(StoreError::Closed)?;
        let flushed = run_blocking(move || {
            let flushed = db.flush();
            drop(db);
            flushed?;
            Ok(())
        })
        .await;
        debug!(path = %self.inner.path.display(), "sorted-kv store closed");
        flushed
    }
}

/// Batch for [`SortedKvStore`], applied as one native `sled::Batch`.
#[derive(Debug)]
pub struct SortedKvBatch {
    inner: Arc<SortedKvInner>,
    buf: OpBuffer,
}

#[async_trait]
impl Batch for SortedKvBatch {
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
        let mut native = sled::Batch::default();
        for op in self.buf.ops() {
            match op {
                BatchOp::Put { key, value } => native.insert(key.as_slice(), encode_value(value)),
                BatchOp::Delete { key } => native.remove(key.as_slice()),
            }
        }
        let inner = Arc::clone(&self.inner);
        run_blocking(move || inner.with_db(|db| Ok(db.apply_batch(native)?))).await
    }

    fn reset(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn encoding_never_produces_empty_raw_value() {
        assert_eq!(encode_value(b""), vec![TAG_EMPTY]);
        assert_eq!(encode_value(b"ab"), vec![TAG_PRESENT, b'a', b'b']);
        assert_eq!(decode_value(Some(&encode_value(b""))).unwrap(), Slot::Empty);
        assert_eq!(
            decode_value(Some(&encode_value(b"\x00"))).unwrap(),
            Slot::Present(vec![0])
        );
        assert_eq!(decode_value(None).unwrap(), Slot::Absent);
    }

    #[test]
    fn unknown_encoding_is_corruption() {
        assert!(matches!(decode_value(Some(b"")), Err(StoreError::Io(_))));
        assert!(matches!(decode_value(Some(&[0x07, 1])), Err(StoreError::Io(_))));
        assert!(matches!(decode_value(Some(&[TAG_PRESENT])), Err(StoreError::Io(_))));
        assert!(matches!(decode_value(Some(&[TAG_EMPTY, 1])), Err(StoreError::Io(_))));
    }

    #[tokio::test]
    async fn flush_and_close_leave_the_executor_free() {
        let db = SortedKvStore::open_temporary().unwrap();
        let ticked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ticked);
        tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        db.put(b"k", b"v").await.unwrap();
        db.flush().await.unwrap();
        db.close().await.unwrap();
        assert!(ticked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn empty_value_is_stored_tagged() {
        let db = SortedKvStore::open_temporary().unwrap();
        db.put(b"k", b"").await.unwrap();

        let raw = db.raw(b"k").unwrap().expect("raw entry");
        assert_eq!(raw.as_ref(), &[TAG_EMPTY]);
        assert_eq!(db.get(b"k").await.unwrap(), Vec::<u8>::new());
        assert!(db.has(b"k").await.unwrap());
    }

    #[tokio::test]
    async fn batch_empty_values_round_trip() {
        let db = SortedKvStore::open_temporary().unwrap();
        let mut batch = db.new_batch();
        batch.put(b"nil", b"").unwrap();
        batch.put(b"val", b"v").unwrap();
        batch.write().await.unwrap();

        assert_eq!(db.get(b"nil").await.unwrap(), Vec::<u8>::new());
        assert_eq!(db.get(b"val").await.unwrap(), b"v".to_vec());
    }

    #[tokio::test]
    async fn reopen_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let db = SortedKvStore::open(dir.path(), &SortedKvOptions::default()).unwrap();
        db.put(b"receipt", b"data").await.unwrap();
        db.close().await.unwrap();
        assert!(matches!(db.has(b"receipt").await, Err(StoreError::Closed)));

        let reopened = SortedKvStore::open(dir.path(), &SortedKvOptions::default()).unwrap();
        assert_eq!(reopened.get(b"receipt").await.unwrap(), b"data".to_vec());
        reopened.close().await.unwrap();
    }
}
