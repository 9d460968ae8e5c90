use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::handle::RemoteHandle;
use super::resources::Item;
use super::worker::{with_retry, FailureLog, WriteRequest, WriteWorker};
use crate::error::{StoreError, StoreResult};
use crate::store::{Batch, BatchOp, DbType, OpBuffer, Slot, Store};

/// Times a read follows a replaced item before giving up on the key.
const MAX_STALE_READS: u32 = 3;

/// [`Store`] over a remote metadata table and payload bucket.
///
/// Writes are queued and applied by one background worker; see the
/// [module docs](super) for the ordering and consistency guarantees.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    inner: Arc<RemoteInner>,
}

#[derive(Debug)]
struct RemoteInner {
    handle: RemoteHandle,
    sender: Mutex<Option<mpsc::Sender<WriteRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    failures: Arc<FailureLog>,
    closed: AtomicBool,
}

impl RemoteStore {
    /// Provision the handle's resources (once per handle) and start the
    /// write worker. Must be called from within a tokio runtime.
    pub async fn open(handle: &RemoteHandle) -> StoreResult<Self> {
        handle.provision().await?;

        let capacity = handle.config().queue_capacity;
        let (tx, rx) = mpsc::channel(capacity);
        let failures = Arc::new(FailureLog::default());
        let worker = WriteWorker::new(handle.clone(), Arc::clone(&failures), rx);
        let join = tokio::spawn(worker.run());

        info!(table = handle.table().name(), capacity, "remote store opened");
        Ok(Self {
            inner: Arc::new(RemoteInner {
                handle: handle.clone(),
                sender: Mutex::new(Some(tx)),
                worker: Mutex::new(Some(join)),
                failures,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn handle(&self) -> &RemoteHandle {
        &self.inner.handle
    }

    /// Writes accepted but not yet applied.
    pub fn pending_writes(&self) -> usize {
        self.inner
            .sender
            .lock()
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }
}

impl RemoteInner {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        self.handle.ensure_live()
    }

    fn sender(&self) -> StoreResult<mpsc::Sender<WriteRequest>> {
        self.ensure_open()?;
        self.sender.lock().clone().ok_or(StoreError::Closed)
    }

    /// Blocks while the queue is full.
    async fn enqueue(&self, request: WriteRequest) -> StoreResult<()> {
        let tx = self.sender()?;
        let depth = &self.handle.metrics().queue_depth;
        depth.inc();
        tx.send(request).await.map_err(|_| {
            depth.dec();
            StoreError::Closed
        })
    }

    async fn read(&self, key: &[u8]) -> StoreResult<Slot> {
        self.ensure_open()?;
        self.failures.check(key)?;

        let policy = &self.handle.config().retry;
        let metrics = self.handle.metrics();
        let table = self.handle.table();
        let bucket = self.handle.bucket();

        let mut attempts = 0;
        loop {
            let Some(item) = with_retry(policy, metrics, "get_item", || table.get_item(key)).await? else {
                return Ok(Slot::Absent);
            };
            let (object, len) = match item {
                Item::External { object, len } => (object, len),
                inline => return Ok(inline.inline_slot().unwrap_or(Slot::Absent)),
            };

            let name = &object;
            match with_retry(policy, metrics, "get_object", || bucket.get_object(name)).await? {
                Some(data) if data.len() as u64 == len => return Ok(Slot::Present(data)),
                Some(data) => {
                    return Err(StoreError::Io(format!(
                        "payload object {object} has {} bytes, item says {len}",
                        data.len()
                    )))
                }
                // The item was replaced and its object removed after we read
                // it. Resolve the key again.
                None if attempts < MAX_STALE_READS => attempts += 1,
                None => return Err(StoreError::Io(format!("payload object {object} is missing"))),
            }
        }
    }
}

#[async_trait]
impl Store for RemoteStore {
    fn kind(&self) -> DbType {
        DbType::Remote
    }

    /// Returns once the write is queued, not once it is durable.
    async fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.inner
            .enqueue(WriteRequest::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            })
            .await
    }

    async fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.inner.read(key).await?.into_value()
    }

    async fn has(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.inner.read(key).await?.is_present())
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.inner
            .enqueue(WriteRequest::Delete { key: key.to_vec() })
            .await
    }

    /// Wait until every write enqueued before this call has been applied or
    /// has failed. Reports failures not yet reported.
    async fn flush(&self) -> StoreResult<()> {
        let (ack, done) = oneshot::channel();
        let tx = self.inner.sender()?;
        tx.send(WriteRequest::Flush(ack))
            .await
            .map_err(|_| StoreError::Closed)?;
        done.await
            .map_err(|_| StoreError::Io("remote write worker stopped".into()))?;
        self.inner.failures.take_unreported()
    }

    fn new_batch(&self) -> Box<dyn Batch> {
        Box::new(RemoteBatch {
            inner: Arc::clone(&self.inner),
            buf: OpBuffer::default(),
        })
    }

    /// Stop accepting writes, wait for the worker to drain the queue, then
    /// report any write that could not be applied. Remote resources are
    /// left in place.
    async fn close(&self) -> StoreResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Closed);
        }
        drop(self.inner.sender.lock().take());

        let join = self.inner.worker.lock().take();
        if let Some(join) = join {
            join.await
                .map_err(|e| StoreError::Io(format!("remote write worker failed: {e}")))?;
        }
        debug!(table = self.inner.handle.table().name(), "remote store closed");
        self.inner.failures.take_unreported()
    }
}

/// Batch for [`RemoteStore`]. `write` enqueues every buffered op in order;
/// like single writes, it returns before the ops are durable.
#[derive(Debug)]
pub struct RemoteBatch {
    inner: Arc<RemoteInner>,
    buf: OpBuffer,
}

#[async_trait]
impl Batch for RemoteBatch {
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
        for op in self.buf.ops() {
            let request = match op {
                BatchOp::Put { key, value } => WriteRequest::Put {
                    key: key.clone(),
                    value: value.clone(),
                },
                BatchOp::Delete { key } => WriteRequest::Delete { key: key.clone() },
            };
            self.inner.enqueue(request).await?;
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
    use crate::remote::{RemoteClient, RemoteConfig};

    async fn open_store(namespace: &str) -> RemoteStore {
        let client = RemoteClient::in_memory();
        let handle = RemoteHandle::new(&client, RemoteConfig::default(), namespace).unwrap();
        RemoteStore::open(&handle).await.unwrap()
    }

    #[tokio::test]
    async fn flush_makes_writes_visible() {
        let store = open_store("flush").await;
        store.put(b"k", b"v").await.unwrap();
        store.put(b"nil", b"").await.unwrap();
        store.flush().await.unwrap();

        assert_eq!(store.get(b"k").await.unwrap(), b"v".to_vec());
        assert_eq!(store.get(b"nil").await.unwrap(), Vec::<u8>::new());
        assert!(store.has(b"nil").await.unwrap());
        assert_eq!(store.pending_writes(), 0);
    }

    #[tokio::test]
    async fn later_writes_win_in_queue_order() {
        let store = open_store("order").await;
        store.put(b"k", b"1").await.unwrap();
        store.delete(b"k").await.unwrap();
        store.put(b"k", b"3").await.unwrap();
        store.flush().await.unwrap();
        assert_eq!(store.get(b"k").await.unwrap(), b"3".to_vec());

        store.delete(b"k").await.unwrap();
        store.flush().await.unwrap();
        assert!(store.get(b"k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let store = open_store("terminal").await;
        let mut batch = store.new_batch();
        batch.put(b"k", b"v").unwrap();

        store.close().await.unwrap();
        assert!(matches!(store.put(b"k", b"v").await, Err(StoreError::Closed)));
        assert!(matches!(store.get(b"k").await, Err(StoreError::Closed)));
        assert!(matches!(batch.write().await, Err(StoreError::Closed)));
        assert!(matches!(store.flush().await, Err(StoreError::Closed)));
        assert!(matches!(store.close().await, Err(StoreError::Closed)));
    }
}
