//! The single write worker behind a [`RemoteStore`](super::RemoteStore).

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::handle::RemoteHandle;
use super::resources::{object_name, Item};
use super::{RemoteError, RetryPolicy};
use crate::error::{StoreError, StoreResult};
use crate::metrics::RemoteMetrics;

/// A unit of work for the write worker.
#[derive(Debug)]
pub(crate) enum WriteRequest {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    /// Acknowledged once every request enqueued before it has been applied.
    Flush(oneshot::Sender<()>),
}

/// Run `op` until it succeeds, fails fatally, or exhausts `policy`.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    metrics: &RemoteMetrics,
    what: &'static str,
    mut op: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(RemoteError::Transient(reason)) if attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(op = what, attempt, ?delay, %reason, "transient remote failure, retrying");
                metrics.retries_total.inc();
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Writes the worker could not apply.
///
/// A failed key stays poisoned until a later write to it succeeds. Failures
/// not yet reported to a `flush` or `close` caller are kept separately so
/// each one is reported once.
#[derive(Debug, Default)]
pub(crate) struct FailureLog {
    keys: DashMap<Vec<u8>, String>,
    unreported: Mutex<Vec<String>>,
}

impl FailureLog {
    fn record(&self, key: &[u8], reason: String) {
        self.keys.insert(key.to_vec(), reason.clone());
        self.unreported.lock().push(reason);
    }

    fn clear(&self, key: &[u8]) {
        self.keys.remove(key);
    }

    /// Fail if the last write of `key` was lost.
    pub(crate) fn check(&self, key: &[u8]) -> StoreResult<()> {
        match self.keys.get(key) {
            Some(reason) => Err(StoreError::Io(format!(
                "earlier write of key {} was not applied: {}",
                hex::encode(key),
                reason.value()
            ))),
            None => Ok(()),
        }
    }

    /// Report failures recorded since the last call.
    pub(crate) fn take_unreported(&self) -> StoreResult<()> {
        let pending = std::mem::take(&mut *self.unreported.lock());
        match pending.len() {
            0 => Ok(()),
            1 => Err(StoreError::Io(format!("remote write failed: {}", pending[0]))),
            n => Err(StoreError::Io(format!(
                "{n} remote writes failed, first: {}",
                pending[0]
            ))),
        }
    }
}

/// Drains the write queue in FIFO order until every sender is gone.
pub(crate) struct WriteWorker {
    handle: RemoteHandle,
    failures: Arc<FailureLog>,
    rx: mpsc::Receiver<WriteRequest>,
}

impl WriteWorker {
    pub(crate) fn new(
        handle: RemoteHandle,
        failures: Arc<FailureLog>,
        rx: mpsc::Receiver<WriteRequest>,
    ) -> Self {
        Self { handle, failures, rx }
    }

    pub(crate) async fn run(mut self) {
        let table = self.handle.table().name().to_string();
        debug!(%table, "remote write worker started");
        while let Some(request) = self.rx.recv().await {
            match request {
                WriteRequest::Put { key, value } => {
                    let result = self.apply_put(&key, value).await;
                    self.settle(&key, result);
                }
                WriteRequest::Delete { key } => {
                    let result = self.apply_delete(&key).await;
                    self.settle(&key, result);
                }
                WriteRequest::Flush(ack) => {
                    // The flusher may have given up waiting.
                    let _ = ack.send(());
                }
            }
        }
        debug!(%table, "remote write worker drained");
    }

    fn settle(&self, key: &[u8], result: Result<(), RemoteError>) {
        let metrics = self.handle.metrics();
        metrics.queue_depth.dec();
        match result {
            Ok(()) => {
                metrics.writes_total.inc();
                self.failures.clear(key);
            }
            Err(e) => {
                metrics.failures_total.inc();
                error!(table = self.handle.table().name(), key = %hex::encode(key), error = %e, "remote write dropped");
                self.failures.record(key, e.to_string());
            }
        }
    }

    /// A new payload object first, then the item pointing at it, then the
    /// object of the item it replaced. Objects are never overwritten, so a
    /// failed item write leaves the previous value intact.
    async fn apply_put(&self, key: &[u8], value: Vec<u8>) -> Result<(), RemoteError> {
        let policy = &self.handle.config().retry;
        let metrics = self.handle.metrics();
        let table = self.handle.table();
        let bucket = self.handle.bucket();

        let previous = with_retry(policy, metrics, "get_item", || table.get_item(key)).await?;

        let item = if value.is_empty() {
            Item::Empty
        } else if value.len() <= self.handle.config().inline_limit {
            Item::Inline(value)
        } else {
            let object = object_name(key);
            let len = value.len() as u64;
            let payload = &value;
            let name = &object;
            with_retry(policy, metrics, "put_object", || bucket.put_object(name, payload.clone())).await?;
            Item::External { object, len }
        };

        let written = &item;
        if let Err(e) = with_retry(policy, metrics, "put_item", || table.put_item(key, written)).await {
            if let Item::External { object, .. } = &item {
                self.remove_object(object).await;
            }
            return Err(e);
        }

        if let Some(Item::External { object, .. }) = previous {
            self.remove_object(&object).await;
        }
        Ok(())
    }

    /// Item first, then its payload object, so a reader never follows an
    /// item to a deleted object.
    async fn apply_delete(&self, key: &[u8]) -> Result<(), RemoteError> {
        let policy = &self.handle.config().retry;
        let metrics = self.handle.metrics();
        let table = self.handle.table();

        let previous = with_retry(policy, metrics, "get_item", || table.get_item(key)).await?;
        with_retry(policy, metrics, "delete_item", || table.delete_item(key)).await?;
        if let Some(Item::External { object, .. }) = previous {
            self.remove_object(&object).await;
        }
        Ok(())
    }

    /// Delete an object no item points at. The key's write has already
    /// settled either way, so a failure only leaves an orphan behind.
    async fn remove_object(&self, object: &str) {
        let policy = &self.handle.config().retry;
        let bucket = self.handle.bucket();
        if let Err(e) = with_retry(policy, self.handle.metrics(), "delete_object", || bucket.delete_object(object)).await {
            warn!(bucket = bucket.name(), object, error = %e, "unreferenced payload object left behind");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn retry_stops_after_success() {
        let metrics = RemoteMetrics::new("retry-ok").unwrap();
        let calls = &AtomicU32::new(0);
        let result = with_retry(&fast_policy(5), &metrics, "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RemoteError::Transient("throttled".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.retries_total.get(), 2);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let metrics = RemoteMetrics::new("retry-exhausted").unwrap();
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(3), &metrics, "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Transient("timeout".into()))
        })
        .await;
        assert!(matches!(result, Err(RemoteError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let metrics = RemoteMetrics::new("retry-fatal").unwrap();
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(5), &metrics, "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Fatal("access denied".into()))
        })
        .await;
        assert!(matches!(result, Err(RemoteError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.retries_total.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_sleeps_follow_capped_exponential_backoff() {
        let metrics = RemoteMetrics::new("retry-backoff").unwrap();
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 120,
        };
        let start = tokio::time::Instant::now();
        let result: Result<(), _> = with_retry(&policy, &metrics, "test", || async {
            Err(RemoteError::Transient("slow down".into()))
        })
        .await;

        assert!(result.is_err());
        // 50 + 100 + 120 + 120, no sleep after the last attempt.
        assert_eq!(start.elapsed(), Duration::from_millis(390));
        assert_eq!(metrics.retries_total.get(), 4);
    }

    #[test]
    fn failure_log_poisons_until_cleared_and_reports_once() {
        let log = FailureLog::default();
        log.record(b"k", "boom".into());
        assert!(matches!(log.check(b"k"), Err(StoreError::Io(_))));
        assert!(log.check(b"other").is_ok());

        assert!(log.take_unreported().is_err());
        assert!(log.take_unreported().is_ok());

        log.clear(b"k");
        assert!(log.check(b"k").is_ok());
    }
}
