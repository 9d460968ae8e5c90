use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use super::resources::{MetaTable, ObjectStoreBucket, ObjectStoreTable, PayloadBucket, RemoteClient};
use super::worker::with_retry;
use super::{validate_namespace, RemoteConfig};
use crate::error::{StoreError, StoreResult};
use crate::metrics::RemoteMetrics;

/// Owner of one remote namespace: its table, its bucket, and the guard that
/// provisions them once.
///
/// Cheap to clone. Every [`RemoteStore`](super::RemoteStore) opened through
/// clones of the same handle shares the provisioning guard and the metrics.
#[derive(Debug, Clone)]
pub struct RemoteHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    config: RemoteConfig,
    table: Arc<dyn MetaTable>,
    bucket: Arc<dyn PayloadBucket>,
    metrics: RemoteMetrics,
    provisioned: OnceCell<()>,
    decommissioned: AtomicBool,
}

impl RemoteHandle {
    /// Handle for the table and bucket named `namespace` on `client`.
    pub fn new(client: &RemoteClient, config: RemoteConfig, namespace: &str) -> StoreResult<Self> {
        validate_namespace(namespace)?;
        let table = Arc::new(ObjectStoreTable::new(client, namespace));
        let bucket = Arc::new(ObjectStoreBucket::new(client, namespace));
        Self::with_resources(config, table, bucket)
    }

    /// Handle over caller-supplied resources.
    pub fn with_resources(
        config: RemoteConfig,
        table: Arc<dyn MetaTable>,
        bucket: Arc<dyn PayloadBucket>,
    ) -> StoreResult<Self> {
        config.validate()?;
        let metrics = RemoteMetrics::new(table.name())?;
        Ok(Self {
            inner: Arc::new(HandleInner {
                config,
                table,
                bucket,
                metrics,
                provisioned: OnceCell::new(),
                decommissioned: AtomicBool::new(false),
            }),
        })
    }

    /// Create the table and bucket if missing. Runs the remote calls at most
    /// once per handle; concurrent callers wait for the first to finish. A
    /// failed attempt leaves the guard unset so a later call retries.
    pub async fn provision(&self) -> StoreResult<()> {
        self.ensure_live()?;
        let inner = &self.inner;
        inner
            .provisioned
            .get_or_try_init(|| async {
                let policy = &inner.config.retry;
                with_retry(policy, &inner.metrics, "create_table", || inner.table.create_if_missing()).await?;
                with_retry(policy, &inner.metrics, "create_bucket", || inner.bucket.create_if_missing()).await?;
                info!(table = inner.table.name(), bucket = inner.bucket.name(), "remote resources provisioned");
                Ok::<(), StoreError>(())
            })
            .await?;
        Ok(())
    }

    /// Delete the table and bucket with everything in them. Stores opened
    /// through this handle fail every later operation, and the handle cannot
    /// open new ones.
    ///
    /// Stores are blocked while the deletes run. If either delete fails the
    /// handle is live again and the call can be retried.
    pub async fn decommission(&self) -> StoreResult<()> {
        let inner = &self.inner;
        if inner.decommissioned.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Config(format!(
                "remote namespace {} already decommissioned",
                inner.table.name()
            )));
        }
        warn!(table = inner.table.name(), bucket = inner.bucket.name(), "decommissioning remote resources");

        let dropped = async {
            inner.table.drop_table().await?;
            inner.bucket.drop_bucket().await
        }
        .await;
        if let Err(e) = dropped {
            inner.decommissioned.store(false, Ordering::Release);
            error!(table = inner.table.name(), error = %e, "decommission failed, namespace left in place");
            return Err(e.into());
        }
        Ok(())
    }

    pub fn is_decommissioned(&self) -> bool {
        self.inner.decommissioned.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_live(&self) -> StoreResult<()> {
        if self.is_decommissioned() {
            Err(StoreError::Config(format!(
                "remote namespace {} has been decommissioned",
                self.inner.table.name()
            )))
        } else {
            Ok(())
        }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &RemoteMetrics {
        &self.inner.metrics
    }

    pub fn table(&self) -> &Arc<dyn MetaTable> {
        &self.inner.table
    }

    pub fn bucket(&self) -> &Arc<dyn PayloadBucket> {
        &self.inner.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::Item;

    #[tokio::test]
    async fn provisioning_is_idempotent_across_clones() {
        let client = RemoteClient::in_memory();
        let handle = RemoteHandle::new(&client, RemoteConfig::default(), "chaindb-misc").unwrap();
        let other = handle.clone();
        handle.provision().await.unwrap();
        other.provision().await.unwrap();
        assert_eq!(handle.table().name(), "chaindb-misc");
    }

    #[tokio::test]
    async fn decommission_removes_items_and_blocks_reuse() {
        let client = RemoteClient::in_memory();
        let handle = RemoteHandle::new(&client, RemoteConfig::default(), "gone").unwrap();
        handle.provision().await.unwrap();
        handle.table().put_item(b"k", &Item::Empty).await.unwrap();

        handle.decommission().await.unwrap();
        assert!(handle.is_decommissioned());
        assert_eq!(handle.table().get_item(b"k").await.unwrap(), None);
        assert!(matches!(handle.provision().await, Err(StoreError::Config(_))));
        assert!(matches!(handle.decommission().await, Err(StoreError::Config(_))));
    }

    #[test]
    fn invalid_namespace_is_rejected() {
        let client = RemoteClient::in_memory();
        let err = RemoteHandle::new(&client, RemoteConfig::default(), "Bad Name").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
