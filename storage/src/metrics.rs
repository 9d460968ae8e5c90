//! # Prometheus Metrics
//!
//! Operational metrics for the remote engine's write path. Each
//! [`RemoteHandle`](crate::remote::RemoteHandle) owns one [`RemoteMetrics`],
//! registered in a dedicated [`prometheus::Registry`] labelled with the
//! handle's namespace, so several remote stores in one process never collide.

use std::collections::HashMap;
use std::fmt;

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::{StoreError, StoreResult};

/// Metric handles for one remote namespace. Clones share the same counters.
#[derive(Clone)]
pub struct RemoteMetrics {
    registry: Registry,
    /// Writes accepted into the queue and not yet applied by the worker.
    pub queue_depth: IntGauge,
    /// Writes the worker applied successfully.
    pub writes_total: IntCounter,
    /// Remote calls retried after a transient failure.
    pub retries_total: IntCounter,
    /// Writes dropped after exhausting retries or hitting a fatal error.
    pub failures_total: IntCounter,
}

impl RemoteMetrics {
    pub fn new(namespace: &str) -> StoreResult<Self> {
        let labels = HashMap::from([("namespace".to_string(), namespace.to_string())]);
        let registry = Registry::new_custom(Some("chaindb_remote".into()), Some(labels))
            .map_err(metric_error)?;

        let queue_depth = IntGauge::new("queue_depth", "Writes waiting for the remote write worker")
            .map_err(metric_error)?;
        let writes_total = IntCounter::new("writes_total", "Writes applied to remote resources")
            .map_err(metric_error)?;
        let retries_total = IntCounter::new("retries_total", "Remote calls retried after a transient failure")
            .map_err(metric_error)?;
        let failures_total = IntCounter::new("failures_total", "Writes that could not be applied")
            .map_err(metric_error)?;

        registry.register(Box::new(queue_depth.clone())).map_err(metric_error)?;
        registry.register(Box::new(writes_total.clone())).map_err(metric_error)?;
        registry.register(Box::new(retries_total.clone())).map_err(metric_error)?;
        registry.register(Box::new(failures_total.clone())).map_err(metric_error)?;

        Ok(Self {
            registry,
            queue_depth,
            writes_total,
            retries_total,
            failures_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> StoreResult<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer).map_err(metric_error)?;
        String::from_utf8(buffer).map_err(|e| StoreError::Io(format!("metrics output: {e}")))
    }
}

impl fmt::Debug for RemoteMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMetrics")
            .field("queue_depth", &self.queue_depth.get())
            .field("writes_total", &self.writes_total.get())
            .field("retries_total", &self.retries_total.get())
            .field("failures_total", &self.failures_total.get())
            .finish()
    }
}

fn metric_error(e: prometheus::Error) -> StoreError {
    StoreError::Config(format!("metrics: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_includes_namespace_label() {
        let metrics = RemoteMetrics::new("chaindb-header").unwrap();
        metrics.writes_total.inc();
        metrics.queue_depth.set(3);

        let text = metrics.encode().unwrap();
        assert!(text.contains("chaindb_remote_writes_total{namespace=\"chaindb-header\"} 1"));
        assert!(text.contains("chaindb_remote_queue_depth{namespace=\"chaindb-header\"} 3"));
    }

    #[test]
    fn separate_handles_do_not_share_counters() {
        let a = RemoteMetrics::new("a").unwrap();
        let b = RemoteMetrics::new("b").unwrap();
        a.failures_total.inc();
        assert_eq!(a.failures_total.get(), 1);
        assert_eq!(b.failures_total.get(), 0);
    }
}
