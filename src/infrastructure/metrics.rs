//! Metrics sinks
//!
//! [`PrometheusMetrics`] forwards to the `metrics` facade, so whatever
//! recorder the process installed (the Prometheus exporter in the binary)
//! receives the counters. [`InMemoryMetrics`] keeps them in a map for tests
//! and introspection.

use std::net::SocketAddr;

use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::application::ports::MetricsSink;
use crate::support::InfraError;

#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl MetricsSink for PrometheusMetrics {
    fn increment(&self, name: &'static str, operation: &str) {
        metrics::counter!(name, "operation" => operation.to_string()).increment(1);
    }
}

/// Install the global Prometheus recorder with its HTTP scrape listener.
///
/// The recorder can only be installed once per process.
pub fn install_prometheus_exporter(listen: SocketAddr) -> Result<(), InfraError> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .map_err(|e| InfraError::Metrics(e.to_string()))?;
    info!("📊 Prometheus exporter listening on http://{}/metrics", listen);
    Ok(())
}

/// Counters keyed by `(name, operation)`.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: DashMap<(&'static str, String), u64>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &'static str, operation: &str) -> u64 {
        self.counters
            .get(&(name, operation.to_string()))
            .map_or(0, |v| *v)
    }

    /// Sum of `name` over every operation label.
    pub fn total(&self, name: &'static str) -> u64 {
        self.counters
            .iter()
            .filter(|e| e.key().0 == name)
            .map(|e| *e.value())
            .sum()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, name: &'static str, operation: &str) {
        *self
            .counters
            .entry((name, operation.to_string()))
            .or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::metrics::{CACHE_HITS_TOTAL, REQUESTS_TOTAL};

    #[test]
    fn in_memory_counts_per_label() {
        let m = InMemoryMetrics::new();
        m.increment(REQUESTS_TOTAL, "create");
        m.increment(REQUESTS_TOTAL, "create");
        m.increment(REQUESTS_TOTAL, "get");

        assert_eq!(m.get(REQUESTS_TOTAL, "create"), 2);
        assert_eq!(m.get(REQUESTS_TOTAL, "delete"), 0);
        assert_eq!(m.total(REQUESTS_TOTAL), 3);
        assert_eq!(m.total(CACHE_HITS_TOTAL), 0);
    }

    #[test]
    fn prometheus_sink_without_recorder_is_noop() {
        PrometheusMetrics.increment(REQUESTS_TOTAL, "create");
    }
}
