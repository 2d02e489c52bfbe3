//! Prometheus-compatible metrics collection.
//!
//! Metric handles are reference counted, so an [`IndexerMetrics`] clone
//! updates the same series that the registry exports.

use std::sync::atomic::AtomicI64;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Indexer metrics for monitoring.
#[derive(Clone)]
pub struct IndexerMetrics {
    /// Heights committed with their secondary indexes.
    pub blocks_indexed: Counter,
    /// Transactions in committed heights.
    pub transactions_indexed: Counter,
    /// Secondary index rows written.
    pub index_records_written: Counter,
    /// Logs, extra data or authorizations that failed to decode.
    pub decode_failures: Counter,
    /// Heights removed by rollback.
    pub heights_rolled_back: Counter,
    /// Time from derivation start to commit, in seconds.
    pub index_duration_seconds: Histogram,
    /// Highest contiguous height with primary data.
    pub raw_watermark: Gauge,
    /// Highest contiguous height with secondary indexes.
    pub indexed_watermark: Gauge,
    /// Events accepted by the bus.
    pub events_published: Counter,
    /// Events the bus refused (ingress full or shut down).
    pub events_rejected: Counter,
}

impl Default for IndexerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexerMetrics {
    pub fn new() -> Self {
        // 100us to ~1.6s
        let duration_buckets = exponential_buckets(0.0001, 2.0, 15);

        Self {
            blocks_indexed: Counter::default(),
            transactions_indexed: Counter::default(),
            index_records_written: Counter::default(),
            decode_failures: Counter::default(),
            heights_rolled_back: Counter::default(),
            index_duration_seconds: Histogram::new(duration_buckets),
            raw_watermark: Gauge::<i64, AtomicI64>::default(),
            indexed_watermark: Gauge::<i64, AtomicI64>::default(),
            events_published: Counter::default(),
            events_rejected: Counter::default(),
        }
    }

    /// Record a committed height.
    pub fn record_block(&self, height: u64, tx_count: u64, records: u64, duration_secs: f64) {
        self.blocks_indexed.inc();
        self.transactions_indexed.inc_by(tx_count);
        self.index_records_written.inc_by(records);
        self.index_duration_seconds.observe(duration_secs);
        self.raw_watermark.set(height as i64);
        self.indexed_watermark.set(height as i64);
    }

    /// Record the outcome of publishing one height's events.
    pub fn record_publish(&self, published: u64, rejected: u64) {
        self.events_published.inc_by(published);
        self.events_rejected.inc_by(rejected);
    }

    /// Set both watermarks; `None` means the store is empty.
    pub fn set_watermarks(&self, raw: Option<u64>, indexed: Option<u64>) {
        self.raw_watermark.set(raw.map_or(-1, |h| h as i64));
        self.indexed_watermark.set(indexed.map_or(-1, |h| h as i64));
    }
}

/// Central metrics registry for the indexer.
pub struct MetricsRegistry {
    registry: Registry,
    pub indexer: IndexerMetrics,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Create a new metrics registry with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let indexer = IndexerMetrics::new();

        registry.register(
            "chainidx_blocks_indexed",
            "Heights committed with their secondary indexes",
            indexer.blocks_indexed.clone(),
        );
        registry.register(
            "chainidx_transactions_indexed",
            "Transactions in committed heights",
            indexer.transactions_indexed.clone(),
        );
        registry.register(
            "chainidx_index_records_written",
            "Secondary index rows written",
            indexer.index_records_written.clone(),
        );
        registry.register(
            "chainidx_decode_failures",
            "Chain data that failed to decode and was skipped",
            indexer.decode_failures.clone(),
        );
        registry.register(
            "chainidx_heights_rolled_back",
            "Heights removed by rollback",
            indexer.heights_rolled_back.clone(),
        );
        registry.register(
            "chainidx_index_duration_seconds",
            "Time to derive and commit one height",
            indexer.index_duration_seconds.clone(),
        );
        registry.register(
            "chainidx_raw_watermark",
            "Highest contiguous height with primary data",
            indexer.raw_watermark.clone(),
        );
        registry.register(
            "chainidx_indexed_watermark",
            "Highest contiguous height with secondary indexes",
            indexer.indexed_watermark.clone(),
        );
        registry.register(
            "chainidx_events_published",
            "Events accepted by the event bus",
            indexer.events_published.clone(),
        );
        registry.register(
            "chainidx_events_rejected",
            "Events refused by the event bus",
            indexer.events_rejected.clone(),
        );

        Self { registry, indexer }
    }

    /// Encode all metrics in Prometheus text format.
    pub fn encode_prometheus(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            return String::from("# Error encoding metrics\n");
        }
        buffer
    }

    /// Mutable access for registering additional metrics.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry_creation() {
        let registry = MetricsRegistry::new();
        let encoded = registry.encode_prometheus();

        assert!(encoded.contains("chainidx_blocks_indexed"));
        assert!(encoded.contains("chainidx_indexed_watermark"));
        assert!(encoded.contains("chainidx_events_rejected"));
    }

    #[test]
    fn test_clone_updates_registered_series() {
        let registry = MetricsRegistry::new();
        let metrics = registry.indexer.clone();

        metrics.record_block(42, 3, 7, 0.01);
        metrics.record_publish(5, 1);

        assert_eq!(registry.indexer.blocks_indexed.get(), 1);
        assert_eq!(registry.indexer.transactions_indexed.get(), 3);
        assert_eq!(registry.indexer.indexed_watermark.get(), 42);
        assert_eq!(registry.indexer.events_rejected.get(), 1);

        let encoded = registry.encode_prometheus();
        assert!(encoded.contains("chainidx_indexed_watermark 42"));
    }

    #[test]
    fn test_empty_store_watermarks() {
        let metrics = IndexerMetrics::new();
        metrics.set_watermarks(None, None);
        assert_eq!(metrics.raw_watermark.get(), -1);

        metrics.set_watermarks(Some(9), Some(8));
        assert_eq!(metrics.raw_watermark.get(), 9);
        assert_eq!(metrics.indexed_watermark.get(), 8);
    }
}
