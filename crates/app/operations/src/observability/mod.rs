//! Observability for the indexer.
//!
//! - **Logging**: `tracing` subscriber with human or JSON output
//! - **Metrics**: Prometheus-compatible metrics collection and export

pub mod logging;
pub mod metrics;

pub use logging::{init_tracing, init_tracing_from_config, parse_level, LogFormat};
pub use metrics::{IndexerMetrics, MetricsRegistry};
