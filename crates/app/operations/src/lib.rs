//! Operations infrastructure for the chain indexer.
//!
//! - **Config**: YAML-based configuration with fail-fast validation
//! - **Observability**: `tracing` setup and Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use chainidx_operations::{config::load_config, init_tracing_from_config, MetricsRegistry};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("chainidx.yaml")?;
//!     init_tracing_from_config(&config.observability);
//!
//!     let metrics = MetricsRegistry::new();
//!     print!("{}", metrics.encode_prometheus());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod errors;
pub mod observability;

pub use config::{load_config, write_default_config, IndexerConfig, ObservabilityConfig};
pub use errors::ConfigError;
pub use observability::{
    init_tracing, init_tracing_from_config, parse_level, IndexerMetrics, LogFormat,
    MetricsRegistry,
};
