//! Configuration loading and validation.
//!
//! This module provides:
//! - Configuration types with serde support
//! - YAML file loading and default file generation
//! - Fail-fast validation that collects all errors

mod loader;
pub mod types;
mod validation;

pub use loader::{
    load_config, load_config_from_str, parse_config, write_default_config, DEFAULT_CONFIG_PATH,
    DEFAULT_CONFIG_YAML,
};
pub use types::{
    ChainConfig, IndexerConfig, ObservabilityConfig, StorageConfig, SystemContractsConfig,
};
pub use validation::validate_config;
