//! Configuration types for the indexer.

use std::path::PathBuf;

use alloy_primitives::Address;
use chainidx_events::BusConfig;
use chainidx_query::QueryConfig;
use chainidx_store::{CacheConfig, EnabledIndexes, StoreOptions};
use serde::Deserialize;

/// Root configuration for an indexer instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexerConfig {
    /// Chain-specific configuration.
    pub chain: ChainConfig,

    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Query limits.
    #[serde(default)]
    pub query: QueryConfig,

    /// Event bus queue sizes.
    #[serde(default)]
    pub events: BusConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Chain-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    /// Unique chain identifier. Must be > 0.
    pub chain_id: u64,

    /// Blocks per WBFT epoch. Default: 10.
    #[serde(default = "ChainConfig::default_epoch_length")]
    pub epoch_length: u64,

    /// Addresses of the governance system contracts.
    #[serde(default)]
    pub system_contracts: SystemContractsConfig,
}

impl ChainConfig {
    const fn default_epoch_length() -> u64 {
        10
    }
}

/// System contracts whose events are decoded into governance records.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemContractsConfig {
    /// Native coin contract emitting mint, burn, minter and blacklist events.
    #[serde(default)]
    pub native_token: Option<Address>,

    /// Governance contracts emitting proposal, member and validator events.
    #[serde(default)]
    pub governance: Vec<Address>,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory holding the SQLite database. Default: "./data".
    #[serde(default = "StorageConfig::default_path")]
    pub path: String,

    /// Connections in the read pool. Default: 4.
    #[serde(default = "StorageConfig::default_read_pool_size")]
    pub read_pool_size: u32,

    /// LRU cache sizes, in entries.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Index families to expose.
    #[serde(default)]
    pub indexes: EnabledIndexes,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            read_pool_size: Self::default_read_pool_size(),
            cache: CacheConfig::default(),
            indexes: EnabledIndexes::default(),
        }
    }
}

impl StorageConfig {
    /// File name of the database inside `path`.
    pub const DATABASE_FILE: &'static str = "chainidx.sqlite";

    fn default_path() -> String {
        "./data".to_string()
    }

    const fn default_read_pool_size() -> u32 {
        4
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.path).join(Self::DATABASE_FILE)
    }

    /// Convert to the store crate's options type.
    pub fn to_store_options(&self) -> StoreOptions {
        StoreOptions {
            cache: self.cache.clone(),
            read_pool_size: self.read_pool_size,
            indexes: self.indexes,
        }
    }
}

/// Observability configuration for logging and metrics.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Log level: trace, debug, info, warn, error. Default: info.
    #[serde(default = "ObservabilityConfig::default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty. Default: pretty.
    #[serde(default = "ObservabilityConfig::default_log_format")]
    pub log_format: String,

    /// Whether Prometheus metrics are collected. Default: true.
    #[serde(default = "ObservabilityConfig::default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            log_format: Self::default_log_format(),
            metrics_enabled: Self::default_metrics_enabled(),
        }
    }
}

impl ObservabilityConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_log_format() -> String {
        "pretty".to_string()
    }

    const fn default_metrics_enabled() -> bool {
        true
    }
}
