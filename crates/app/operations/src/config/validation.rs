//! Configuration validation.
//!
//! Validates configuration and collects all errors before returning,
//! so several issues can be fixed in a single iteration.

use std::collections::BTreeSet;

use chainidx_events::BusConfig;
use chainidx_query::QueryConfig;

use crate::config::types::{ChainConfig, IndexerConfig, ObservabilityConfig, StorageConfig};
use crate::errors::ConfigError;

/// Maximum read pool size.
const MAX_READ_POOL_SIZE: u32 = 64;

/// Maximum blocks a single range scan may cover.
const MAX_BLOCK_SPAN: u64 = 100_000;

/// Maximum page size a query may request.
const MAX_PAGE_SIZE: u64 = 10_000;

pub(crate) const VALID_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "warning", "error"];

pub(crate) const VALID_FORMATS: [&str; 4] = ["json", "pretty", "text", "human"];

/// Validate the entire indexer configuration.
pub fn validate_config(config: &IndexerConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_chain_config(&config.chain, &mut errors);
    validate_storage_config(&config.storage, &mut errors);
    validate_query_config(&config.query, &mut errors);
    validate_events_config(&config.events, &mut errors);
    validate_observability_config(&config.observability, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationFailed(errors))
    }
}

fn validate_chain_config(config: &ChainConfig, errors: &mut Vec<String>) {
    if config.chain_id == 0 {
        errors.push("chain.chain_id must be greater than 0".to_string());
    }

    if config.epoch_length == 0 {
        errors.push("chain.epoch_length must be greater than 0".to_string());
    }

    let contracts = &config.system_contracts;
    let mut seen = BTreeSet::new();
    for address in contracts.native_token.iter().chain(&contracts.governance) {
        if address.is_zero() {
            errors.push("chain.system_contracts cannot contain the zero address".to_string());
        } else if !seen.insert(*address) {
            errors.push(format!(
                "chain.system_contracts lists {address} more than once"
            ));
        }
    }
}

fn validate_storage_config(config: &StorageConfig, errors: &mut Vec<String>) {
    if config.path.is_empty() {
        errors.push("storage.path cannot be empty".to_string());
    }

    if config.read_pool_size == 0 || config.read_pool_size > MAX_READ_POOL_SIZE {
        errors.push(format!(
            "storage.read_pool_size must be between 1 and {MAX_READ_POOL_SIZE}"
        ));
    }

    let cache = &config.cache;
    for (name, size) in [
        ("block_cache_size", cache.block_cache_size),
        ("tx_cache_size", cache.tx_cache_size),
        ("receipt_cache_size", cache.receipt_cache_size),
    ] {
        if size == 0 {
            errors.push(format!("storage.cache.{name} must be greater than 0"));
        }
    }
}

fn validate_query_config(config: &QueryConfig, errors: &mut Vec<String>) {
    if config.max_block_span == 0 || config.max_block_span > MAX_BLOCK_SPAN {
        errors.push(format!(
            "query.max_block_span must be between 1 and {MAX_BLOCK_SPAN}"
        ));
    }

    if config.max_page_size == 0 || config.max_page_size > MAX_PAGE_SIZE {
        errors.push(format!(
            "query.max_page_size must be between 1 and {MAX_PAGE_SIZE}"
        ));
    }

    if config.default_page_size == 0 || config.default_page_size > config.max_page_size {
        errors.push(format!(
            "query.default_page_size must be between 1 and query.max_page_size ({})",
            config.max_page_size
        ));
    }
}

fn validate_events_config(config: &BusConfig, errors: &mut Vec<String>) {
    if config.ingress_capacity == 0 {
        errors.push("events.ingress_capacity must be greater than 0".to_string());
    }

    if config.default_subscriber_capacity == 0 {
        errors.push("events.default_subscriber_capacity must be greater than 0".to_string());
    }
}

fn validate_observability_config(config: &ObservabilityConfig, errors: &mut Vec<String>) {
    if !VALID_LEVELS.contains(&config.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "observability.log_level '{}' is invalid. Valid levels: trace, debug, info, warn, error",
            config.log_level
        ));
    }

    if !VALID_FORMATS.contains(&config.log_format.to_lowercase().as_str()) {
        errors.push(format!(
            "observability.log_format '{}' is invalid. Valid formats: json, pretty",
            config.log_format
        ));
    }
}
