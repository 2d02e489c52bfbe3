//! Configuration file loading.

use std::path::Path;

use crate::config::types::IndexerConfig;
use crate::config::validation::validate_config;
use crate::errors::ConfigError;

/// Config path used when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "./chainidx.yaml";

/// Commented configuration written by [`write_default_config`].
pub const DEFAULT_CONFIG_YAML: &str = r#"# chainidx configuration

chain:
  # Unique chain identifier.
  chain_id: 1
  # Blocks per WBFT epoch.
  epoch_length: 10
  system_contracts:
    # native_token: "0x0000000000000000000000000000000000001000"
    governance: []

storage:
  path: "./data"
  read_pool_size: 4
  cache:
    block_cache_size: 256
    tx_cache_size: 8192
    receipt_cache_size: 8192
  # Optional index families, all enabled unless switched off here.
  # Address activity and token transfers are always indexed.
  indexes:
    contracts: true
    internal_transactions: true
    set_code: true
    consensus: true
    balances: true
    system_events: true

query:
  # Blocks a transaction or log scan may cover.
  max_block_span: 1000
  default_page_size: 20
  max_page_size: 100

events:
  ingress_capacity: 4096
  default_subscriber_capacity: 256

observability:
  # trace, debug, info, warn, error
  log_level: "info"
  # json or pretty
  log_format: "pretty"
  metrics_enabled: true
"#;

/// Load and validate configuration from a YAML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read
/// - The YAML is invalid
/// - Any configuration value fails validation
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IndexerConfig, ConfigError> {
    let path = path.as_ref();
    let path_str = path.display().to_string();

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path_str.clone(),
        source: e,
    })?;

    load_config_from_str(&content, &path_str)
}

/// Load and validate configuration from a YAML string.
pub fn load_config_from_str(
    content: &str,
    source_name: &str,
) -> Result<IndexerConfig, ConfigError> {
    let config = parse_config(content, source_name)?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse without validating, so command-line overrides can be applied first.
pub fn parse_config(content: &str, source_name: &str) -> Result<IndexerConfig, ConfigError> {
    serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
        path: source_name.to_string(),
        source: e,
    })
}

/// Write [`DEFAULT_CONFIG_YAML`] to `path`.
///
/// Returns `false` without touching the file when it exists and `overwrite`
/// is not set.
pub fn write_default_config<P: AsRef<Path>>(path: P, overwrite: bool) -> Result<bool, ConfigError> {
    let path = path.as_ref();
    if path.exists() && !overwrite {
        return Ok(false);
    }

    let write_error = |source| ConfigError::FileWrite {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_YAML).map_err(write_error)?;
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const VALID_CONFIG: &str = r#"
chain:
  chain_id: 1
  epoch_length: 30
  system_contracts:
    native_token: "0x0000000000000000000000000000000000001000"
    governance:
      - "0x0000000000000000000000000000000000001001"

storage:
  path: "./data"
  read_pool_size: 8

query:
  max_block_span: 500

events:
  ingress_capacity: 1024
"#;

    #[test]
    fn test_load_valid_config() {
        let config = load_config_from_str(VALID_CONFIG, "chainidx.yaml").unwrap();
        assert_eq!(config.chain.chain_id, 1);
        assert_eq!(config.chain.epoch_length, 30);
        assert_eq!(config.chain.system_contracts.governance.len(), 1);
        assert!(config.chain.system_contracts.native_token.is_some());
        assert_eq!(config.storage.read_pool_size, 8);
        assert_eq!(config.query.max_block_span, 500);
        assert_eq!(config.events.ingress_capacity, 1024);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let config_with_unknown = r#"
chain:
  chain_id: 1
  unknown_field: "bad"
"#;
        let result = load_config_from_str(config_with_unknown, "chainidx.yaml");
        match result.unwrap_err() {
            ConfigError::Parse { .. } => {}
            e => panic!("Expected Parse error, got {e:?}"),
        }
    }

    #[test]
    fn test_mandatory_indexes_cannot_be_disabled() {
        for family in ["address_activity", "token_transfers"] {
            let config = format!("storage:\n  indexes:\n    {family}: false\n");
            let result = load_config_from_str(&config, "chainidx.yaml");
            assert!(
                matches!(result, Err(ConfigError::Parse { .. })),
                "{family} was accepted"
            );
        }

        let config =
            load_config_from_str("storage:\n  indexes:\n    balances: false\n", "chainidx.yaml")
                .unwrap();
        assert!(!config.storage.indexes.balances);
        assert!(config.storage.indexes.contracts);
    }

    #[test]
    fn test_defaults_applied() {
        let config = load_config_from_str("chain:\n  chain_id: 7\n", "chainidx.yaml").unwrap();

        assert_eq!(config.chain.epoch_length, 10);
        assert_eq!(config.storage.path, "./data");
        assert_eq!(config.query.max_block_span, 1000);
        assert_eq!(config.query.default_page_size, 20);
        assert_eq!(config.events.default_subscriber_capacity, 256);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_invalid_yaml_syntax() {
        let bad_yaml = "chain:\n  chain_id: [invalid";
        let result = load_config_from_str(bad_yaml, "chainidx.yaml");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let result = load_config_from_str("chain:\n  chain_id: 0\n", "chainidx.yaml");
        assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let result = load_config(dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(ConfigError::FileRead { .. })));
    }

    #[test]
    fn test_default_config_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("chainidx.yaml");

        assert!(write_default_config(&path, false).unwrap());
        let config = load_config(&path).unwrap();
        assert_eq!(config.chain.chain_id, 1);
        assert_eq!(config.query.max_page_size, 100);

        // An existing file is left alone unless overwriting.
        std::fs::write(&path, "chain:\n  chain_id: 5\n").unwrap();
        assert!(!write_default_config(&path, false).unwrap());
        assert_eq!(load_config(&path).unwrap().chain.chain_id, 5);
        assert!(write_default_config(&path, true).unwrap());
        assert_eq!(load_config(&path).unwrap().chain.chain_id, 1);
    }
}
