//! Structured logging on top of `tracing-subscriber`.
//!
//! `RUST_LOG` takes precedence over the configured level so individual
//! modules can be turned up without editing the config file.

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Log format for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON format for machine parsing.
    Json,
    /// Human-readable format.
    #[default]
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = std::convert::Infallible;

    /// Parse from string, case-insensitive. Defaults to Pretty for unknown values.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        })
    }
}

/// Parse log level from string. Unknown values fall back to info.
pub fn parse_level(s: &str) -> Level {
    match s.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(level).as_str().to_lowercase()))
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed, which happens
/// when several tests in one process initialise logging.
pub fn init_tracing(level: &str, format: LogFormat) -> bool {
    let builder = fmt().with_env_filter(env_filter(level)).with_target(true);
    let result = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    result.is_ok()
}

/// Install the global subscriber from the observability config.
pub fn init_tracing_from_config(config: &ObservabilityConfig) -> bool {
    let format = config.log_format.parse().unwrap_or_default();
    init_tracing(&config.log_level, format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!("human".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!("unknown".parse::<LogFormat>(), Ok(LogFormat::Pretty));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("nonsense"), Level::INFO);
    }

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        let _ = init_tracing("info", LogFormat::Pretty);
        assert!(!init_tracing("debug", LogFormat::Json));
    }
}
