//! Logging configuration and subscriber setup

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::{VidStreamError, VidStreamResult};

/// Logging configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `vidstream=debug,warn`
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line format
    Pretty,
    /// Single-line text format
    Compact,
    /// JSON format for structured logging
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        };
        f.write_str(name)
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

impl LoggingConfig {
    /// Filter built from the configured level
    pub fn env_filter(&self) -> VidStreamResult<EnvFilter> {
        EnvFilter::try_new(&self.level).map_err(|e| VidStreamError::Config {
            message: format!("Invalid log level '{}': {}", self.level, e),
        })
    }

    /// Install the global subscriber. `RUST_LOG`, when set, replaces the
    /// configured level. Returns `false` if a subscriber was already installed.
    pub fn init(&self) -> VidStreamResult<bool> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => self.env_filter()?,
        };

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        let installed = match self.format {
            LogFormat::Pretty => builder.pretty().try_init(),
            LogFormat::Compact => builder.compact().try_init(),
            LogFormat::Json => builder.json().try_init(),
        };

        if installed.is_ok() {
            tracing::debug!(level = %self.level, format = %self.format, "Logging initialized");
        }
        Ok(installed.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_format_deserializes_lowercase() {
        let config: LoggingConfig = toml::from_str("level = \"debug\"\nformat = \"json\"").unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "debug");
    }

    #[test]
    fn test_env_filter_rejects_garbage() {
        let config = LoggingConfig {
            level: "vidstream=loudest".to_string(),
            ..LoggingConfig::default()
        };
        assert!(config.env_filter().is_err());
        assert!(LoggingConfig::default().env_filter().is_ok());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default();
        let _ = config.init().unwrap();
        assert!(!config.init().unwrap());
    }
}
