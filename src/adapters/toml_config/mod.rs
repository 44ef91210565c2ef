// TOML config adapter - Configuration management using TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adapters::speed_probe::DEFAULT_PROBE_URLS;
use crate::domain::model::{DEFAULT_CONTROL_PORT, DEFAULT_STREAMING_PORT};
use crate::error::{VidStreamError, VidStreamResult};
use crate::utils::logging::{LogFormat, LoggingConfig};

/// Locations searched, in order, when no config file is given explicitly
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config/vidstream.toml", "vidstream.toml"];

/// Prefix of environment overrides, e.g. `VIDSTREAM_SERVER_PORT`
pub const ENV_PREFIX: &str = "VIDSTREAM_";

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub encoder: EncoderConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub stream_port: u16,
    pub stream_host: String,
    pub videos_dir: PathBuf,
    pub transcoded_dir: PathBuf,
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_CONTROL_PORT,
            stream_port: DEFAULT_STREAMING_PORT,
            stream_host: "127.0.0.1".to_string(),
            videos_dir: PathBuf::from("videos"),
            transcoded_dir: PathBuf::from("transcoded"),
            shutdown_grace_secs: 5,
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub program: String,
    pub termination_grace_secs: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            termination_grace_secs: 3,
        }
    }
}

impl EncoderConfig {
    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_address: String,
    pub server_port: u16,
    pub probe_timeout_secs: u64,
    pub default_speed_mbps: f64,
    pub probe_urls: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: DEFAULT_CONTROL_PORT,
            probe_timeout_secs: 15,
            default_speed_mbps: 2.0,
            probe_urls: DEFAULT_PROBE_URLS.iter().map(|url| url.to_string()).collect(),
        }
    }
}

impl ClientConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// TOML configuration adapter
///
/// Loads [`AppConfig`] from a file and applies `VIDSTREAM_*` environment
/// overrides on top.
pub struct TomlConfigAdapter {
    config: AppConfig,
    source: Option<PathBuf>,
}

impl TomlConfigAdapter {
    /// Adapter holding the built-in defaults
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            source: None,
        }
    }

    /// Load `path`, which must exist
    pub fn from_file(path: &Path) -> VidStreamResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| VidStreamError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;
        let config = Self::parse(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(Self {
            config,
            source: Some(path.to_path_buf()),
        })
    }

    /// Load the explicit file, else the first default location that exists, else defaults
    pub fn discover(explicit: Option<&Path>) -> VidStreamResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match DEFAULT_CONFIG_PATHS.iter().map(Path::new).find(|p| p.is_file()) {
            Some(path) => Self::from_file(path),
            None => {
                debug!("No configuration file found, using defaults");
                Ok(Self::new())
            }
        }
    }

    pub fn parse(content: &str) -> VidStreamResult<AppConfig> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> VidStreamResult<usize> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `VIDSTREAM_<SECTION>_<KEY>` overrides from `vars`; returns how many were applied
    pub fn apply_overrides<I>(&mut self, vars: I) -> VidStreamResult<usize>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut applied = 0;
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if self.apply_override(key, &value)? {
                info!("Found environment override: {} = {}", name, value);
                applied += 1;
            }
        }
        Ok(applied)
    }

    fn apply_override(&mut self, key: &str, value: &str) -> VidStreamResult<bool> {
        let config = &mut self.config;
        match key {
            "SERVER_PORT" => config.server.port = parse_value(key, value)?,
            "SERVER_STREAM_PORT" => config.server.stream_port = parse_value(key, value)?,
            "SERVER_STREAM_HOST" => config.server.stream_host = value.to_string(),
            "SERVER_VIDEOS_DIR" => config.server.videos_dir = PathBuf::from(value),
            "SERVER_TRANSCODED_DIR" => config.server.transcoded_dir = PathBuf::from(value),
            "SERVER_SHUTDOWN_GRACE_SECS" => {
                config.server.shutdown_grace_secs = parse_value(key, value)?
            }
            "ENCODER_PROGRAM" => config.encoder.program = value.to_string(),
            "ENCODER_TERMINATION_GRACE_SECS" => {
                config.encoder.termination_grace_secs = parse_value(key, value)?
            }
            "CLIENT_SERVER_ADDRESS" => config.client.server_address = value.to_string(),
            "CLIENT_SERVER_PORT" => config.client.server_port = parse_value(key, value)?,
            "CLIENT_PROBE_TIMEOUT_SECS" => {
                config.client.probe_timeout_secs = parse_value(key, value)?
            }
            "CLIENT_DEFAULT_SPEED_MBPS" => {
                config.client.default_speed_mbps = parse_value(key, value)?
            }
            "CLIENT_PROBE_URLS" => {
                config.client.probe_urls = value
                    .split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            "LOG_LEVEL" => config.logging.level = value.to_string(),
            "LOG_FORMAT" => config.logging.format = parse_value(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    pub fn into_config(self) -> AppConfig {
        self.config
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

impl Default for TomlConfigAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AppConfig {
    /// Reject values the server or client cannot run with
    pub fn validate(&self) -> VidStreamResult<()> {
        let invalid = |message: &str| -> VidStreamResult<()> {
            Err(VidStreamError::Config {
                message: message.to_string(),
            })
        };

        if self.server.port == 0 || self.server.stream_port == 0 {
            return invalid("server ports must be non-zero");
        }
        if self.server.port == self.server.stream_port {
            return invalid("server port and stream port must differ");
        }
        if self.client.server_port == 0 {
            return invalid("client server_port must be non-zero");
        }
        if self.server.shutdown_grace_secs == 0 || self.encoder.termination_grace_secs == 0 {
            return invalid("grace periods must be greater than zero");
        }
        if self.client.probe_timeout_secs == 0 {
            return invalid("probe timeout must be greater than zero");
        }
        if !(self.client.default_speed_mbps.is_finite() && self.client.default_speed_mbps > 0.0) {
            return invalid("default speed must be a positive number");
        }
        if self.encoder.program.trim().is_empty() {
            return invalid("encoder program must not be empty");
        }
        self.logging.env_filter().map(|_| ())
    }
}

fn parse_value<T>(key: &str, value: &str) -> VidStreamResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| VidStreamError::Config {
        message: format!("{}{} has an invalid value '{}': {}", ENV_PREFIX, key, value, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.server.stream_port, 8889);
        assert_eq!(config.server.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.encoder.program, "ffmpeg");
        assert_eq!(config.encoder.termination_grace(), Duration::from_secs(3));
        assert_eq!(config.client.probe_timeout(), Duration::from_secs(15));
        assert_eq!(config.client.default_speed_mbps, 2.0);
        assert_eq!(config.client.probe_urls.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_and_client_agree_on_control_port() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, DEFAULT_CONTROL_PORT);
        assert_eq!(config.client.server_port, config.server.port);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = TomlConfigAdapter::parse(
            r#"
            [server]
            port = 9000
            videos_dir = "/srv/videos"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.videos_dir, PathBuf::from("/srv/videos"));
        assert_eq!(config.server.stream_port, 8889);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.encoder, EncoderConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(matches!(
            TomlConfigAdapter::parse("[server\nport = 1"),
            Err(VidStreamError::Toml(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[encoder]\nprogram = \"/opt/ffmpeg/bin/ffmpeg\"").unwrap();

        let adapter = TomlConfigAdapter::discover(Some(file.path())).unwrap();
        assert_eq!(adapter.config().encoder.program, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(adapter.source(), Some(file.path()));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = TomlConfigAdapter::discover(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(VidStreamError::Config { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut adapter = TomlConfigAdapter::new();
        let vars = vec![
            ("VIDSTREAM_SERVER_PORT".to_string(), "7000".to_string()),
            ("VIDSTREAM_CLIENT_DEFAULT_SPEED_MBPS".to_string(), "4.5".to_string()),
            ("VIDSTREAM_CLIENT_PROBE_URLS".to_string(), "http://a, http://b".to_string()),
            ("VIDSTREAM_LOG_FORMAT".to_string(), "compact".to_string()),
            ("VIDSTREAM_UNKNOWN".to_string(), "x".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];

        assert_eq!(adapter.apply_overrides(vars).unwrap(), 4);
        let config = adapter.config();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.client.default_speed_mbps, 4.5);
        assert_eq!(config.client.probe_urls, vec!["http://a", "http://b"]);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut adapter = TomlConfigAdapter::new();
        let result = adapter.apply_overrides(vec![(
            "VIDSTREAM_SERVER_PORT".to_string(),
            "eighty".to_string(),
        )]);
        match result {
            Err(VidStreamError::Config { message }) => {
                assert!(message.contains("VIDSTREAM_SERVER_PORT"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.server.stream_port = config.server.port;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.client.default_speed_mbps = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.encoder.termination_grace_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "vidstream=loudest".to_string();
        assert!(config.validate().is_err());
    }
}
