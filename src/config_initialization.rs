//! Configuration initialization and hierarchy management

use anyhow::{Context, Result};
use tracing::info;

use crate::adapters::toml_config::{AppConfig, TomlConfigAdapter};
use crate::cli::{Cli, Commands};

/// Build the configuration following precedence: CLI > Env > File > Defaults
pub fn initialize_configuration_hierarchy(cli: &Cli) -> Result<AppConfig> {
    // Steps 1 and 2: defaults, then the first config file found
    let mut adapter = TomlConfigAdapter::discover(cli.config.as_deref())
        .context("Failed to load the configuration file")?;

    // Step 3: environment variables
    let env_overrides = adapter
        .apply_env()
        .context("Invalid environment configuration")?;

    // Step 4: command-line flags
    let cli_overrides = apply_cli_configuration_overrides(adapter.config_mut(), cli);

    let source = adapter.source().map(|path| path.display().to_string());
    let config = adapter.into_config();
    config.validate().context("Invalid configuration")?;

    info!(
        "Configuration loaded from {} ({} environment, {} command-line overrides)",
        source.as_deref().unwrap_or("defaults"),
        env_overrides,
        cli_overrides
    );
    Ok(config)
}

/// Apply CLI argument overrides to `config`; returns how many were applied
pub fn apply_cli_configuration_overrides(config: &mut AppConfig, cli: &Cli) -> usize {
    let mut overrides = 0;
    let mut apply = |applied: bool| {
        if applied {
            overrides += 1;
        }
    };

    apply(set(&mut config.logging.level, cli.log_level.clone()));
    apply(set(&mut config.logging.format, cli.log_format));

    match &cli.command {
        Commands::Serve(args) => {
            apply(set(&mut config.server.port, args.port));
            apply(set(&mut config.server.stream_port, args.stream_port));
            apply(set(&mut config.server.videos_dir, args.videos_dir.clone()));
            apply(set(&mut config.server.transcoded_dir, args.transcoded_dir.clone()));
        }
        Commands::Connect(args) => {
            apply(set(&mut config.client.server_address, args.address.clone()));
            apply(set(&mut config.client.server_port, args.port));
        }
    }

    overrides
}

fn set<T>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(value) => {
            *slot = value;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::logging::LogFormat;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn test_serve_flags_override_config() {
        let cli = Cli::parse_from([
            "vidstream",
            "--log-level",
            "debug",
            "serve",
            "--port",
            "9000",
            "--videos-dir",
            "/srv/videos",
        ]);
        let mut config = AppConfig::default();
        let applied = apply_cli_configuration_overrides(&mut config, &cli);

        assert_eq!(applied, 3);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.videos_dir, PathBuf::from("/srv/videos"));
        assert_eq!(config.server.stream_port, AppConfig::default().server.stream_port);
    }

    #[test]
    fn test_connect_flags_override_config() {
        let cli = Cli::parse_from([
            "vidstream",
            "connect",
            "--address",
            "10.0.0.5",
            "--port",
            "7000",
            "--log-format",
            "json",
        ]);
        let mut config = AppConfig::default();
        assert_eq!(apply_cli_configuration_overrides(&mut config, &cli), 3);
        assert_eq!(config.client.server_address, "10.0.0.5");
        assert_eq!(config.client.server_port, 7000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_no_flags_keep_defaults() {
        let cli = Cli::parse_from(["vidstream", "serve"]);
        let mut config = AppConfig::default();
        assert_eq!(apply_cli_configuration_overrides(&mut config, &cli), 0);
        assert_eq!(config, AppConfig::default());
    }
}
