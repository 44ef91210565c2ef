//! VidStream adaptive video streaming
//!
//! Serves a directory of videos to clients at the bitrate their link can carry,
//! or connects to such a server and plays the stream through the encoder.
//!
//! # Usage
//!
//! ```bash
//! vidstream serve --videos-dir ./videos --port 8888
//! vidstream connect --address 192.168.1.10 --port 8888
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::info;

use vidstream::cli::{commands, Cli, Commands};
use vidstream::config_initialization::initialize_configuration_hierarchy;
use vidstream::AppContainer;

/// Main entry point for the VidStream CLI application
#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    let config = initialize_configuration_hierarchy(&cli)?;
    config.logging.init()?;
    info!("Starting VidStream");

    let container = AppContainer::new(config);

    // Execute the requested command
    match cli.command {
        Commands::Serve(_) => {
            info!("Executing serve command");
            commands::serve(container).await?;
        }
        Commands::Connect(_) => {
            info!("Executing connect command");
            commands::connect(container).await?;
        }
    }

    info!("VidStream exited successfully");
    Ok(())
}
