//! Command-line argument definitions

use std::path::PathBuf;

use clap::Args;

/// Arguments for the serve command
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Control port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Port announced to clients for the media stream
    #[arg(long)]
    pub stream_port: Option<u16>,

    /// Directory holding the source videos
    #[arg(long)]
    pub videos_dir: Option<PathBuf>,

    /// Directory for the transcoded variants
    #[arg(long)]
    pub transcoded_dir: Option<PathBuf>,
}

/// Arguments for the connect command
#[derive(Args, Debug, Default)]
pub struct ConnectArgs {
    /// Server address
    #[arg(short, long)]
    pub address: Option<String>,

    /// Server control port
    #[arg(short, long)]
    pub port: Option<u16>,
}
