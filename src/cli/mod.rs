//! CLI module for VidStream
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::utils::logging::LogFormat;

pub mod args;
pub mod commands;

/// VidStream adaptive video streaming
///
/// Serves a directory of videos at a bitrate matched to each client's link,
/// or connects to such a server and plays the stream locally.
#[derive(Parser, Debug)]
#[command(name = "vidstream")]
#[command(about = "VidStream - Adaptive video streaming server and client")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Configuration file (default: config/vidstream.toml or vidstream.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Logging level or filter directive
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the video directory to streaming clients
    Serve(args::ServeArgs),
    /// Connect to a server and play its streams
    Connect(args::ConnectArgs),
}
