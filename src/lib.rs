//! VidStream adaptive video streaming library
//!
//! A control-plane server that catalogs a directory of videos, transcodes each
//! into a five-tier bitrate ladder and streams the tier matching each client's
//! measured bandwidth, plus the client that drives a local player.

pub mod adapters;
pub mod app;
pub mod catalog;
pub mod cli;
pub mod config_initialization;
pub mod domain;
pub mod error;
pub mod ports;
pub mod protocol;
pub mod utils;

// Re-export commonly used types
pub use adapters::toml_config::AppConfig;
pub use app::{AppContainer, ClientEvent, StreamingClient, StreamingServer};
pub use catalog::VideoCatalog;
pub use domain::errors::DomainError;
pub use domain::model::{StreamProfile, TranscodedVariant, VideoEntry};
pub use domain::rules::BitrateSelector;
pub use error::{VidStreamError, VidStreamResult};
pub use protocol::{Message, MessageKind};
