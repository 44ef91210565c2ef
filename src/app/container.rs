use std::sync::Arc;

use tokio::sync::mpsc;

use crate::adapters::toml_config::AppConfig;
use crate::adapters::{FfmpegAdapter, HttpSpeedProbe};
use crate::app::client::{ClientEvent, ClientSettings, StreamingClient};
use crate::app::server::{ServerSettings, StreamingServer};
use crate::catalog::VideoCatalog;
use crate::domain::errors::DomainError;
use crate::ports::{PlaybackPort, SpeedProbePort, StreamPort, TranscodePort};

/// Wires the adapters behind the ports from one configuration
pub struct AppContainer {
    config: AppConfig,
    encoder: Arc<FfmpegAdapter>,
}

impl AppContainer {
    pub fn new(config: AppConfig) -> Self {
        let encoder = FfmpegAdapter::new(
            config.encoder.program.clone(),
            config.encoder.termination_grace(),
        )
        .with_stream_host(config.server.stream_host.clone());

        Self {
            config,
            encoder: Arc::new(encoder),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn encoder(&self) -> Arc<FfmpegAdapter> {
        Arc::clone(&self.encoder)
    }

    pub fn catalog(&self) -> Arc<VideoCatalog> {
        Arc::new(VideoCatalog::new(
            self.config.server.videos_dir.clone(),
            self.config.server.transcoded_dir.clone(),
            Arc::clone(&self.encoder) as Arc<dyn TranscodePort>,
        ))
    }

    pub fn server(&self, catalog: Arc<VideoCatalog>) -> StreamingServer {
        StreamingServer::new(
            catalog,
            Arc::clone(&self.encoder) as Arc<dyn TranscodePort>,
            Arc::clone(&self.encoder) as Arc<dyn StreamPort>,
            ServerSettings {
                stream_port: self.config.server.stream_port,
                shutdown_grace: self.config.server.shutdown_grace(),
            },
        )
    }

    pub fn client(
        &self,
    ) -> Result<(StreamingClient, mpsc::UnboundedReceiver<ClientEvent>), DomainError> {
        let probe = HttpSpeedProbe::new(
            self.config.client.probe_urls.clone(),
            crate::adapters::speed_probe::DEFAULT_SAMPLE_DURATION,
        )?;

        Ok(StreamingClient::new(
            ClientSettings {
                probe_timeout: self.config.client.probe_timeout(),
                default_speed_mbps: self.config.client.default_speed_mbps,
            },
            Arc::clone(&self.encoder) as Arc<dyn PlaybackPort>,
            Arc::new(probe) as Arc<dyn SpeedProbePort>,
        ))
    }
}
