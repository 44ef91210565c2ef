//! FFmpeg execution adapter
//!
//! Implements the transcode, stream and playback ports by running the
//! external encoder under a [`ProcessSupervisor`], one supervisor per role.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::domain::errors::*;
use crate::domain::model::*;
use crate::ports::*;

pub mod command;
pub mod supervisor;

pub use supervisor::{ProcessRole, ProcessSupervisor, SupervisorError, CLOSED_BY_VIEWER_EXIT_CODE};

/// Host the outbound UDP stream is sent to unless configured otherwise
pub const DEFAULT_STREAM_HOST: &str = "127.0.0.1";

/// FFmpeg-based execution adapter
pub struct FfmpegAdapter {
    program: String,
    stream_host: String,
    transcoder: ProcessSupervisor,
    streamer: ProcessSupervisor,
    player: ProcessSupervisor,
}

impl FfmpegAdapter {
    /// Create an adapter running `program`, allowing `grace` for a requested stop
    pub fn new(program: impl Into<String>, grace: Duration) -> Self {
        let program = program.into();
        Self {
            transcoder: ProcessSupervisor::new(ProcessRole::Transcode, program.clone(), grace),
            streamer: ProcessSupervisor::new(ProcessRole::StreamOut, program.clone(), grace),
            player: ProcessSupervisor::new(ProcessRole::StreamIn, program.clone(), grace),
            stream_host: DEFAULT_STREAM_HOST.to_string(),
            program,
        }
    }

    /// Send the outbound stream to `host` instead of the loopback address
    pub fn with_stream_host(mut self, host: impl Into<String>) -> Self {
        self.stream_host = host.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn stream_host(&self) -> &str {
        &self.stream_host
    }

    /// Whether `<program> -version` runs and exits successfully
    pub async fn check_available(&self) -> bool {
        let status = Command::new(&self.program)
            .args(command::version_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(status) if status.success() => true,
            Ok(status) => {
                debug!("{} -version exited with {}", self.program, status);
                false
            }
            Err(e) => {
                debug!("{} could not be started: {}", self.program, e);
                false
            }
        }
    }

    /// Stop every role and refuse to start new processes
    pub async fn shutdown(&self) {
        tokio::join!(
            self.transcoder.shutdown(),
            self.streamer.shutdown(),
            self.player.shutdown()
        );
        info!("Encoder processes shut down");
    }
}

#[async_trait]
impl TranscodePort for FfmpegAdapter {
    async fn transcode(
        &self,
        source: &Path,
        tier: &StreamProfile,
        output: &Path,
    ) -> Result<(), DomainError> {
        info!(
            file = %source.display(),
            "Transcoding to {} -> {}",
            tier,
            output.display()
        );
        let args = command::transcode_args(source, tier, output);
        self.transcoder
            .run_to_completion(&args)
            .await
            .map_err(DomainError::from)
    }

    async fn cancel_transcode(&self) {
        self.transcoder.terminate().await;
    }
}

#[async_trait]
impl StreamPort for FfmpegAdapter {
    async fn start_stream(
        &self,
        variant: &TranscodedVariant,
        profile: &StreamProfile,
    ) -> Result<Completion, DomainError> {
        if !variant.path.is_file() {
            return Err(DomainError::FileNotFound(variant.path.display().to_string()));
        }

        info!(file = %variant.path.display(), "Streaming at {} to udp://{}:{}", profile, self.stream_host, profile.port);
        let args = command::stream_out_args(&variant.path, profile, &self.stream_host);
        let on_line: LineSink = Arc::new(|_line| {});
        self.streamer
            .run_supervised(&args, on_line)
            .await
            .map_err(DomainError::from)
    }

    async fn stop_stream(&self) {
        self.streamer.terminate().await;
    }
}

#[async_trait]
impl PlaybackPort for FfmpegAdapter {
    async fn start_playback(
        &self,
        server_address: &str,
        profile: &StreamProfile,
        on_line: LineSink,
    ) -> Result<Completion, DomainError> {
        info!("Starting playback of udp://{}:{}", server_address, profile.port);
        let args = command::playback_args(server_address, profile.port);
        self.player
            .run_supervised(&args, on_line)
            .await
            .map_err(DomainError::from)
    }

    async fn stop_playback(&self) {
        self.player.terminate().await;
    }

    async fn is_available(&self) -> bool {
        self.check_available().await
    }
}
