// Ports - Interface definitions (contracts)

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::domain::errors::*;
use crate::domain::model::*;

/// Callback receiving each line of a subprocess's merged output
pub type LineSink = Arc<dyn Fn(String) + Send + Sync>;

/// How a supervised process ended, when that counts as success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with status 0
    Completed,
    /// The receiving side went away (ffmpeg exit status 255)
    ClosedByViewer,
    /// Stopped on request
    Terminated,
}

/// Asynchronous completion handle of a supervised process
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<ExitOutcome, DomainError>>,
}

impl Completion {
    /// Create a completion handle and the sender that resolves it
    pub fn channel() -> (oneshot::Sender<Result<ExitOutcome, DomainError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Completion that is already resolved
    pub fn ready(result: Result<ExitOutcome, DomainError>) -> Self {
        let (tx, completion) = Self::channel();
        let _ = tx.send(result);
        completion
    }

    /// Wait for the process to finish
    pub async fn outcome(self) -> Result<ExitOutcome, DomainError> {
        self.rx.await.unwrap_or_else(|_| {
            Err(DomainError::InternalError(
                "Process watcher went away before reporting".to_string(),
            ))
        })
    }
}

/// Port for producing a transcoded variant of a source file
#[async_trait]
pub trait TranscodePort: Send + Sync {
    /// Transcode `source` into `output` at the given tier; resolves when the encoder exits
    async fn transcode(
        &self,
        source: &Path,
        tier: &StreamProfile,
        output: &Path,
    ) -> Result<(), DomainError>;

    /// Stop any transcode in flight
    async fn cancel_transcode(&self);
}

/// Port for the outbound media stream of the server
#[async_trait]
pub trait StreamPort: Send + Sync {
    /// Start streaming `variant` with the stream profile, replacing any running stream
    async fn start_stream(
        &self,
        variant: &TranscodedVariant,
        profile: &StreamProfile,
    ) -> Result<Completion, DomainError>;

    /// Stop the running stream; no-op when idle
    async fn stop_stream(&self);
}

/// Port for local playback on the client
#[async_trait]
pub trait PlaybackPort: Send + Sync {
    /// Start playing the stream announced by the server, replacing any running player
    async fn start_playback(
        &self,
        server_address: &str,
        profile: &StreamProfile,
        on_line: LineSink,
    ) -> Result<Completion, DomainError>;

    /// Stop the player; no-op when idle
    async fn stop_playback(&self);

    /// Whether the encoder/player executable can be run at all
    async fn is_available(&self) -> bool;
}

/// Port for estimating the client's downlink bandwidth
#[async_trait]
pub trait SpeedProbePort: Send + Sync {
    /// Estimated downlink in Mbps
    async fn measure_downlink_mbps(&self) -> Result<f64, DomainError>;
}
