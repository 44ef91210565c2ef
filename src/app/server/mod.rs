// Streaming server - Accepts control connections and runs one session per client

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::app::session::{Session, SessionContext};
use crate::catalog::VideoCatalog;
use crate::domain::model::DEFAULT_STREAMING_PORT;
use crate::error::{VidStreamError, VidStreamResult};
use crate::ports::*;

/// Server tuning that does not come from the catalog
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port announced to clients for the media stream
    pub stream_port: u16,
    /// How long `stop` waits for sessions to finish
    pub shutdown_grace: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            stream_port: DEFAULT_STREAMING_PORT,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

struct Running {
    local_addr: SocketAddr,
    ctx: Arc<SessionContext>,
}

/// Control-plane server.
///
/// There is one outbound stream per server: a stream started by one session
/// replaces the stream of any other session.
pub struct StreamingServer {
    catalog: Arc<VideoCatalog>,
    transcoder: Arc<dyn TranscodePort>,
    streamer: Arc<dyn StreamPort>,
    settings: ServerSettings,
    running: Mutex<Option<Running>>,
}

impl StreamingServer {
    pub fn new(
        catalog: Arc<VideoCatalog>,
        transcoder: Arc<dyn TranscodePort>,
        streamer: Arc<dyn StreamPort>,
        settings: ServerSettings,
    ) -> Self {
        Self {
            catalog,
            transcoder,
            streamer,
            settings,
            running: Mutex::new(None),
        }
    }

    pub fn catalog(&self) -> &Arc<VideoCatalog> {
        &self.catalog
    }

    /// Listen on all interfaces at `port` (0 picks a free port)
    pub async fn start(&self, port: u16) -> VidStreamResult<SocketAddr> {
        self.start_on(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
            .await
    }

    /// Bind `addr` and start accepting connections; returns the bound address
    pub async fn start_on(&self, addr: SocketAddr) -> VidStreamResult<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(existing) = running.as_ref() {
            warn!("The server is already running on {}", existing.local_addr);
            return Ok(existing.local_addr);
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| VidStreamError::Bind {
                address: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let ctx = Arc::new(SessionContext {
            catalog: self.catalog.clone(),
            streamer: self.streamer.clone(),
            stream_port: self.settings.stream_port,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });
        ctx.tracker.spawn(accept_loop(listener, ctx.clone()));

        info!("Streaming server started on {}", local_addr);
        *running = Some(Running { local_addr, ctx });
        Ok(local_addr)
    }

    /// Stop accepting, end every session and stop the encoder processes.
    /// No-op when the server is not running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        info!("Stopping the streaming server");

        let ctx = running.ctx;
        ctx.shutdown.cancel();
        self.streamer.stop_stream().await;
        self.transcoder.cancel_transcode().await;

        ctx.tracker.close();
        if tokio::time::timeout(self.settings.shutdown_grace, ctx.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "Sessions did not finish within {:?}, abandoning them",
                self.settings.shutdown_grace
            );
        }
        info!("Streaming server stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }
}

async fn accept_loop(listener: TcpListener, ctx: Arc<SessionContext>) {
    loop {
        tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "New client connection");
                    ctx.tracker.spawn(Session::serve(stream, peer, ctx.clone()));
                }
                Err(e) => {
                    error!("Error while accepting a connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
    info!("No longer accepting connections");
}
