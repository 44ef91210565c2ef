// Streaming client - Connects to the server and drives local playback

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::RwLock;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::errors::*;
use crate::domain::model::*;
use crate::ports::*;
use crate::protocol::{Message, MessageCodec, MessageKind, Outbox};

/// Something the front-end should know about
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The server's catalog
    VideoList(Vec<VideoEntry>),
    /// Playback of the announced stream has started
    StreamReady(StreamProfile),
    /// The server or the local player reported a failure
    StreamError(String),
    /// Informational text from the server
    ServerInfo(String),
    /// One line of player output
    PlayerOutput(String),
    /// The connection is gone
    Disconnected,
}

/// Client tuning
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Upper bound for the bandwidth probe
    pub probe_timeout: Duration,
    /// Speed reported when the probe fails or times out
    pub default_speed_mbps: f64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(15),
            default_speed_mbps: 2.0,
        }
    }
}

struct Connection {
    server_address: String,
    outbox: Outbox,
    shutdown: CancellationToken,
}

struct ClientInner {
    settings: ClientSettings,
    player: Arc<dyn PlaybackPort>,
    probe: Arc<dyn SpeedProbePort>,
    events: mpsc::UnboundedSender<ClientEvent>,
    connection: Mutex<Option<Connection>>,
    connected: AtomicBool,
    speed_mbps: RwLock<f64>,
}

/// Client session driver.
///
/// Events are published on the channel returned by [`StreamingClient::new`].
#[derive(Clone)]
pub struct StreamingClient {
    inner: Arc<ClientInner>,
}

impl StreamingClient {
    pub fn new(
        settings: ClientSettings,
        player: Arc<dyn PlaybackPort>,
        probe: Arc<dyn SpeedProbePort>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let speed = settings.default_speed_mbps;
        let client = Self {
            inner: Arc::new(ClientInner {
                settings,
                player,
                probe,
                events,
                connection: Mutex::new(None),
                connected: AtomicBool::new(false),
                speed_mbps: RwLock::new(speed),
            }),
        };
        (client, events_rx)
    }

    /// Measure bandwidth, connect, and report the speed to the server
    pub async fn connect(&self, address: &str, port: u16) -> Result<(), DomainError> {
        let inner = &self.inner;
        info!("Connect to server: {}:{}", address, port);

        if !inner.player.is_available().await {
            error!("The encoder is not available. Install it and make sure that it is on the PATH");
            return Err(DomainError::ResourceUnavailable(
                "The encoder/player executable is not available".to_string(),
            ));
        }

        let mut connection = inner.connection.lock().await;
        if connection.is_some() {
            warn!("Already connected to the server");
            return Ok(());
        }

        let speed = inner.measure_speed().await;
        *inner.speed_mbps.write() = speed;

        let stream = TcpStream::connect((address, port)).await.map_err(|e| {
            error!("Error during the connection to the server: {}", e);
            DomainError::ResourceUnavailable(format!(
                "Could not connect to {}:{}: {}",
                address, port, e
            ))
        })?;

        let (reader, writer) = stream.into_split();
        let (outbox, writer_task) = Outbox::new(writer, format!("{}:{}", address, port));
        tokio::spawn(writer_task.run());

        let shutdown = CancellationToken::new();
        tokio::spawn(receive_loop(
            inner.clone(),
            reader,
            address.to_string(),
            shutdown.clone(),
        ));

        info!("Send connection speed to the server: {:.2} Mbps", speed);
        outbox.send(Message::report_speed(speed));

        *connection = Some(Connection {
            server_address: address.to_string(),
            outbox,
            shutdown,
        });
        inner.connected.store(true, Ordering::SeqCst);
        info!("Successful connection to the server");
        Ok(())
    }

    pub async fn request_video_list(&self) -> Result<(), DomainError> {
        info!("Request for the video list from the server");
        self.inner.send(Message::request_video_list()).await
    }

    /// Stop local playback and ask the server to stream `file_name`
    pub async fn request_stream(&self, file_name: &str) -> Result<(), DomainError> {
        self.inner.ensure_connected()?;
        info!("Request to stream: {}", file_name);
        self.inner.player.stop_playback().await;
        self.inner.send(Message::request_stream(file_name)).await
    }

    /// Ask the server to stop streaming, then stop local playback
    pub async fn stop_streaming(&self) -> Result<(), DomainError> {
        info!("Request to terminate streaming");
        let sent = self.inner.send(Message::stop_streaming()).await;
        if sent.is_ok() {
            self.inner.player.stop_playback().await;
        }
        sent
    }

    /// Leave the server. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Link speed reported to the server
    pub fn speed_mbps(&self) -> f64 {
        *self.inner.speed_mbps.read()
    }

    /// Address of the connected server
    pub async fn server_address(&self) -> Option<String> {
        self.inner
            .connection
            .lock()
            .await
            .as_ref()
            .map(|c| c.server_address.clone())
    }
}

impl ClientInner {
    async fn measure_speed(&self) -> f64 {
        let fallback = self.settings.default_speed_mbps;
        info!("Performing speed test...");

        match tokio::time::timeout(self.settings.probe_timeout, self.probe.measure_downlink_mbps())
            .await
        {
            Ok(Ok(speed)) if speed.is_finite() && speed > 0.0 => {
                info!("Connection speed: {:.2} Mbps", speed);
                speed
            }
            Ok(Ok(speed)) => {
                warn!("Speed test returned {}, using default speed: {} Mbps", speed, fallback);
                fallback
            }
            Ok(Err(e)) => {
                warn!("Speed test failed ({}), using default speed: {} Mbps", e, fallback);
                fallback
            }
            Err(_) => {
                warn!(
                    "Speed test did not finish within {:?}, using default speed: {} Mbps",
                    self.settings.probe_timeout, fallback
                );
                fallback
            }
        }
    }

    fn ensure_connected(&self) -> Result<(), DomainError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            error!("There is no connection with the server");
            Err(DomainError::NotConnected)
        }
    }

    async fn send(&self, message: Message) -> Result<(), DomainError> {
        let connection = self.connection.lock().await;
        match connection.as_ref() {
            Some(connection) if connection.outbox.send(message) => Ok(()),
            _ => {
                error!("There is no connection with the server");
                Err(DomainError::NotConnected)
            }
        }
    }

    async fn disconnect(&self) {
        let Some(connection) = self.connection.lock().await.take() else {
            return;
        };
        self.connected.store(false, Ordering::SeqCst);
        info!("Disconnect from the server");

        if !connection.outbox.send(Message::disconnect()) {
            debug!("Connection already closed, DISCONNECT not sent");
        }
        self.player.stop_playback().await;
        connection.outbox.close();
        connection.shutdown.cancel();

        let _ = self.events.send(ClientEvent::Disconnected);
        info!("Disconnection successful");
    }

    async fn handle_server_message(&self, message: Message, server_address: &str) {
        debug!("Received message from server: {}", message);

        match message.kind {
            MessageKind::VideoListResponse => match message.video_list_payload() {
                Some(entries) => {
                    info!("A video list was received with a size of {}", entries.len());
                    let _ = self.events.send(ClientEvent::VideoList(entries.to_vec()));
                }
                None => warn!("Video list response without a list"),
            },
            MessageKind::StreamReady => match message.profile() {
                Some(profile) => {
                    info!("The stream is ready: {}", profile);
                    self.start_playback(server_address, profile).await;
                    let _ = self.events.send(ClientEvent::StreamReady(profile.clone()));
                }
                None => warn!("Stream ready message without a profile"),
            },
            MessageKind::StreamError => {
                let reason = message.text().unwrap_or("unknown error").to_string();
                error!("Streaming error: {}", reason);
                let _ = self.events.send(ClientEvent::StreamError(reason));
            }
            MessageKind::ServerInfo => {
                let text = message.text().unwrap_or_default().to_string();
                info!("Information from the server: {}", text);
                let _ = self.events.send(ClientEvent::ServerInfo(text));
            }
            other => warn!("Unexpected message type from server: {}", other.as_str()),
        }
    }

    async fn start_playback(&self, server_address: &str, profile: &StreamProfile) {
        info!("Start playback from {}:{}", server_address, profile.port);
        self.player.stop_playback().await;

        let events = self.events.clone();
        let on_line: LineSink = Arc::new(move |line| {
            let _ = events.send(ClientEvent::PlayerOutput(line));
        });

        match self.player.start_playback(server_address, profile, on_line).await {
            Ok(completion) => {
                let events = self.events.clone();
                tokio::spawn(async move {
                    match completion.outcome().await {
                        Ok(outcome) => info!("The playback has finished ({:?})", outcome),
                        Err(e) => {
                            error!("Error during playback: {}", e);
                            let _ = events
                                .send(ClientEvent::StreamError(format!("Error during playback: {}", e)));
                        }
                    }
                });
            }
            Err(e) => {
                error!("Error during playback: {}", e);
                let _ = self
                    .events
                    .send(ClientEvent::StreamError(format!("Error during playback: {}", e)));
            }
        }
    }
}

async fn receive_loop(
    inner: Arc<ClientInner>,
    reader: OwnedReadHalf,
    server_address: String,
    shutdown: CancellationToken,
) {
    let mut frames = FramedRead::new(reader, MessageCodec::new());
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            frame = frames.next() => match frame {
                None => {
                    info!("The server has closed the connection");
                    break;
                }
                Some(Err(e)) => {
                    error!("Error during the reception of the messages: {}", e);
                    break;
                }
                Some(Ok(Err(e))) => warn!("Dropping invalid message from server: {}", e),
                Some(Ok(Ok(message))) => inner.handle_server_message(message, &server_address).await,
            },
        }
    }
    inner.disconnect().await;
}

#[cfg(test)]
mod tests;
