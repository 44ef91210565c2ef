// Session - Per-connection protocol loop of the streaming server

use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::catalog::VideoCatalog;
use crate::domain::errors::*;
use crate::domain::model::*;
use crate::domain::rules::BitrateSelector;
use crate::ports::*;
use crate::protocol::{Message, MessageCodec, MessageKind, Outbox};

/// First message every client receives
pub const WELCOME_MESSAGE: &str = "Connection Successful. Welcome to the Streaming Server.";

/// Link speed assumed until the client reports one
pub const DEFAULT_SESSION_SPEED_MBPS: f64 = 2.0;

/// Server-wide collaborators shared by every session
pub(crate) struct SessionContext {
    pub catalog: Arc<VideoCatalog>,
    pub streamer: Arc<dyn StreamPort>,
    pub stream_port: u16,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
}

/// Work finished in the background and handed back to the session loop
enum SessionEvent {
    PrepareFinished {
        id: u64,
        file_name: String,
        result: Result<VideoEntry, DomainError>,
    },
    /// The stream process exited without this session stopping it
    StreamEnded { id: u64 },
}

/// Preparation whose result the session still wants
struct PendingPrepare {
    id: u64,
    file_name: String,
}

/// The session's outbound stream and the task watching it
struct ActiveStream {
    id: u64,
    file_name: String,
    cancel: CancellationToken,
    observer: JoinHandle<()>,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// State of one client connection
pub(crate) struct Session {
    peer: SocketAddr,
    speed_mbps: f64,
    active: Option<ActiveStream>,
    pending: Option<PendingPrepare>,
    next_id: u64,
    outbox: Outbox,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ctx: Arc<SessionContext>,
}

impl Session {
    /// Serve `stream` until the client leaves, the connection fails, or the server stops
    pub async fn serve(stream: TcpStream, peer: SocketAddr, ctx: Arc<SessionContext>) {
        let (reader, writer) = stream.into_split();
        let (outbox, writer_task) = Outbox::new(writer, peer.to_string());
        ctx.tracker.spawn(writer_task.run());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut session = Session {
            peer,
            speed_mbps: DEFAULT_SESSION_SPEED_MBPS,
            active: None,
            pending: None,
            next_id: 0,
            outbox,
            events_tx,
            events_rx,
            ctx,
        };

        session.outbox.send(Message::server_info(WELCOME_MESSAGE));
        let mut frames = FramedRead::new(reader, MessageCodec::new());

        loop {
            tokio::select! {
                biased;
                _ = session.ctx.shutdown.cancelled() => {
                    debug!(peer = %session.peer, "Server is stopping, closing the session");
                    break;
                }
                Some(event) = session.events_rx.recv() => session.handle_event(event).await,
                frame = frames.next() => match frame {
                    None => {
                        info!(peer = %session.peer, "Client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(peer = %session.peer, "Error in the connection management: {}", e);
                        break;
                    }
                    Some(Ok(Err(e))) => {
                        warn!(peer = %session.peer, "Dropping invalid message: {}", e);
                    }
                    Some(Ok(Ok(message))) => {
                        if session.dispatch(message).await == Flow::Close {
                            break;
                        }
                    }
                },
            }
        }

        session.stop_active_stream().await;
        session.outbox.close();
        info!(peer = %session.peer, "The connection to the client is closed");
    }

    async fn dispatch(&mut self, message: Message) -> Flow {
        info!(peer = %self.peer, "Received message from client: {}", message);

        match message.kind {
            MessageKind::RequestVideoList => {
                let entries = self.ctx.catalog.scan();
                info!(peer = %self.peer, "Sending list of {} videos", entries.len());
                self.outbox.send(Message::video_list(entries));
            }
            MessageKind::RequestStreamVideo => {
                self.handle_stream_request(message.text()).await;
            }
            MessageKind::ReportConnectionSpeed => match message.speed() {
                Some(speed) if speed.is_finite() && speed >= 0.0 => {
                    self.speed_mbps = speed;
                    info!(peer = %self.peer, "The client reported connection speed of {:.2} Mbps", speed);
                }
                _ => warn!(peer = %self.peer, "Invalid connection speed, keeping {:.2} Mbps", self.speed_mbps),
            },
            MessageKind::StopStreaming => {
                info!(peer = %self.peer, "Handle the request to stop streaming");
                self.stop_active_stream().await;
            }
            MessageKind::Disconnect => {
                info!(peer = %self.peer, "Client requested to disconnect");
                return Flow::Close;
            }
            other => {
                warn!(peer = %self.peer, "Unexpected type of message: {}", other.as_str());
            }
        }
        Flow::Continue
    }

    async fn handle_stream_request(&mut self, file_name: Option<&str>) {
        // A newer request always wins over a preparation still in flight
        self.discard_pending_prepare();

        let Some(file_name) = file_name.filter(|name| !name.trim().is_empty()) else {
            error!(peer = %self.peer, "Invalid streaming request: No file name was provided");
            self.outbox.send(Message::stream_error("No file name was provided"));
            return;
        };

        let Some(entry) = self.ctx.catalog.get(file_name) else {
            error!(peer = %self.peer, file = file_name, "The video was not found");
            self.outbox.send(Message::stream_error(format!(
                "The video was not found: {}",
                file_name
            )));
            return;
        };

        if entry.has_variants() {
            self.start_streaming(entry).await;
            return;
        }

        info!(peer = %self.peer, file = file_name, "Preparing video for streaming");
        self.outbox.send(Message::server_info(format!(
            "Preparing {} for streaming...",
            file_name
        )));

        let id = self.allocate_id();
        self.pending = Some(PendingPrepare {
            id,
            file_name: file_name.to_string(),
        });

        // The transcode runs to the end even when superseded; only its result is dropped
        let catalog = self.ctx.catalog.clone();
        let events = self.events_tx.clone();
        let shutdown = self.ctx.shutdown.clone();
        let file_name = file_name.to_string();
        self.ctx.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {}
                result = catalog.prepare(&entry) => {
                    let _ = events.send(SessionEvent::PrepareFinished { id, file_name, result });
                }
            }
        });
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn discard_pending_prepare(&mut self) {
        if let Some(pending) = self.pending.take() {
            info!(peer = %self.peer, file = %pending.file_name, "Preparation result will be discarded");
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::PrepareFinished { id, file_name, result } => {
                if self.pending.as_ref().map(|p| p.id) != Some(id) {
                    debug!(peer = %self.peer, file = %file_name, "Ignoring superseded preparation");
                    return;
                }
                self.pending = None;
                self.finish_prepare(file_name, result).await;
            }
            SessionEvent::StreamEnded { id } => {
                if self.active.as_ref().map(|a| a.id) == Some(id) {
                    if let Some(active) = self.active.take() {
                        debug!(peer = %self.peer, file = %active.file_name, "Stream is no longer running");
                    }
                }
            }
        }
    }

    async fn finish_prepare(&mut self, file_name: String, result: Result<VideoEntry, DomainError>) {
        match result {
            Ok(entry) => {
                debug!(peer = %self.peer, file = %file_name, "Preparation finished");
                self.start_streaming(entry).await;
            }
            Err(e) => {
                error!(peer = %self.peer, file = %file_name, "Error during the video preparation: {}", e);
                self.outbox.send(Message::stream_error(format!(
                    "Error during the video preparation: {}",
                    e
                )));
            }
        }
    }

    async fn start_streaming(&mut self, entry: VideoEntry) {
        let profile = BitrateSelector::select_profile(self.speed_mbps);
        let Some(variant) = BitrateSelector::select_variant(&entry, profile.bitrate_mbps()).cloned()
        else {
            error!(peer = %self.peer, file = %entry.file_name, "No matching file version was found for streaming");
            self.outbox.send(Message::stream_error(
                "No matching file version was found for streaming",
            ));
            return;
        };

        self.stop_active_stream().await;

        let stream_profile = profile
            .with_port(self.ctx.stream_port)
            .with_format(STREAMING_CONTAINER);
        if !self
            .outbox
            .send_flushed(Message::stream_ready(stream_profile.clone()))
            .await
        {
            warn!(peer = %self.peer, "Connection closed before the stream could start");
            return;
        }

        info!(
            peer = %self.peer,
            file = %entry.file_name,
            "Streaming {} as {}",
            variant,
            stream_profile
        );
        let completion = match self.ctx.streamer.start_stream(&variant, &stream_profile).await {
            Ok(completion) => completion,
            Err(e) => {
                error!(peer = %self.peer, "Error during streaming: {}", e);
                self.outbox
                    .send(Message::stream_error(format!("Error during streaming: {}", e)));
                return;
            }
        };

        let id = self.allocate_id();
        let cancel = CancellationToken::new();
        let observer = self.ctx.tracker.spawn(observe_stream(
            completion,
            StreamWatch {
                id,
                cancel: cancel.clone(),
                outbox: self.outbox.clone(),
                events: self.events_tx.clone(),
                peer: self.peer,
            },
        ));
        self.active = Some(ActiveStream {
            id,
            file_name: entry.file_name,
            cancel,
            observer,
        });
    }

    async fn stop_active_stream(&mut self) {
        self.discard_pending_prepare();
        let Some(active) = self.active.take() else {
            debug!(peer = %self.peer, "There is no active stream to terminate");
            return;
        };

        active.cancel.cancel();
        self.ctx.streamer.stop_stream().await;
        if let Err(e) = active.observer.await {
            warn!(peer = %self.peer, "Stream observer failed: {}", e);
        }
        info!(peer = %self.peer, file = %active.file_name, "Streaming is terminated");
    }
}

struct StreamWatch {
    id: u64,
    cancel: CancellationToken,
    outbox: Outbox,
    events: mpsc::UnboundedSender<SessionEvent>,
    peer: SocketAddr,
}

async fn observe_stream(completion: Completion, watch: StreamWatch) {
    let peer = watch.peer;
    tokio::select! {
        biased;
        _ = watch.cancel.cancelled() => return,
        outcome = completion.outcome() => match outcome {
            Ok(ExitOutcome::Terminated) => {
                info!(peer = %peer, "Stream was stopped outside this session");
            }
            Ok(outcome) => info!(peer = %peer, "Streaming has finished successfully ({:?})", outcome),
            Err(e) => {
                error!(peer = %peer, "Error during streaming: {}", e);
                watch
                    .outbox
                    .send(Message::stream_error(format!("Error during streaming: {}", e)));
            }
        },
    }
    let _ = watch.events.send(SessionEvent::StreamEnded { id: watch.id });
}
