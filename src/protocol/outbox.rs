//! Single-writer mailbox for one connection

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedWrite;
use tracing::{debug, error};

use super::{Message, MessageCodec};

enum Outgoing {
    Message(Message),
    Flushed(Message, oneshot::Sender<()>),
    Close,
}

/// Cloneable handle used to queue messages for a connection.
///
/// Messages are written in the order they were queued by a single
/// [`OutboxWriter`], so tasks never write to the socket concurrently.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outgoing>,
}

/// Task body that owns the write half of a connection
pub struct OutboxWriter<W> {
    rx: mpsc::UnboundedReceiver<Outgoing>,
    sink: FramedWrite<W, MessageCodec>,
    label: String,
}

impl Outbox {
    /// Create an outbox over `writer`. The returned writer must be spawned.
    pub fn new<W>(writer: W, label: impl Into<String>) -> (Outbox, OutboxWriter<W>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = OutboxWriter {
            rx,
            sink: FramedWrite::new(writer, MessageCodec::new()),
            label: label.into(),
        };
        (Outbox { tx }, writer)
    }

    /// Queue a message. Returns `false` once the connection is gone.
    pub fn send(&self, message: Message) -> bool {
        self.tx.send(Outgoing::Message(message)).is_ok()
    }

    /// Queue a message and wait until it has been written and flushed
    pub async fn send_flushed(&self, message: Message) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Outgoing::Flushed(message, ack_tx)).is_err() {
            return false;
        }
        ack_rx.await.is_ok()
    }

    /// Flush what is queued, then shut down the write half
    pub fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }
}

impl<W> OutboxWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Write queued messages until closed, the socket fails, or every
    /// [`Outbox`] handle is dropped
    pub async fn run(mut self) {
        while let Some(outgoing) = self.rx.recv().await {
            match outgoing {
                Outgoing::Message(message) => {
                    if let Err(e) = self.write(message).await {
                        error!(peer = %self.label, "Error during sending the message: {}", e);
                        break;
                    }
                }
                Outgoing::Flushed(message, ack) => {
                    if let Err(e) = self.write(message).await {
                        error!(peer = %self.label, "Error during sending the message: {}", e);
                        break;
                    }
                    let _ = ack.send(());
                }
                Outgoing::Close => break,
            }
        }

        self.rx.close();
        if let Err(e) = self.sink.close().await {
            debug!(peer = %self.label, "Error while closing the connection: {}", e);
        }
    }

    async fn write(&mut self, message: Message) -> std::io::Result<()> {
        debug!(peer = %self.label, "Sending {}", message);
        self.sink.send(message).await
    }
}
