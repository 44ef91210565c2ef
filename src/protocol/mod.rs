//! Control protocol between the streaming server and its clients
//!
//! Every message is an envelope of a [`MessageKind`] and an optional
//! [`Payload`]. Messages travel as length-delimited JSON frames (see
//! [`codec::MessageCodec`]) and all writes to one connection are serialised
//! through an [`outbox::Outbox`].

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::domain::model::{StreamProfile, VideoEntry};

pub mod codec;
pub mod outbox;

pub use codec::MessageCodec;
pub use outbox::{Outbox, OutboxWriter};

/// The closed set of message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    // Client to server
    RequestVideoList,
    RequestStreamVideo,
    ReportConnectionSpeed,
    StopStreaming,
    Disconnect,

    // Server to client
    VideoListResponse,
    StreamReady,
    StreamError,
    ServerInfo,
}

impl MessageKind {
    const ALL: [MessageKind; 9] = [
        MessageKind::RequestVideoList,
        MessageKind::RequestStreamVideo,
        MessageKind::ReportConnectionSpeed,
        MessageKind::StopStreaming,
        MessageKind::Disconnect,
        MessageKind::VideoListResponse,
        MessageKind::StreamReady,
        MessageKind::StreamError,
        MessageKind::ServerInfo,
    ];

    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::RequestVideoList => "REQUEST_VIDEO_LIST",
            MessageKind::RequestStreamVideo => "REQUEST_STREAM_VIDEO",
            MessageKind::ReportConnectionSpeed => "REPORT_CONNECTION_SPEED",
            MessageKind::StopStreaming => "STOP_STREAMING",
            MessageKind::Disconnect => "DISCONNECT",
            MessageKind::VideoListResponse => "VIDEO_LIST_RESPONSE",
            MessageKind::StreamReady => "STREAM_READY",
            MessageKind::StreamError => "STREAM_ERROR",
            MessageKind::ServerInfo => "SERVER_INFO",
        }
    }

    /// Parse a wire name; unknown names yield `None`
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

/// Kind-dependent message contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Speed(f64),
    Text(String),
    VideoList(Vec<VideoEntry>),
    Profile(StreamProfile),
}

/// Errors produced while decoding a single frame
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    #[error("malformed message: {0}")]
    Malformed(String),
}

/// A protocol message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

/// Envelope as read off the wire, before the kind is validated
#[derive(Deserialize)]
struct WireEnvelope {
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Message {
    pub fn new(kind: MessageKind, payload: Option<Payload>) -> Self {
        Self { kind, payload }
    }

    pub fn empty(kind: MessageKind) -> Self {
        Self::new(kind, None)
    }

    pub fn request_video_list() -> Self {
        Self::empty(MessageKind::RequestVideoList)
    }

    pub fn request_stream(file_name: impl Into<String>) -> Self {
        Self::new(
            MessageKind::RequestStreamVideo,
            Some(Payload::Text(file_name.into())),
        )
    }

    pub fn report_speed(speed_mbps: f64) -> Self {
        Self::new(
            MessageKind::ReportConnectionSpeed,
            Some(Payload::Speed(speed_mbps)),
        )
    }

    pub fn stop_streaming() -> Self {
        Self::empty(MessageKind::StopStreaming)
    }

    pub fn disconnect() -> Self {
        Self::empty(MessageKind::Disconnect)
    }

    pub fn video_list(entries: Vec<VideoEntry>) -> Self {
        Self::new(
            MessageKind::VideoListResponse,
            Some(Payload::VideoList(entries)),
        )
    }

    pub fn stream_ready(profile: StreamProfile) -> Self {
        Self::new(MessageKind::StreamReady, Some(Payload::Profile(profile)))
    }

    pub fn stream_error(reason: impl Into<String>) -> Self {
        Self::new(MessageKind::StreamError, Some(Payload::Text(reason.into())))
    }

    pub fn server_info(info: impl Into<String>) -> Self {
        Self::new(MessageKind::ServerInfo, Some(Payload::Text(info.into())))
    }

    /// Decode one JSON frame.
    ///
    /// An unknown kind or invalid JSON is an error; a payload of the wrong
    /// shape is dropped and the message is returned without one.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: WireEnvelope =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let kind = MessageKind::parse(&envelope.kind)
            .ok_or_else(|| ProtocolError::UnknownKind(envelope.kind.clone()))?;

        let payload = match envelope.payload {
            serde_json::Value::Null => None,
            value => match serde_json::from_value::<Payload>(value) {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(kind = kind.as_str(), "Discarding unrecognised payload: {}", e);
                    None
                }
            },
        };

        Ok(Self { kind, payload })
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// String payload, if that is what the message carries
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Some(Payload::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Numeric payload, if that is what the message carries
    pub fn speed(&self) -> Option<f64> {
        match &self.payload {
            Some(Payload::Speed(speed)) => Some(*speed),
            _ => None,
        }
    }

    pub fn video_list_payload(&self) -> Option<&[VideoEntry]> {
        match &self.payload {
            Some(Payload::VideoList(entries)) => Some(entries),
            _ => None,
        }
    }

    pub fn profile(&self) -> Option<&StreamProfile> {
        match &self.payload {
            Some(Payload::Profile(profile)) => Some(profile),
            _ => None,
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let payload = match &self.payload {
            None => "null",
            Some(Payload::Speed(_)) => "Speed",
            Some(Payload::Text(_)) => "Text",
            Some(Payload::VideoList(_)) => "VideoList",
            Some(Payload::Profile(_)) => "Profile",
        };
        write!(f, "Message{{kind={}, payload={}}}", self.kind.as_str(), payload)
    }
}
