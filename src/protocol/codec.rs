//! Length-delimited JSON framing for [`Message`]s

use std::io;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::{Message, ProtocolError};

/// Largest accepted frame; a video list of a large library stays far below this
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Codec that turns 4-byte length-prefixed frames into messages.
///
/// A frame that fails to decode yields `Some(Err(..))` instead of a codec
/// error, so a single bad message never tears down the connection.
#[derive(Debug)]
pub struct MessageCodec {
    frames: LengthDelimitedCodec,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(MAX_FRAME_LENGTH)
                .new_codec(),
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Result<Message, ProtocolError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frames.decode(src)? {
            Some(frame) => Ok(Some(Message::from_json(&frame))),
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = item
            .to_json()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.frames.encode(Bytes::from(json), dst)
    }
}
