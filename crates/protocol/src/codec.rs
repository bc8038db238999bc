//! Frame codecs for protocol message envelopes.
//!
//! The realtime client is codec-agnostic: it hands envelopes to a [`Codec`]
//! and ships the resulting [`Frame`] over whatever transport is in use.

use serde::{Deserialize, Serialize};

use crate::envelope::ProtocolMessage;

/// Wire format negotiated with the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Json,
    MsgPack,
}

impl WireFormat {
    /// Value of the `format` query parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            WireFormat::Json => "json",
            WireFormat::MsgPack => "msgpack",
        }
    }

    /// Returns the codec for this format.
    pub fn codec(self) -> Box<dyn Codec> {
        match self {
            WireFormat::Json => Box::new(JsonCodec),
            WireFormat::MsgPack => Box::new(MsgPackCodec),
        }
    }
}

/// One transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(t) => t.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors from encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("unexpected {0} frame")]
    UnexpectedFrame(&'static str),
}

/// Serializes envelopes to frames and back.
pub trait Codec: Send + Sync {
    fn format(&self) -> WireFormat;

    fn encode(&self, message: &ProtocolMessage) -> Result<Frame, CodecError>;

    fn decode(&self, frame: &Frame) -> Result<ProtocolMessage, CodecError>;
}

/// JSON text frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Json
    }

    fn encode(&self, message: &ProtocolMessage) -> Result<Frame, CodecError> {
        Ok(Frame::Text(serde_json::to_string(message)?))
    }

    fn decode(&self, frame: &Frame) -> Result<ProtocolMessage, CodecError> {
        match frame {
            Frame::Text(text) => Ok(serde_json::from_str(text)?),
            Frame::Binary(bytes) => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

/// MessagePack binary frames with named fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn format(&self) -> WireFormat {
        WireFormat::MsgPack
    }

    fn encode(&self, message: &ProtocolMessage) -> Result<Frame, CodecError> {
        Ok(Frame::Binary(rmp_serde::to_vec_named(message)?))
    }

    fn decode(&self, frame: &Frame) -> Result<ProtocolMessage, CodecError> {
        match frame {
            Frame::Binary(bytes) => Ok(rmp_serde::from_slice(bytes)?),
            Frame::Text(_) => Err(CodecError::UnexpectedFrame("text")),
        }
    }
}
