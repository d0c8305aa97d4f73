use std::fmt;

use dmon_transport::ChannelError;

use crate::message::Field;

/// Errors produced while converting a message to or from its payload.
///
/// Errors name the field they occurred in, never the raw bytes.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A text field exceeds its documented bound.
    #[error("{field} is {len} bytes (max {max})")]
    FieldTooLong { field: Field, len: usize, max: usize },

    /// A binary field could not be parsed.
    #[error("malformed {field}: {reason}")]
    Malformed { field: Field, reason: &'static str },

    /// Bytes remained after the last field of a binary payload.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// JSON payload could not be produced or parsed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where in a frame a read failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Header,
    Payload,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Header => f.write_str("header"),
            Phase::Payload => f.write_str("payload"),
        }
    }
}

/// Errors that can occur while writing or reading frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The channel failed while a frame was being read.
    #[error("{phase} read failed: {source}")]
    Read { phase: Phase, source: ChannelError },

    /// The channel failed while a frame was being written.
    #[error("frame write failed: {0}")]
    Write(ChannelError),

    /// The peer closed the stream between two frames.
    #[error("connection closed")]
    Closed,

    /// The length prefix exceeds the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The message could not be encoded.
    #[error("encode failed: {0}")]
    Encode(CodecError),

    /// The payload could not be decoded.
    #[error("decode failed: {0}")]
    Decode(CodecError),
}

impl FrameError {
    /// True for failures of the underlying stream (including deadlines).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FrameError::Read { .. } | FrameError::Write(_) | FrameError::Closed
        )
    }

    /// True when a read or write deadline expired.
    pub fn is_timeout(&self) -> bool {
        match self {
            FrameError::Read { source, .. } | FrameError::Write(source) => source.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
