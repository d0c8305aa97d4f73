use dmon_frame::FrameError;
use dmon_transport::{ChannelError, TransportError};

use crate::sink::SinkError;

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error (bind, connect, accept, stream setup).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error on the message stream.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Writing or reading an acknowledgment failed.
    #[error("ack failed: {0}")]
    Ack(ChannelError),

    /// The peer sent something other than the acknowledgment byte.
    #[error("protocol violation: expected ack 0x{expected:02x}, got 0x{got:02x}")]
    BadAck { expected: u8, got: u8 },

    /// The session already ended; its cause was reported earlier.
    #[error("session closed")]
    Closed,

    /// Sink setup failed.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Spawning a session task failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// True when the cause is the stream itself rather than the protocol.
    pub fn is_transport(&self) -> bool {
        match self {
            SessionError::Transport(_) | SessionError::Ack(_) | SessionError::Io(_) => true,
            SessionError::Frame(err) => err.is_transport(),
            _ => false,
        }
    }

    /// True when a read or write deadline expired.
    pub fn is_timeout(&self) -> bool {
        match self {
            SessionError::Ack(err) => err.is_timeout(),
            SessionError::Frame(err) => err.is_timeout(),
            SessionError::Transport(err) => matches!(
                err.io_kind(),
                Some(std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock)
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
