use std::fmt;
use std::io;

use dmon_frame::FrameError;
use dmon_session::{SessionError, SinkError};
use dmon_transport::{ChannelError, TransportError};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PROTOCOL_ERROR: i32 = 4;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

fn io_code(kind: io::ErrorKind) -> i32 {
    match kind {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => TRANSPORT_ERROR,
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => FAILURE,
        _ => INTERNAL,
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(io_code(err.kind()), format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match &err {
        TransportError::Handshake { source, .. } => match io_code(source.kind()) {
            TIMEOUT => TIMEOUT,
            _ => TRANSPORT_ERROR,
        },
        TransportError::Tls(_) => DATA_INVALID,
        other => other.io_kind().map_or(USAGE, io_code),
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    let code = match &err {
        ChannelError::Eof => TRANSPORT_ERROR,
        ChannelError::Closed => FAILURE,
        other => other.io_kind().map_or(TRANSPORT_ERROR, io_code),
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Read { source, .. } | FrameError::Write(source) => {
            channel_error(context, source)
        }
        FrameError::Closed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        FrameError::PayloadTooLarge { .. } | FrameError::Encode(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::Decode(_) => CliError::new(PROTOCOL_ERROR, format!("{context}: {err}")),
    }
}

pub fn sink_error(context: &str, err: SinkError) -> CliError {
    match err {
        SinkError::Io(source) => io_error(context, source),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Transport(err) => transport_error(context, err),
        SessionError::Frame(err) => frame_error(context, err),
        SessionError::Ack(err) => channel_error(context, err),
        SessionError::BadAck { .. } => CliError::new(PROTOCOL_ERROR, format!("{context}: {err}")),
        SessionError::Closed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        SessionError::Sink(err) => sink_error(context, err),
        SessionError::Io(err) => io_error(context, err),
    }
}
