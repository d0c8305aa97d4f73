use std::io::ErrorKind;
use std::sync::Arc;

/// Errors that can occur while establishing or configuring a stream.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The address cannot be used as a connection target.
    #[error("invalid address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: &'static str },

    /// rustls rejected the configuration or the session setup.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// A certificate, key or CA file could not be used.
    #[error("cannot load {what} from {path}: {reason}")]
    TlsMaterial {
        what: &'static str,
        path: String,
        reason: String,
    },

    /// The TLS handshake failed, including when the peer's certificate
    /// is not trusted.
    #[error("tls handshake with {peer} failed: {source}")]
    Handshake {
        peer: String,
        source: std::io::Error,
    },
}

impl TransportError {
    /// The underlying I/O error kind, if any.
    pub fn io_kind(&self) -> Option<ErrorKind> {
        match self {
            TransportError::Bind { source, .. }
            | TransportError::Connect { source, .. }
            | TransportError::Accept(source)
            | TransportError::Io(source)
            | TransportError::Handshake { source, .. } => Some(source.kind()),
            TransportError::InvalidAddress { .. }
            | TransportError::Tls(_)
            | TransportError::TlsMaterial { .. } => None,
        }
    }
}

/// Errors recorded by a [`BufferedChannel`](crate::BufferedChannel).
///
/// Once recorded, the same error is returned by every later call on that
/// direction of the channel, so it must be cheap to clone.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// Writing buffered bytes to the stream failed.
    #[error("flush failed: {0}")]
    Flush(Arc<std::io::Error>),

    /// Refilling the receive buffer from the stream failed.
    #[error("fill failed: {0}")]
    Fill(Arc<std::io::Error>),

    /// The peer closed its side of the stream.
    #[error("end of stream")]
    Eof,

    /// The channel was closed locally.
    #[error("channel closed")]
    Closed,
}

impl ChannelError {
    pub(crate) fn flush(err: std::io::Error) -> Self {
        ChannelError::Flush(Arc::new(err))
    }

    pub(crate) fn fill(err: std::io::Error) -> Self {
        ChannelError::Fill(Arc::new(err))
    }

    /// The underlying I/O error kind, if the error came from the stream.
    pub fn io_kind(&self) -> Option<ErrorKind> {
        match self {
            ChannelError::Flush(err) | ChannelError::Fill(err) => Some(err.kind()),
            ChannelError::Eof => Some(ErrorKind::UnexpectedEof),
            ChannelError::Closed => None,
        }
    }

    /// True when a read or write deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.io_kind(),
            Some(ErrorKind::TimedOut) | Some(ErrorKind::WouldBlock)
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
