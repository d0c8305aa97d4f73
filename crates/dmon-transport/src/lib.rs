//! Byte-stream transport for dmon.
//!
//! This is the lowest layer. It provides:
//! - [`DmonStream`], a connected bidirectional stream (TCP, or a Unix socket
//!   pair for local use), with read/write deadlines and shutdown
//! - [`TcpTransport`], the listener/connector used by servers and clients
//! - [`BufferedChannel`], which batches small writes and reads over a stream
//!   with a periodic background flush and sticky errors
//! - [`TlsConnector`] and [`TlsAcceptor`], which wrap a stream in mutually
//!   authenticated TLS
//!
//! Everything above this crate talks to the network through a
//! [`BufferedChannel`] wrapped around a [`DmonStream`].

pub mod buffered;
pub mod error;
pub mod stream;
pub mod tcp;
pub mod tls;

pub use buffered::{
    BufferConfig, BufferedChannel, FlushPolicy, DEFAULT_BUFFER_SIZE, DEFAULT_FLUSH_PERIOD,
    MIN_BUFFER_SIZE,
};
pub use error::{ChannelError, Result, TransportError};
pub use stream::DmonStream;
pub use tcp::TcpTransport;
pub use tls::{TlsAcceptor, TlsConnector};
