use std::time::Duration;

use dmon_frame::{CodecKind, FrameConfig};
use dmon_transport::{BufferConfig, TlsAcceptor, TlsConnector};

/// Default depth of the client's pending-ack queue.
pub const DEFAULT_ACK_WINDOW: usize = 5000;

/// Default depth of the server's hand-off queue to the sink.
pub const DEFAULT_HANDOFF_DEPTH: usize = 5000;

/// Default time the hand-off queue may stay idle before the sink is flushed.
pub const DEFAULT_IDLE_FLUSH: Duration = Duration::from_secs(1);

/// Per-connection settings shared by clients and servers.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Payload codec. Both ends must use the same one.
    pub codec: CodecKind,
    /// Send/receive buffering.
    pub buffer: BufferConfig,
    /// Frame limits.
    pub frame: FrameConfig,
    /// Frames a client may have in flight before blocking for an ack.
    pub ack_window: usize,
    /// Read deadline on the stream. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Write deadline on the stream. `None` waits forever.
    pub write_timeout: Option<Duration>,
    /// Client side: run a TLS handshake before the first frame.
    pub tls: Option<TlsConnector>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            codec: CodecKind::default(),
            buffer: BufferConfig::default(),
            frame: FrameConfig::default(),
            ack_window: DEFAULT_ACK_WINDOW,
            read_timeout: None,
            write_timeout: None,
            tls: None,
        }
    }
}

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub session: SessionConfig,
    /// Capacity of the queue between connection tasks and the sink.
    /// Connection tasks block while it is full.
    pub handoff_depth: usize,
    /// Flush the sink once no message arrived for this long.
    pub idle_flush: Duration,
    /// Require TLS with a trusted client certificate on every connection.
    pub tls: Option<TlsAcceptor>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            handoff_depth: DEFAULT_HANDOFF_DEPTH,
            idle_flush: DEFAULT_IDLE_FLUSH,
            tls: None,
        }
    }
}
