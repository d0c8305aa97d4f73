//! Point-to-point transport for monitoring log messages.
//!
//! A client pipelines framed messages to a server over a buffered stream;
//! the server acknowledges each one and hands it to a sink. Both ends keep
//! throughput and latency statistics.
//!
//! # Crate Structure
//!
//! - [`transport`]: streams, the TCP listener/connector and the buffered channel
//! - [`frame`]: the message model, binary/JSON codecs and length-prefixed frames
//! - [`stats`]: sliding-window statistics and the periodic reporter
//! - [`session`]: client, producer, server and sinks

/// Re-export transport types.
pub mod transport {
    pub use dmon_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use dmon_frame::*;
}

/// Re-export statistics types.
pub mod stats {
    pub use dmon_stats::*;
}

/// Re-export session types.
pub mod session {
    pub use dmon_session::*;
}
