//! Client/server exchange of monitoring messages.
//!
//! A session is one connection: `Connected → {Send, AwaitAck}* → Closed`.
//! The client pipelines frames and reads back one [`ACK`] byte per frame;
//! the server acknowledges each frame after handing the decoded message to
//! its [`Sink`]. Closed is terminal; a new session needs a new connection.

pub mod client;
pub mod config;
pub mod error;
pub mod producer;
pub mod server;
pub mod sink;

/// The byte a server sends back for every frame it received.
pub const ACK: u8 = 0x06;

pub use client::{Client, ClientSummary, CONNECT_TIMEOUT};
pub use config::{
    ServerConfig, SessionConfig, DEFAULT_ACK_WINDOW, DEFAULT_HANDOFF_DEPTH, DEFAULT_IDLE_FLUSH,
};
pub use error::{Result, SessionError};
pub use producer::{Producer, ProducerSummary, RetryPolicy};
pub use server::{Received, ServeSummary, Server, ShutdownHandle};
pub use sink::{
    BatchSink, BatchWriter, DiscardSink, JsonLinesWriter, LogSink, Sink, SinkError,
    DEFAULT_BATCH_SIZE,
};
