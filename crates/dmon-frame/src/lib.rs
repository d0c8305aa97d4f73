//! Monitoring messages and their wire framing.
//!
//! Every message travels as one frame:
//! - A 4-byte little-endian payload length
//! - The payload, produced by the deployment's codec (binary or JSON)
//!
//! The codec is fixed per deployment and never negotiated on the wire.
//! Readers only ever hand out complete frames: a frame whose payload has not
//! fully arrived is waited for, never decoded.

pub mod binary;
pub mod codec;
pub mod error;
pub mod json;
pub mod message;
pub mod reader;
pub mod writer;

pub use binary::BinaryCodec;
pub use codec::{
    decode_frame, decode_header, encode_frame, CodecKind, FrameConfig, MessageCodec,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use error::{CodecError, FrameError, Phase, Result};
pub use json::JsonCodec;
pub use message::{Field, Message};
pub use reader::MsgReader;
pub use writer::MsgWriter;
