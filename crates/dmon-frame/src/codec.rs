use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use crate::binary::BinaryCodec;
use crate::error::{CodecError, FrameError, Result};
use crate::json::JsonCodec;
use crate::message::Message;

/// Frame header: payload length (4 bytes, little-endian).
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Converts a [`Message`] to and from a frame payload.
///
/// Implementations are stateless; scratch space belongs to the
/// [`MsgWriter`](crate::MsgWriter)/[`MsgReader`](crate::MsgReader) using them.
pub trait MessageCodec: Send + Sync {
    /// Short codec name for diagnostics.
    fn name(&self) -> &'static str;

    /// Append the payload for `msg` to `dst`.
    fn encode(&self, msg: &Message, dst: &mut BytesMut) -> std::result::Result<(), CodecError>;

    /// Decode one complete payload.
    fn decode(&self, payload: &[u8]) -> std::result::Result<Message, CodecError>;
}

/// The codec a deployment uses. Both ends must agree on it out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecKind {
    #[default]
    Binary,
    Json,
}

impl CodecKind {
    /// Instantiate the codec.
    pub fn codec(self) -> Box<dyn MessageCodec> {
        match self {
            CodecKind::Binary => Box::new(BinaryCodec),
            CodecKind::Json => Box::new(JsonCodec),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CodecKind::Binary => "binary",
            CodecKind::Json => "json",
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for frame writers and readers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Encode a message as a complete frame appended to `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────────┬─────────────────────────┐
/// │ Length (4B)  │ Payload                 │
/// │ u32 LE       │ (Length bytes, codec)   │
/// └──────────────┴─────────────────────────┘
/// ```
///
/// Returns the wire length of the frame (header + payload). On error `dst`
/// is left as it was.
pub fn encode_frame(
    codec: &dyn MessageCodec,
    msg: &Message,
    max_payload: usize,
    dst: &mut BytesMut,
) -> Result<usize> {
    msg.validate().map_err(FrameError::Encode)?;

    let start = dst.len();
    dst.put_u32_le(0);
    if let Err(err) = codec.encode(msg, dst) {
        dst.truncate(start);
        return Err(FrameError::Encode(err));
    }

    let payload_len = dst.len() - start - HEADER_SIZE;
    let max = max_payload.min(u32::MAX as usize);
    if payload_len > max {
        dst.truncate(start);
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max,
        });
    }

    dst[start..start + HEADER_SIZE].copy_from_slice(&(payload_len as u32).to_le_bytes());
    Ok(HEADER_SIZE + payload_len)
}

/// Parse a frame header and check the announced length against `max_payload`.
pub fn decode_header(header: [u8; HEADER_SIZE], max_payload: usize) -> Result<usize> {
    let payload_len = u32::from_le_bytes(header) as usize;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }
    Ok(payload_len)
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` until the header and all of its payload bytes are
/// present. On success the frame is consumed and its wire length returned.
pub fn decode_frame(
    codec: &dyn MessageCodec,
    src: &mut BytesMut,
    max_payload: usize,
) -> Result<Option<(Message, usize)>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&src[..HEADER_SIZE]);
    let payload_len = decode_header(header, max_payload)?;

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len);
    let msg = codec.decode(&payload).map_err(FrameError::Decode)?;
    Ok(Some((msg, total)))
}
