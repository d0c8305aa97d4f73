use bytes::{BufMut, BytesMut};

use crate::codec::MessageCodec;
use crate::error::CodecError;
use crate::message::Message;

/// JSON codec.
///
/// One object per payload with the keys `stamp`, `level`, `system`,
/// `component`, `message`, plus `id` when the message carries one. The
/// timestamp is RFC 3339 text in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, msg: &Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        serde_json::to_writer(dst.writer(), msg)?;
        Ok(())
    }

    fn decode(&self, payload: &[u8]) -> Result<Message, CodecError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
