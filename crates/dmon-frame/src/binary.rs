use bytes::{Buf, BufMut, BytesMut};
use chrono::DateTime;

use crate::codec::MessageCodec;
use crate::error::CodecError;
use crate::message::{Field, Message};

/// Length of the binary timestamp: seconds (8B LE) + nanoseconds (4B LE).
pub const STAMP_LEN: usize = 12;

/// Compact binary codec.
///
/// Payload layout, no optional or reordered fields:
/// ```text
/// stamp_len (1B) | secs (i64 LE) | nanos (u32 LE)
/// len (u32 LE) | level
/// len (u32 LE) | system
/// len (u32 LE) | component
/// len (u32 LE) | message
/// ```
/// The sequence number is not carried; decoded messages have `id == None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl MessageCodec for BinaryCodec {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn encode(&self, msg: &Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let fields = msg.text_fields();
        let size = 1 + STAMP_LEN + fields.iter().map(|(_, v)| 4 + v.len()).sum::<usize>();
        dst.reserve(size);

        dst.put_u8(STAMP_LEN as u8);
        dst.put_i64_le(msg.stamp.timestamp());
        dst.put_u32_le(msg.stamp.timestamp_subsec_nanos());

        for (field, value) in fields {
            let len = u32::try_from(value.len()).map_err(|_| CodecError::FieldTooLong {
                field,
                len: value.len(),
                max: u32::MAX as usize,
            })?;
            dst.put_u32_le(len);
            dst.put_slice(value.as_bytes());
        }
        Ok(())
    }

    fn decode(&self, payload: &[u8]) -> Result<Message, CodecError> {
        let mut src = payload;

        if !src.has_remaining() {
            return Err(malformed(Field::Stamp, "missing length"));
        }
        let stamp_len = src.get_u8() as usize;
        if stamp_len != STAMP_LEN {
            return Err(malformed(Field::Stamp, "unexpected length"));
        }
        if src.remaining() < STAMP_LEN {
            return Err(malformed(Field::Stamp, "truncated value"));
        }
        let secs = src.get_i64_le();
        let nanos = src.get_u32_le();
        let stamp = DateTime::from_timestamp(secs, nanos)
            .ok_or_else(|| malformed(Field::Stamp, "out of range"))?;

        let level = read_text(&mut src, Field::Level)?;
        let system = read_text(&mut src, Field::System)?;
        let component = read_text(&mut src, Field::Component)?;
        let message = read_text(&mut src, Field::Message)?;

        if src.has_remaining() {
            return Err(CodecError::TrailingBytes(src.remaining()));
        }

        Ok(Message {
            id: None,
            stamp,
            level,
            system,
            component,
            message,
        })
    }
}

fn read_text(src: &mut &[u8], field: Field) -> Result<String, CodecError> {
    if src.remaining() < 4 {
        return Err(malformed(field, "truncated length prefix"));
    }
    let len = src.get_u32_le() as usize;
    if src.remaining() < len {
        return Err(malformed(field, "truncated value"));
    }
    let text = std::str::from_utf8(&src[..len])
        .map_err(|_| malformed(field, "invalid utf-8"))?
        .to_owned();
    src.advance(len);
    Ok(text)
}

fn malformed(field: Field, reason: &'static str) -> CodecError {
    CodecError::Malformed { field, reason }
}
