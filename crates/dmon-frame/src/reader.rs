use std::io::{Read, Write};

use dmon_transport::{BufferedChannel, ChannelError};
use tracing::trace;

use crate::codec::{decode_header, CodecKind, FrameConfig, MessageCodec, HEADER_SIZE};
use crate::error::{FrameError, Phase, Result};
use crate::message::Message;

const INITIAL_SCRATCH_SIZE: usize = 256;

/// Reads complete frames from a channel and decodes them.
///
/// A frame is returned only once all of its payload bytes have arrived;
/// the call blocks until then.
pub struct MsgReader {
    codec: Box<dyn MessageCodec>,
    scratch: Vec<u8>,
    config: FrameConfig,
}

impl MsgReader {
    /// Create a reader for `kind` with default configuration.
    pub fn new(kind: CodecKind) -> Self {
        Self::with_config(kind, FrameConfig::default())
    }

    /// Create a reader with explicit configuration.
    pub fn with_config(kind: CodecKind, config: FrameConfig) -> Self {
        Self {
            codec: kind.codec(),
            scratch: vec![0u8; INITIAL_SCRATCH_SIZE],
            config,
        }
    }

    /// Read and decode the next frame. Returns the message and the frame's
    /// wire length (header + payload).
    ///
    /// End of stream before the first header byte is [`FrameError::Closed`];
    /// anywhere else it is a read error tagged with its phase.
    pub fn read<R: Read, W: Write>(
        &mut self,
        channel: &BufferedChannel<R, W>,
    ) -> Result<(Message, usize)> {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = channel.read_byte().map_err(|err| match err {
            ChannelError::Eof => FrameError::Closed,
            source => FrameError::Read {
                phase: Phase::Header,
                source,
            },
        })?;
        channel
            .read_full(&mut header[1..])
            .map_err(|source| FrameError::Read {
                phase: Phase::Header,
                source,
            })?;

        let payload_len = decode_header(header, self.config.max_payload_size)?;
        if payload_len > self.scratch.len() {
            self.scratch.resize(payload_len, 0);
        }

        let payload = &mut self.scratch[..payload_len];
        channel
            .read_full(payload)
            .map_err(|source| FrameError::Read {
                phase: Phase::Payload,
                source,
            })?;

        let msg = self.codec.decode(payload).map_err(FrameError::Decode)?;
        trace!(payload_len, codec = self.codec.name(), "frame read");
        Ok((msg, HEADER_SIZE + payload_len))
    }

    /// Current size of the payload scratch buffer.
    pub fn scratch_len(&self) -> usize {
        self.scratch.len()
    }

    /// Update maximum payload size for subsequent frames.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl std::fmt::Debug for MsgReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgReader")
            .field("codec", &self.codec.name())
            .field("config", &self.config)
            .finish()
    }
}
