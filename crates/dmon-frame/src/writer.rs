use std::io::{Read, Write};

use bytes::BytesMut;
use dmon_transport::BufferedChannel;

use crate::codec::{encode_frame, CodecKind, FrameConfig, MessageCodec};
use crate::error::{FrameError, Result};
use crate::message::Message;

const INITIAL_SCRATCH_CAPACITY: usize = 512;

/// Encodes messages into frames and writes them through a channel.
///
/// Owns a reusable scratch buffer; nothing of a message outlives the call
/// that writes it.
pub struct MsgWriter {
    codec: Box<dyn MessageCodec>,
    scratch: BytesMut,
    config: FrameConfig,
}

impl MsgWriter {
    /// Create a writer for `kind` with default configuration.
    pub fn new(kind: CodecKind) -> Self {
        Self::with_config(kind, FrameConfig::default())
    }

    /// Create a writer with explicit configuration.
    pub fn with_config(kind: CodecKind, config: FrameConfig) -> Self {
        Self {
            codec: kind.codec(),
            scratch: BytesMut::with_capacity(INITIAL_SCRATCH_CAPACITY),
            config,
        }
    }

    /// Encode `msg` into the scratch buffer and return the frame bytes.
    pub fn encode(&mut self, msg: &Message) -> Result<&[u8]> {
        self.scratch.clear();
        encode_frame(
            self.codec.as_ref(),
            msg,
            self.config.max_payload_size,
            &mut self.scratch,
        )?;
        Ok(&self.scratch)
    }

    /// Write one frame through `channel`. Returns the frame's wire length.
    ///
    /// The frame is buffered; it reaches the stream when the channel fills
    /// up, flushes on its timer, or is flushed explicitly.
    pub fn write<R: Read, W: Write>(
        &mut self,
        channel: &BufferedChannel<R, W>,
        msg: &Message,
    ) -> Result<usize> {
        let frame = self.encode(msg)?;
        let len = frame.len();
        channel.write(frame).map_err(FrameError::Write)?;
        Ok(len)
    }

    /// Name of the codec in use.
    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    /// Current writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl std::fmt::Debug for MsgWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgWriter")
            .field("codec", &self.codec.name())
            .field("config", &self.config)
            .finish()
    }
}
