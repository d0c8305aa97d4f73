//! Consumers of received messages.
//!
//! The server hands every decoded message to a single [`Sink`] from one
//! dedicated task, so implementations need no internal locking.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use dmon_frame::Message;
use tracing::{debug, warn};

/// Default number of messages written per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Errors reported by sinks.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The sink refused the message or batch.
    #[error("rejected: {0}")]
    Rejected(String),

    /// A whole batch was lost; `messages` counts every message in it.
    #[error("batch of {messages} messages dropped: {source}")]
    BatchDropped {
        messages: u64,
        source: Box<SinkError>,
    },
}

impl SinkError {
    /// Messages lost to this failure, when the sink knows the count.
    pub fn dropped(&self) -> Option<u64> {
        match self {
            SinkError::BatchDropped { messages, .. } => Some(*messages),
            _ => None,
        }
    }
}

/// Destination of received messages.
pub trait Sink: Send {
    /// One-time preparation, run before the first message is inserted.
    fn setup(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn insert(&mut self, msg: Message) -> Result<(), SinkError>;

    /// Push out anything held back. Called when the hand-off queue goes
    /// idle and at shutdown.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn setup(&mut self) -> Result<(), SinkError> {
        (**self).setup()
    }

    fn insert(&mut self, msg: Message) -> Result<(), SinkError> {
        (**self).insert(msg)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// Counts messages and drops them.
#[derive(Debug, Default)]
pub struct DiscardSink {
    count: u64,
}

impl DiscardSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Sink for DiscardSink {
    fn insert(&mut self, _msg: Message) -> Result<(), SinkError> {
        self.count += 1;
        Ok(())
    }
}

/// Logs each message at debug level.
#[derive(Debug, Default)]
pub struct LogSink;

impl Sink for LogSink {
    fn insert(&mut self, msg: Message) -> Result<(), SinkError> {
        debug!(
            stamp = %msg.stamp,
            level = %msg.level,
            system = %msg.system,
            component = %msg.component,
            "{}",
            msg.message
        );
        Ok(())
    }
}

/// Writes a batch of messages in one operation.
pub trait BatchWriter: Send {
    fn setup(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn write_batch(&mut self, batch: &[Message]) -> Result<(), SinkError>;
}

/// Groups messages into batches of up to `batch_size` for a [`BatchWriter`].
///
/// A batch is written when it is full or when the sink is flushed. A failed
/// batch is dropped, not retried.
#[derive(Debug)]
pub struct BatchSink<W> {
    writer: W,
    batch: Vec<Message>,
    batch_size: usize,
    written: u64,
    dropped: u64,
}

impl<W: BatchWriter> BatchSink<W> {
    pub fn new(writer: W, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            writer,
            batch: Vec::with_capacity(batch_size),
            batch_size,
            written: 0,
            dropped: 0,
        }
    }

    /// Messages written successfully so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Messages lost to failed batches.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Messages waiting for the next batch.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }
}

impl<W: BatchWriter> Sink for BatchSink<W> {
    fn setup(&mut self) -> Result<(), SinkError> {
        self.writer.setup()
    }

    fn insert(&mut self, msg: Message) -> Result<(), SinkError> {
        self.batch.push(msg);
        if self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let len = self.batch.len() as u64;
        let result = self.writer.write_batch(&self.batch);
        self.batch.clear();
        match result {
            Ok(()) => {
                self.written += len;
                Ok(())
            }
            Err(err) => {
                self.dropped += len;
                warn!(error = %err, messages = len, "batch write failed; batch dropped");
                Err(SinkError::BatchDropped {
                    messages: len,
                    source: Box::new(err),
                })
            }
        }
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonLinesWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
}

impl JsonLinesWriter {
    /// The file is opened (created if missing) by [`BatchWriter::setup`].
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            out: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn out(&mut self) -> Result<&mut BufWriter<File>, SinkError> {
        if self.out.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.out = Some(BufWriter::new(file));
        }
        self.out
            .as_mut()
            .ok_or_else(|| SinkError::Rejected("output file unavailable".to_string()))
    }
}

impl BatchWriter for JsonLinesWriter {
    fn setup(&mut self) -> Result<(), SinkError> {
        self.out().map(|_| ())
    }

    fn write_batch(&mut self, batch: &[Message]) -> Result<(), SinkError> {
        let out = self.out()?;
        for msg in batch {
            serde_json::to_writer(&mut *out, msg)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }
}
