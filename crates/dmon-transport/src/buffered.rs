//! Buffered, timer-flushed channel over a byte stream.
//!
//! Writes land in a fixed-capacity send buffer that is written to the stream
//! when it fills up or when the background flush task wakes up, whichever
//! comes first. Reads are served from a fixed-capacity receive buffer that is
//! refilled from the stream on demand.
//!
//! The two directions are guarded by independent mutexes: a reader blocked on
//! the stream never holds up a writer, and the flush task only contends with
//! writers.
//!
//! Errors are sticky per direction. Once a flush or fill fails, every later
//! call on that direction returns the same error without touching the stream.
//! The only way out is to drop the channel and build a new one on a new
//! connection.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{ChannelError, Result};
use crate::stream::DmonStream;

/// Smallest buffer capacity accepted; smaller requests are raised to this.
pub const MIN_BUFFER_SIZE: usize = 256;

/// Default capacity of each direction's buffer: 64 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default background flush period.
pub const DEFAULT_FLUSH_PERIOD: Duration = Duration::from_millis(10);

type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// What the background flush task does when writing to the stream fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// Record the error and stop on the first failure.
    #[default]
    Terminate,
    /// Keep the pending bytes and try again on the next tick. The error
    /// becomes sticky after `max_attempts` consecutive failures.
    Retry { max_attempts: u32 },
}

/// Configuration for a [`BufferedChannel`].
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Capacity of each direction's buffer. Raised to [`MIN_BUFFER_SIZE`].
    pub capacity: usize,
    /// Background flush period. `None` disables the flush task; bytes then
    /// only reach the stream when the buffer fills or on explicit flush.
    pub flush_period: Option<Duration>,
    /// Failure handling for the background flush task.
    pub flush_policy: FlushPolicy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_SIZE,
            flush_period: Some(DEFAULT_FLUSH_PERIOD),
            flush_policy: FlushPolicy::Terminate,
        }
    }
}

/// Open or closed with the error that closed it.
#[derive(Debug, Clone)]
enum ChannelState {
    Open,
    Closed(ChannelError),
}

impl ChannelState {
    fn check(&self) -> ChannelResult<()> {
        match self {
            ChannelState::Open => Ok(()),
            ChannelState::Closed(err) => Err(err.clone()),
        }
    }

    fn error(&self) -> Option<ChannelError> {
        match self {
            ChannelState::Open => None,
            ChannelState::Closed(err) => Some(err.clone()),
        }
    }
}

struct SendState<W> {
    inner: W,
    buf: Vec<u8>,
    capacity: usize,
    state: ChannelState,
    failures: u32,
}

impl<W: Write> SendState<W> {
    /// Write every pending byte to the stream.
    ///
    /// Bytes that made it out are removed from the buffer even on failure,
    /// so a retry resumes where the failed attempt stopped.
    fn write_out(&mut self) -> std::io::Result<()> {
        let mut offset = 0usize;
        let result = loop {
            if offset == self.buf.len() {
                break Ok(());
            }
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => break Err(std::io::Error::from(ErrorKind::WriteZero)),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => break Err(err),
            }
        };
        self.buf.drain(..offset);
        result?;

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Foreground flush: any failure is sticky.
    fn flush(&mut self) -> ChannelResult<()> {
        self.state.check()?;
        if self.buf.is_empty() {
            return Ok(());
        }
        if let Err(err) = self.write_out() {
            let err = ChannelError::flush(err);
            self.state = ChannelState::Closed(err.clone());
            return Err(err);
        }
        self.failures = 0;
        Ok(())
    }

    fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }
}

struct RecvState<R> {
    inner: R,
    buf: Box<[u8]>,
    beg: usize,
    end: usize,
    state: ChannelState,
}

impl<R: Read> RecvState<R> {
    /// Refill the (drained) buffer with one read from the stream.
    fn fill(&mut self) -> ChannelResult<()> {
        self.state.check()?;
        loop {
            match self.inner.read(&mut self.buf) {
                Ok(0) => {
                    self.state = ChannelState::Closed(ChannelError::Eof);
                    return Err(ChannelError::Eof);
                }
                Ok(n) => {
                    self.beg = 0;
                    self.end = n;
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    let err = ChannelError::fill(err);
                    self.state = ChannelState::Closed(err.clone());
                    return Err(err);
                }
            }
        }
    }

    fn available(&self) -> &[u8] {
        &self.buf[self.beg..self.end]
    }

    /// Copy buffered bytes into `dst`, refilling first if nothing is buffered.
    fn read_some(&mut self, dst: &mut [u8]) -> ChannelResult<usize> {
        self.state.check()?;
        if self.beg == self.end {
            self.fill()?;
        }
        let n = dst.len().min(self.end - self.beg);
        dst[..n].copy_from_slice(&self.available()[..n]);
        self.beg += n;
        Ok(n)
    }
}

struct SendShared<W> {
    state: Mutex<SendState<W>>,
    stop: AtomicBool,
}

impl<W> SendShared<W> {
    fn lock(&self) -> MutexGuard<'_, SendState<W>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A bidirectional buffered channel over a reader half and a writer half.
pub struct BufferedChannel<R = DmonStream, W = DmonStream> {
    send: Arc<SendShared<W>>,
    recv: Mutex<RecvState<R>>,
    flusher: Option<Thread>,
}

impl BufferedChannel<DmonStream, DmonStream> {
    /// Build a channel over a connected stream, splitting it into a reader
    /// and a writer clone.
    pub fn from_stream(stream: DmonStream, config: BufferConfig) -> Result<Self> {
        let reader = stream.try_clone()?;
        Self::new(reader, stream, config)
    }
}

impl<R, W> BufferedChannel<R, W>
where
    R: Read,
    W: Write + Send + 'static,
{
    /// Create a channel and start its background flush task (if configured).
    pub fn new(reader: R, writer: W, config: BufferConfig) -> Result<Self> {
        let capacity = config.capacity.max(MIN_BUFFER_SIZE);
        let send = Arc::new(SendShared {
            state: Mutex::new(SendState {
                inner: writer,
                buf: Vec::with_capacity(capacity),
                capacity,
                state: ChannelState::Open,
                failures: 0,
            }),
            stop: AtomicBool::new(false),
        });

        let flusher = match config.flush_period {
            Some(period) => {
                let shared = Arc::clone(&send);
                let policy = config.flush_policy;
                let handle = thread::Builder::new()
                    .name("dmon-flush".to_string())
                    .spawn(move || flush_loop(shared, period, policy))?;
                Some(handle.thread().clone())
            }
            None => None,
        };

        Ok(Self {
            send,
            recv: Mutex::new(RecvState {
                inner: reader,
                buf: vec![0u8; capacity].into_boxed_slice(),
                beg: 0,
                end: 0,
                state: ChannelState::Open,
            }),
            flusher,
        })
    }
}

impl<R: Read, W: Write> BufferedChannel<R, W> {
    /// Append `data` to the send buffer, flushing synchronously each time the
    /// buffer fills. Returns the number of bytes accepted, which is all of
    /// `data` unless an error is returned. Use [`write_partial`] when the
    /// accepted count matters on failure.
    ///
    /// [`write_partial`]: BufferedChannel::write_partial
    pub fn write(&self, data: &[u8]) -> ChannelResult<usize> {
        let (_, result) = self.write_partial(data);
        result.map(|()| data.len())
    }

    /// Like [`write`](BufferedChannel::write), but also reports how many
    /// bytes of `data` were buffered before a flush failed. Accepted bytes
    /// stay pending and are never reported twice.
    pub fn write_partial(&self, data: &[u8]) -> (usize, ChannelResult<()>) {
        let mut tx = self.send.lock();
        if let Err(err) = tx.state.check() {
            return (0, Err(err));
        }

        let mut accepted = 0usize;
        while accepted < data.len() {
            if tx.is_full() {
                if let Err(err) = tx.flush() {
                    return (accepted, Err(err));
                }
            }
            let room = tx.capacity - tx.buf.len();
            let n = room.min(data.len() - accepted);
            tx.buf.extend_from_slice(&data[accepted..accepted + n]);
            accepted += n;
        }
        (accepted, Ok(()))
    }

    /// Single-byte write using the same buffer and flush rule.
    pub fn write_byte(&self, byte: u8) -> ChannelResult<()> {
        let mut tx = self.send.lock();
        tx.state.check()?;
        if tx.is_full() {
            tx.flush()?;
        }
        tx.buf.push(byte);
        Ok(())
    }

    /// Write all pending bytes to the stream now.
    pub fn flush(&self) -> ChannelResult<()> {
        self.send.lock().flush()
    }

    /// Number of bytes waiting in the send buffer.
    pub fn pending(&self) -> usize {
        self.send.lock().buf.len()
    }

    /// Capacity of each direction's buffer.
    pub fn capacity(&self) -> usize {
        self.send.lock().capacity
    }

    /// Sticky error of the send direction, if any.
    pub fn write_error(&self) -> Option<ChannelError> {
        self.send.lock().state.error()
    }

    /// Read buffered bytes into `dst`, refilling from the stream when the
    /// receive buffer is empty. Returns at least one byte unless `dst` is
    /// empty or an error occurs; end of stream is [`ChannelError::Eof`].
    pub fn read(&self, dst: &mut [u8]) -> ChannelResult<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        self.lock_recv().read_some(dst)
    }

    /// Read a single byte.
    pub fn read_byte(&self) -> ChannelResult<u8> {
        let mut byte = [0u8; 1];
        self.lock_recv().read_some(&mut byte)?;
        Ok(byte[0])
    }

    /// Fill `dst` completely, blocking until enough bytes have arrived.
    pub fn read_full(&self, dst: &mut [u8]) -> ChannelResult<()> {
        let mut rx = self.lock_recv();
        let mut filled = 0usize;
        while filled < dst.len() {
            filled += rx.read_some(&mut dst[filled..])?;
        }
        Ok(())
    }

    /// Number of received bytes buffered and not yet read. Zero means the
    /// next read goes to the stream.
    pub fn readable(&self) -> usize {
        let rx = self.lock_recv();
        rx.end - rx.beg
    }

    /// Sticky error of the receive direction, if any.
    pub fn read_error(&self) -> Option<ChannelError> {
        self.lock_recv().state.error()
    }

    /// Flush what is pending, then close both directions locally.
    ///
    /// Later calls fail with [`ChannelError::Closed`] unless an earlier
    /// error was already recorded.
    pub fn close(&self) -> ChannelResult<()> {
        let result = {
            let mut tx = self.send.lock();
            let result = tx.flush();
            if tx.state.error().is_none() {
                tx.state = ChannelState::Closed(ChannelError::Closed);
            }
            result
        };
        {
            let mut rx = self.lock_recv();
            if rx.state.error().is_none() {
                rx.state = ChannelState::Closed(ChannelError::Closed);
            }
        }
        self.stop_flusher();
        result
    }

    fn lock_recv(&self) -> MutexGuard<'_, RecvState<R>> {
        self.recv.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R, W> BufferedChannel<R, W> {
    fn stop_flusher(&self) {
        self.send.stop.store(true, Ordering::Release);
        if let Some(flusher) = &self.flusher {
            flusher.unpark();
        }
    }
}

impl<R, W> Drop for BufferedChannel<R, W> {
    fn drop(&mut self) {
        self.stop_flusher();
    }
}

impl<R, W> std::fmt::Debug for BufferedChannel<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedChannel")
            .field("timer", &self.flusher.is_some())
            .finish_non_exhaustive()
    }
}

fn flush_loop<W: Write>(shared: Arc<SendShared<W>>, period: Duration, policy: FlushPolicy) {
    let mut next = Instant::now() + period;
    loop {
        if shared.stop.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now < next {
            thread::park_timeout(next - now);
            continue;
        }
        next = now + period;

        let mut tx = shared.lock();
        if tx.state.error().is_some() {
            debug!("send direction closed; flush task exiting");
            return;
        }
        if tx.buf.is_empty() {
            continue;
        }
        match tx.write_out() {
            Ok(()) => tx.failures = 0,
            Err(err) => {
                tx.failures = tx.failures.saturating_add(1);
                let exhausted = match policy {
                    FlushPolicy::Terminate => true,
                    FlushPolicy::Retry { max_attempts } => tx.failures >= max_attempts,
                };
                if exhausted {
                    warn!(error = %err, failures = tx.failures, "background flush failed");
                    tx.state = ChannelState::Closed(ChannelError::flush(err));
                    return;
                }
                debug!(
                    error = %err,
                    attempt = tx.failures,
                    "background flush failed; retrying next period"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedSink {
        bytes: Arc<Mutex<Vec<u8>>>,
    }

    impl SharedSink {
        fn len(&self) -> usize {
            self.bytes.lock().unwrap().len()
        }

        fn contents(&self) -> Vec<u8> {
            self.bytes.lock().unwrap().clone()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.bytes.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Fails the first `failures` writes, then behaves like `SharedSink`.
    #[derive(Clone)]
    struct FlakySink {
        sink: SharedSink,
        failures: Arc<AtomicUsize>,
        attempts: Arc<AtomicUsize>,
    }

    impl FlakySink {
        fn new(failures: usize) -> Self {
            Self {
                sink: SharedSink::default(),
                failures: Arc::new(AtomicUsize::new(failures)),
                attempts: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(std::io::Error::from(ErrorKind::BrokenPipe));
            }
            self.sink.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct CountingReader {
        inner: Cursor<Vec<u8>>,
        calls: Arc<AtomicUsize>,
    }

    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.read(buf)
        }
    }

    fn no_timer(capacity: usize) -> BufferConfig {
        BufferConfig {
            capacity,
            flush_period: None,
            ..BufferConfig::default()
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn minimum_capacity_is_enforced() {
        let chan = BufferedChannel::new(Cursor::new(Vec::new()), SharedSink::default(), no_timer(8))
            .unwrap();
        assert_eq!(chan.capacity(), MIN_BUFFER_SIZE);
    }

    #[test]
    fn accepted_bytes_all_reach_the_stream() {
        let sink = SharedSink::default();
        let chan =
            BufferedChannel::new(Cursor::new(Vec::new()), sink.clone(), no_timer(256)).unwrap();

        let mut expected = Vec::new();
        let mut accepted = 0usize;
        for i in 0..500u32 {
            let chunk: Vec<u8> = (0..(i % 37)).map(|b| (b ^ i) as u8).collect();
            accepted += chan.write(&chunk).unwrap();
            chan.write_byte(i as u8).unwrap();
            accepted += 1;
            expected.extend_from_slice(&chunk);
            expected.push(i as u8);
        }
        chan.flush().unwrap();

        assert_eq!(accepted, expected.len());
        assert_eq!(sink.contents(), expected);
        assert_eq!(chan.pending(), 0);
    }

    #[test]
    fn full_buffer_flushes_synchronously() {
        let sink = SharedSink::default();
        let chan =
            BufferedChannel::new(Cursor::new(Vec::new()), sink.clone(), no_timer(256)).unwrap();

        chan.write(&[7u8; 300]).unwrap();
        assert_eq!(sink.len(), 256);
        assert_eq!(chan.pending(), 44);
    }

    #[test]
    fn small_write_below_capacity_stays_buffered_without_timer() {
        let sink = SharedSink::default();
        let chan =
            BufferedChannel::new(Cursor::new(Vec::new()), sink.clone(), no_timer(1024)).unwrap();

        chan.write(b"hello").unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn timer_flushes_partial_buffer() {
        let sink = SharedSink::default();
        let cfg = BufferConfig {
            capacity: 4096,
            flush_period: Some(Duration::from_millis(20)),
            ..BufferConfig::default()
        };
        let chan = BufferedChannel::new(Cursor::new(Vec::new()), sink.clone(), cfg).unwrap();

        let start = Instant::now();
        chan.write(b"hello").unwrap();
        assert!(wait_until(Duration::from_secs(2), || sink.len() == 5));
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(sink.contents(), b"hello");
    }

    #[test]
    fn write_error_is_sticky() {
        let sink = FlakySink::new(usize::MAX);
        let chan =
            BufferedChannel::new(Cursor::new(Vec::new()), sink.clone(), no_timer(256)).unwrap();

        let err = chan.write(&[1u8; 300]).unwrap_err();
        assert!(matches!(err, ChannelError::Flush(_)));
        let attempts = sink.attempts.load(Ordering::SeqCst);

        assert!(matches!(chan.write(b"x"), Err(ChannelError::Flush(_))));
        assert!(matches!(chan.write_byte(1), Err(ChannelError::Flush(_))));
        assert!(matches!(chan.flush(), Err(ChannelError::Flush(_))));
        assert_eq!(sink.attempts.load(Ordering::SeqCst), attempts);
        assert!(chan.write_error().is_some());
    }

    #[test]
    fn background_flush_failure_terminates_send_side() {
        let sink = FlakySink::new(usize::MAX);
        let cfg = BufferConfig {
            capacity: 1024,
            flush_period: Some(Duration::from_millis(5)),
            flush_policy: FlushPolicy::Terminate,
        };
        let chan = BufferedChannel::new(Cursor::new(Vec::new()), sink.clone(), cfg).unwrap();

        chan.write(b"doomed").unwrap();
        assert!(wait_until(Duration::from_secs(2), || chan
            .write_error()
            .is_some()));
        assert!(matches!(chan.write(b"more"), Err(ChannelError::Flush(_))));
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn background_flush_retries_within_budget() {
        let sink = FlakySink::new(2);
        let cfg = BufferConfig {
            capacity: 1024,
            flush_period: Some(Duration::from_millis(5)),
            flush_policy: FlushPolicy::Retry { max_attempts: 5 },
        };
        let chan = BufferedChannel::new(Cursor::new(Vec::new()), sink.clone(), cfg).unwrap();

        chan.write(b"eventually").unwrap();
        assert!(wait_until(Duration::from_secs(2), || sink.sink.len() == 10));
        assert!(chan.write_error().is_none());
        assert_eq!(sink.sink.contents(), b"eventually");
    }

    #[test]
    fn reads_drain_buffer_before_touching_stream() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reader = CountingReader {
            inner: Cursor::new((0u8..12).collect()),
            calls: Arc::clone(&calls),
        };
        let chan = BufferedChannel::new(reader, SharedSink::default(), no_timer(256)).unwrap();

        let mut buf = [0u8; 4];
        for expected in [[0u8, 1, 2, 3], [4, 5, 6, 7], [8, 9, 10, 11]] {
            chan.read_full(&mut buf).unwrap();
            assert_eq!(buf, expected);
            assert_eq!(chan.readable(), 12 - usize::from(expected[3]) - 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn read_full_spans_multiple_fills() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let chan = BufferedChannel::new(
            Cursor::new(data.clone()),
            SharedSink::default(),
            no_timer(256),
        )
        .unwrap();

        let mut out = vec![0u8; 1000];
        chan.read_full(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn eof_is_sticky() {
        let chan =
            BufferedChannel::new(Cursor::new(vec![42u8]), SharedSink::default(), no_timer(256))
                .unwrap();

        assert_eq!(chan.read_byte().unwrap(), 42);
        assert!(matches!(chan.read_byte(), Err(ChannelError::Eof)));
        assert!(matches!(chan.read(&mut [0u8; 8]), Err(ChannelError::Eof)));
        assert!(matches!(chan.read_error(), Some(ChannelError::Eof)));
    }

    #[test]
    fn short_stream_fails_read_full() {
        let chan = BufferedChannel::new(
            Cursor::new(vec![1u8, 2, 3]),
            SharedSink::default(),
            no_timer(256),
        )
        .unwrap();

        let mut buf = [0u8; 8];
        assert!(matches!(chan.read_full(&mut buf), Err(ChannelError::Eof)));
    }

    #[test]
    fn close_flushes_then_rejects() {
        let sink = SharedSink::default();
        let chan =
            BufferedChannel::new(Cursor::new(Vec::new()), sink.clone(), no_timer(256)).unwrap();

        chan.write(b"bye").unwrap();
        chan.close().unwrap();
        assert_eq!(sink.contents(), b"bye");
        assert!(matches!(chan.write(b"x"), Err(ChannelError::Closed)));
        assert!(matches!(chan.read_byte(), Err(ChannelError::Closed)));
    }

    #[test]
    fn close_discards_unread_input() {
        let chan = BufferedChannel::new(
            Cursor::new(vec![1u8, 2, 3, 4]),
            SharedSink::default(),
            no_timer(256),
        )
        .unwrap();

        assert_eq!(chan.read_byte().unwrap(), 1);
        assert_eq!(chan.readable(), 3);
        chan.close().unwrap();
        assert!(matches!(chan.read_byte(), Err(ChannelError::Closed)));
        assert!(matches!(chan.read(&mut [0u8; 4]), Err(ChannelError::Closed)));
    }

    #[test]
    fn partial_write_reports_accepted_bytes() {
        let sink = FlakySink::new(usize::MAX);
        let chan =
            BufferedChannel::new(Cursor::new(Vec::new()), sink.clone(), no_timer(256)).unwrap();

        let (accepted, result) = chan.write_partial(&[9u8; 600]);
        assert_eq!(accepted, 256);
        assert!(matches!(result, Err(ChannelError::Flush(_))));
        assert_eq!(chan.pending(), 256);

        let (accepted, result) = chan.write_partial(b"late");
        assert_eq!(accepted, 0);
        assert!(matches!(result, Err(ChannelError::Flush(_))));
    }

    #[cfg(unix)]
    #[test]
    fn blocked_read_does_not_block_writes() {
        let (left, mut right) = DmonStream::pair().unwrap();
        let chan = Arc::new(BufferedChannel::from_stream(left, no_timer(256)).unwrap());

        let reader = {
            let chan = Arc::clone(&chan);
            thread::spawn(move || chan.read_byte())
        };

        thread::sleep(Duration::from_millis(30));
        chan.write(b"ping").unwrap();
        chan.flush().unwrap();

        let mut buf = [0u8; 4];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        right.write_all(&[9]).unwrap();
        assert_eq!(reader.join().unwrap().unwrap(), 9);
    }
}
