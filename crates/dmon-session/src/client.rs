//! Sending side of a session.
//!
//! The sender writes a frame, then queues an ack token. A separate drain
//! task consumes tokens in order and reads one acknowledgment byte for each.
//! The token queue holds at most `ack_window` entries; when it is full the
//! sender flushes its buffered frames and blocks, which is the only
//! backpressure the client applies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dmon_frame::{FrameError, Message, MsgWriter};
use dmon_stats::Stats;
use dmon_transport::{BufferedChannel, DmonStream, TcpTransport};
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::ACK;

/// Timeout applied when establishing the TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Counts reported when a client session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientSummary {
    /// Frames handed to the channel.
    pub sent: u64,
    /// Frames the server acknowledged.
    pub acked: u64,
}

struct AckToken {
    sent_at: Instant,
}

/// A connected client session.
pub struct Client {
    channel: Arc<BufferedChannel>,
    stream: DmonStream,
    writer: MsgWriter,
    tokens: Option<SyncSender<AckToken>>,
    drain: Option<JoinHandle<Result<()>>>,
    acked: Arc<AtomicU64>,
    stats: Arc<Stats>,
    sent: u64,
    failed: bool,
    peer: String,
}

impl Client {
    /// Connect to a server over TCP.
    pub fn connect(addr: &str, config: &SessionConfig, stats: Arc<Stats>) -> Result<Self> {
        let stream = TcpTransport::connect(addr, Some(CONNECT_TIMEOUT))?;
        info!(
            peer = %addr,
            codec = %config.codec,
            ack_window = config.ack_window,
            tls = config.tls.is_some(),
            "connected"
        );
        Self::from_stream(stream, config, stats)
    }

    /// Start a session over an already-connected stream.
    pub fn from_stream(
        stream: DmonStream,
        config: &SessionConfig,
        stats: Arc<Stats>,
    ) -> Result<Self> {
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        let stream = match &config.tls {
            Some(connector) => connector.connect(stream)?,
            None => stream,
        };
        let peer = stream.peer_label();
        let control = stream.try_clone()?;
        let channel = Arc::new(BufferedChannel::from_stream(stream, config.buffer.clone())?);

        let (tokens, queue) = mpsc::sync_channel(config.ack_window.max(1));
        let acked = Arc::new(AtomicU64::new(0));
        let drain = {
            let channel = Arc::clone(&channel);
            let control = control.try_clone()?;
            let acked = Arc::clone(&acked);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name("dmon-ack".to_string())
                .spawn(move || drain_acks(&channel, &control, queue, &acked, &stats))?
        };

        Ok(Self {
            channel,
            stream: control,
            writer: MsgWriter::with_config(config.codec, config.frame.clone()),
            tokens: Some(tokens),
            drain: Some(drain),
            acked,
            stats,
            sent: 0,
            failed: false,
            peer,
        })
    }

    /// Send one message. Returns the frame's wire length.
    ///
    /// Blocks while `ack_window` frames are awaiting acknowledgment. After a
    /// failure the session is finished: the first call reports the cause,
    /// later calls return [`SessionError::Closed`].
    pub fn send(&mut self, msg: &Message) -> Result<usize> {
        if self.failed {
            return Err(SessionError::Closed);
        }
        match self.try_send(msg) {
            Ok(len) => Ok(len),
            Err(SessionError::Frame(err)) if !err.is_transport() => {
                // Rejected before anything reached the channel.
                Err(SessionError::Frame(err))
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn try_send(&mut self, msg: &Message) -> Result<usize> {
        let tokens = self.tokens.as_ref().ok_or(SessionError::Closed)?;
        let len = self.writer.write(&self.channel, msg)?;
        self.sent += 1;
        self.stats.record(len);
        let token = AckToken {
            sent_at: Instant::now(),
        };
        match tokens.try_send(token) {
            Ok(()) => {}
            Err(TrySendError::Full(token)) => {
                // Acks for buffered frames cannot arrive until they are sent.
                self.channel.flush().map_err(FrameError::Write)?;
                tokens.send(token).map_err(|_| SessionError::Closed)?;
            }
            Err(TrySendError::Disconnected(_)) => return Err(SessionError::Closed),
        }
        Ok(len)
    }

    /// Mark the session failed and return the most specific cause: the ack
    /// task's error if it stopped first, `err` otherwise.
    fn fail(&mut self, err: SessionError) -> SessionError {
        self.failed = true;
        let drain_stopped = self.drain.as_ref().map_or(true, JoinHandle::is_finished);
        let _ = self.stream.shutdown();
        self.tokens = None;
        match self.join_drain() {
            Err(drain_err)
                if drain_stopped
                    || !drain_err.is_transport()
                    || matches!(err, SessionError::Closed) =>
            {
                drain_err
            }
            _ => err,
        }
    }

    fn join_drain(&mut self) -> Result<()> {
        match self.drain.take() {
            Some(handle) => handle.join().unwrap_or(Err(SessionError::Closed)),
            None => Ok(()),
        }
    }

    /// Frames sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Frames acknowledged so far.
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Acquire)
    }

    /// Frames awaiting acknowledgment.
    pub fn in_flight(&self) -> u64 {
        self.sent.saturating_sub(self.acked())
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Flush pending frames, wait for every outstanding ack, then close.
    pub fn close(mut self) -> Result<ClientSummary> {
        let flushed = if self.failed {
            Err(SessionError::Closed)
        } else {
            self.channel.flush().map_err(SessionError::Ack)
        };
        self.tokens = None;

        let result = match flushed {
            Ok(()) => self.join_drain(),
            Err(err) => {
                let _ = self.stream.shutdown();
                let _ = self.join_drain();
                Err(err)
            }
        };
        let _ = self.channel.close();
        let _ = self.stream.shutdown();

        let summary = ClientSummary {
            sent: self.sent,
            acked: self.acked(),
        };
        debug!(peer = %self.peer, sent = summary.sent, acked = summary.acked, "client closed");
        result.map(|()| summary)
    }

    /// Tear the session down without waiting for acks.
    pub fn abort(mut self) -> ClientSummary {
        self.failed = true;
        let _ = self.stream.shutdown();
        self.tokens = None;
        let _ = self.join_drain();
        ClientSummary {
            sent: self.sent,
            acked: self.acked(),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.drain.is_some() {
            let _ = self.stream.shutdown();
            self.tokens = None;
            let _ = self.join_drain();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.peer)
            .field("sent", &self.sent)
            .field("acked", &self.acked())
            .field("failed", &self.failed)
            .finish()
    }
}

/// Run the ack drain until the sender hangs up or the session fails.
///
/// Any failure shuts the stream down so a sender blocked on the channel
/// wakes up; dropping the queue wakes a sender blocked on a full window.
fn drain_acks(
    channel: &BufferedChannel,
    control: &DmonStream,
    queue: Receiver<AckToken>,
    acked: &AtomicU64,
    stats: &Stats,
) -> Result<()> {
    let result = read_acks(channel, &queue, acked, stats);
    if let Err(err) = &result {
        debug!(error = %err, "ack drain stopped");
        let _ = control.shutdown();
    }
    result
}

/// Read one ack byte per queued token, in order.
fn read_acks(
    channel: &BufferedChannel,
    queue: &Receiver<AckToken>,
    acked: &AtomicU64,
    stats: &Stats,
) -> Result<()> {
    for token in queue.iter() {
        let byte = channel.read_byte().map_err(SessionError::Ack)?;
        if byte != ACK {
            return Err(SessionError::BadAck {
                expected: ACK,
                got: byte,
            });
        }
        acked.fetch_add(1, Ordering::Release);
        stats.record_latency(token.sent_at.elapsed());
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Read, Write};

    use dmon_frame::{CodecKind, MsgReader};
    use dmon_transport::BufferConfig;

    use super::*;

    fn config(ack_window: usize) -> SessionConfig {
        SessionConfig {
            codec: CodecKind::Json,
            ack_window,
            buffer: BufferConfig {
                flush_period: Some(Duration::from_millis(2)),
                ..BufferConfig::default()
            },
            ..SessionConfig::default()
        }
    }

    fn msg(i: i64) -> Message {
        Message::new("info", "dmon", "client", format!("event {i}")).with_id(i)
    }

    /// Reads `count` frames from the far end and acks each with `ack`.
    fn fake_server(stream: DmonStream, count: usize, ack: u8) -> JoinHandle<Vec<Message>> {
        thread::spawn(move || {
            let mut control = stream.try_clone().expect("stream should clone");
            let channel = BufferedChannel::from_stream(
                stream,
                BufferConfig {
                    flush_period: None,
                    ..BufferConfig::default()
                },
            )
            .expect("channel should build");
            let mut reader = MsgReader::new(CodecKind::Json);
            let mut received = Vec::new();
            for _ in 0..count {
                let (msg, _) = reader.read(&channel).expect("frame should arrive");
                received.push(msg);
                control.write_all(&[ack]).expect("ack should be written");
            }
            received
        })
    }

    #[test]
    fn every_frame_is_acknowledged() {
        let (local, remote) = DmonStream::pair().expect("pair should open");
        let server = fake_server(remote, 10, ACK);
        let stats = Arc::new(Stats::default());

        let mut client =
            Client::from_stream(local, &config(4), Arc::clone(&stats)).expect("client should start");
        for i in 0..10 {
            client.send(&msg(i)).expect("send should succeed");
        }
        let summary = client.close().expect("close should collect acks");

        assert_eq!(summary, ClientSummary { sent: 10, acked: 10 });
        let received = server.join().expect("server thread should finish");
        let ids: Vec<_> = received.iter().map(|m| m.id).collect();
        assert_eq!(ids, (0..10).map(Some).collect::<Vec<_>>());
        assert_eq!(stats.take().messages, 10);
        assert_eq!(stats.latency().samples, 10);
    }

    #[test]
    fn full_window_blocks_the_sender() {
        let (local, mut remote) = DmonStream::pair().expect("pair should open");
        let stats = Arc::new(Stats::default());
        let (done_tx, done_rx) = mpsc::channel();

        let sender = thread::spawn(move || {
            let mut client =
                Client::from_stream(local, &config(1), stats).expect("client should start");
            for i in 0..4 {
                client.send(&msg(i)).expect("send should succeed");
                done_tx.send(i).expect("test should be listening");
            }
            client.close().expect("close should collect acks")
        });

        // One token waits in the queue, one is held by the drain task.
        for expected in 0..2 {
            assert_eq!(
                done_rx.recv_timeout(Duration::from_secs(2)),
                Ok(expected)
            );
        }
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        remote.write_all(&[ACK; 4]).expect("acks should be written");
        let summary = sender.join().expect("sender should finish");
        assert_eq!(summary, ClientSummary { sent: 4, acked: 4 });
    }

    #[test]
    fn full_window_flushes_without_timer() {
        let (local, remote) = DmonStream::pair().expect("pair should open");
        let server = fake_server(remote, 10, ACK);
        let config = SessionConfig {
            buffer: BufferConfig {
                flush_period: None,
                ..BufferConfig::default()
            },
            ..config(2)
        };
        let (done_tx, done_rx) = mpsc::channel();

        thread::spawn(move || {
            let mut client = Client::from_stream(local, &config, Arc::new(Stats::default()))
                .expect("client should start");
            for i in 0..10 {
                client.send(&msg(i)).expect("send should succeed");
            }
            let _ = done_tx.send(client.close());
        });

        let summary = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("sender should not stall on a full window")
            .expect("close should collect acks");
        assert_eq!(summary, ClientSummary { sent: 10, acked: 10 });
        assert_eq!(server.join().expect("server thread should finish").len(), 10);
    }

    #[test]
    fn wrong_ack_byte_ends_the_session() {
        let (local, remote) = DmonStream::pair().expect("pair should open");
        let _server = fake_server(remote, 1, 0x15);
        let mut client = Client::from_stream(local, &config(8), Arc::new(Stats::default()))
            .expect("client should start");

        client.send(&msg(0)).expect("first send is accepted");

        let start = Instant::now();
        let err = loop {
            match client.send(&msg(1)) {
                Err(err) => break err,
                Ok(_) => {
                    assert!(start.elapsed() < Duration::from_secs(2), "failure not detected");
                    thread::sleep(Duration::from_millis(5));
                }
            }
        };
        assert!(matches!(
            err,
            SessionError::BadAck {
                expected: ACK,
                got: 0x15
            }
        ));
        assert!(matches!(client.send(&msg(2)), Err(SessionError::Closed)));
    }

    #[test]
    fn server_hangup_fails_close() {
        let (local, mut remote) = DmonStream::pair().expect("pair should open");
        let mut client = Client::from_stream(local, &config(8), Arc::new(Stats::default()))
            .expect("client should start");
        client.send(&msg(0)).expect("send should be buffered");

        let mut header = [0u8; 4];
        remote.read_exact(&mut header).expect("header should arrive");
        let mut payload = vec![0u8; u32::from_le_bytes(header) as usize];
        remote.read_exact(&mut payload).expect("payload should arrive");
        drop(remote);

        let err = client.close().expect_err("missing ack must fail close");
        assert!(matches!(
            err,
            SessionError::Ack(dmon_transport::ChannelError::Eof)
        ));
    }

    #[test]
    fn invalid_message_does_not_end_the_session() {
        let (local, remote) = DmonStream::pair().expect("pair should open");
        let server = fake_server(remote, 1, ACK);
        let mut client = Client::from_stream(local, &config(8), Arc::new(Stats::default()))
            .expect("client should start");

        let oversized = Message::new("critical", "dmon", "client", "x");
        assert!(matches!(
            client.send(&oversized),
            Err(SessionError::Frame(dmon_frame::FrameError::Encode(_)))
        ));
        client.send(&msg(1)).expect("session should still work");
        assert_eq!(
            client.close().expect("close should succeed"),
            ClientSummary { sent: 1, acked: 1 }
        );
        server.join().expect("server thread should finish");
    }
}
