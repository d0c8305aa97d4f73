//! Receiving side of a session.
//!
//! One task per accepted connection reads frames, hands each decoded message
//! to a bounded queue and answers with one ack byte. A single sink task
//! drains the queue. A full queue blocks the connection tasks, and through
//! them the clients; nothing is dropped to make room.
//!
//! A failure on one connection ends that connection only.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dmon_frame::{FrameError, Message, MsgReader};
use dmon_stats::Stats;
use dmon_transport::{BufferedChannel, DmonStream, TcpTransport};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, SessionError};
use crate::sink::Sink;
use crate::ACK;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// A decoded message on its way to the sink.
#[derive(Debug, Clone)]
pub struct Received {
    pub message: Message,
    /// Length of the frame on the wire, header included.
    pub wire_len: usize,
    pub peer: SocketAddr,
}

/// Counts reported when [`Server::serve`] returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    /// Connections accepted.
    pub connections: u64,
    /// Connections that ended with an error.
    pub failed_connections: u64,
    /// Messages handed to the sink.
    pub received: u64,
    /// Messages the sink rejected.
    pub dropped: u64,
}

struct ShutdownState {
    stopping: AtomicBool,
    wake_addr: SocketAddr,
    live: Mutex<HashMap<u64, DmonStream>>,
}

impl ShutdownState {
    fn live(&self) -> MutexGuard<'_, HashMap<u64, DmonStream>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

/// Stops a running [`Server::serve`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    state: Arc<ShutdownState>,
}

impl ShutdownHandle {
    /// Stop accepting, close every live connection and let `serve` drain the
    /// hand-off queue into the sink before it returns.
    pub fn shutdown(&self) {
        if self.state.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        for stream in self.state.live().values() {
            let _ = stream.shutdown();
        }
        // Wake the accept loop.
        let _ = TcpStream::connect_timeout(&self.state.wake_addr, WAKE_TIMEOUT);
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.is_stopping()
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("stopping", &self.state.is_stopping())
            .finish()
    }
}

/// A bound server.
pub struct Server {
    transport: TcpTransport,
    config: ServerConfig,
    state: Arc<ShutdownState>,
}

impl Server {
    /// Bind the listening socket.
    pub fn bind(addr: &str, config: ServerConfig) -> Result<Self> {
        let transport = TcpTransport::bind(addr)?;
        let local = transport.local_addr();
        let state = Arc::new(ShutdownState {
            stopping: AtomicBool::new(false),
            wake_addr: wake_addr(local),
            live: Mutex::new(HashMap::new()),
        });
        Ok(Self {
            transport,
            config,
            state,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Accept and service connections until shut down.
    ///
    /// The sink is set up before the first connection is accepted and
    /// flushed after the last queued message has been inserted.
    pub fn serve<S>(&self, mut sink: S, stats: Arc<Stats>) -> Result<ServeSummary>
    where
        S: Sink + 'static,
    {
        sink.setup()?;

        let (handoff, queue) = mpsc::sync_channel(self.config.handoff_depth.max(1));
        let idle_flush = self.config.idle_flush;
        let consumer = thread::Builder::new()
            .name("dmon-sink".to_string())
            .spawn(move || consume(queue, sink, &stats, idle_flush))?;

        info!(
            addr = %self.local_addr(),
            codec = %self.config.session.codec,
            handoff_depth = self.config.handoff_depth,
            tls = self.config.tls.is_some(),
            "listening"
        );

        let failures = Arc::new(AtomicU64::new(0));
        let mut connections = 0u64;
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        while !self.state.is_stopping() {
            let (stream, peer) = match self.transport.accept() {
                Ok(accepted) => accepted,
                Err(err) => {
                    if self.state.is_stopping() {
                        break;
                    }
                    warn!(error = %err, "accept failed");
                    thread::sleep(ACCEPT_RETRY_DELAY);
                    continue;
                }
            };

            let id = connections;
            if !self.register(id, &stream) {
                let _ = stream.shutdown();
                break;
            }
            connections += 1;
            debug!(%peer, conn = id, "connection accepted");

            let spawned = {
                let handoff = handoff.clone();
                let state = Arc::clone(&self.state);
                let failures = Arc::clone(&failures);
                let config = self.config.clone();
                thread::Builder::new()
                    .name(format!("dmon-conn-{id}"))
                    .spawn(move || {
                        match serve_connection(stream, peer, &config, &handoff) {
                            Ok(frames) => debug!(%peer, conn = id, frames, "connection closed"),
                            Err(err) if state.is_stopping() => {
                                debug!(%peer, conn = id, error = %err, "connection stopped");
                            }
                            Err(err) => {
                                failures.fetch_add(1, Ordering::Relaxed);
                                warn!(%peer, conn = id, error = %err, "connection failed");
                            }
                        }
                        state.live().remove(&id);
                    })
            };
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    warn!(%peer, error = %err, "cannot spawn connection task");
                    if let Some(stream) = self.state.live().remove(&id) {
                        let _ = stream.shutdown();
                    }
                }
            }
            workers.retain(|handle| !handle.is_finished());
        }

        debug!(live = workers.len(), "draining connections");
        for handle in workers {
            let _ = handle.join();
        }
        drop(handoff);

        let (received, dropped) = consumer.join().unwrap_or((0, 0));
        let summary = ServeSummary {
            connections,
            failed_connections: failures.load(Ordering::Relaxed),
            received,
            dropped,
        };
        info!(
            connections = summary.connections,
            received = summary.received,
            dropped = summary.dropped,
            "server stopped"
        );
        Ok(summary)
    }

    /// Track a live connection so shutdown can close it. Fails once shutdown
    /// has started.
    fn register(&self, id: u64, stream: &DmonStream) -> bool {
        let mut live = self.state.live();
        if self.state.is_stopping() {
            return false;
        }
        match stream.try_clone() {
            Ok(clone) => {
                live.insert(id, clone);
                true
            }
            Err(err) => {
                warn!(error = %err, "cannot track connection");
                true
            }
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.transport.local_addr())
            .field("config", &self.config)
            .finish()
    }
}

/// Receive loop of one connection. Returns the number of frames received
/// when the peer closes the stream between frames.
fn serve_connection(
    stream: DmonStream,
    peer: SocketAddr,
    config: &ServerConfig,
    handoff: &SyncSender<Received>,
) -> Result<u64> {
    let session = &config.session;
    stream.set_read_timeout(session.read_timeout)?;
    stream.set_write_timeout(session.write_timeout)?;
    let stream = match &config.tls {
        Some(acceptor) => acceptor.accept(stream)?,
        None => stream,
    };
    let channel = BufferedChannel::from_stream(stream, session.buffer.clone())?;
    let mut reader = MsgReader::with_config(session.codec, session.frame.clone());
    let mut frames = 0u64;

    loop {
        let (message, wire_len) = match reader.read(&channel) {
            Ok(frame) => frame,
            Err(FrameError::Closed) => break,
            Err(err) => return Err(err.into()),
        };

        let received = Received {
            message,
            wire_len,
            peer,
        };
        if handoff.send(received).is_err() {
            return Err(SessionError::Closed);
        }

        channel.write_byte(ACK).map_err(SessionError::Ack)?;
        frames += 1;
        // Nothing else has arrived; send the acks now instead of waiting
        // for the flush period.
        if channel.readable() == 0 {
            channel.flush().map_err(SessionError::Ack)?;
        }
    }

    channel.close().map_err(SessionError::Ack)?;
    Ok(frames)
}

/// Sink task: insert every queued message, flushing when the queue stays
/// idle for `idle_flush` and once more after the last sender is gone.
fn consume<S: Sink>(
    queue: Receiver<Received>,
    mut sink: S,
    stats: &Stats,
    idle_flush: Duration,
) -> (u64, u64) {
    let mut received = 0u64;
    let mut dropped = 0u64;
    let mut dirty = false;

    loop {
        match queue.recv_timeout(idle_flush) {
            Ok(item) => {
                stats.record(item.wire_len);
                received += 1;
                dirty = true;
                if let Err(err) = sink.insert(item.message) {
                    dropped += err.dropped().unwrap_or(1);
                    warn!(peer = %item.peer, error = %err, "sink rejected message");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if dirty {
                    dirty = false;
                    if let Err(err) = sink.flush() {
                        dropped += err.dropped().unwrap_or(0);
                        warn!(error = %err, "sink flush failed");
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Err(err) = sink.flush() {
        dropped += err.dropped().unwrap_or(0);
        warn!(error = %err, "final sink flush failed");
    }
    (received, dropped)
}

/// Address the shutdown handle connects to in order to wake `accept`.
fn wake_addr(local: SocketAddr) -> SocketAddr {
    match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), local.port())
        }
        _ => local,
    }
}
