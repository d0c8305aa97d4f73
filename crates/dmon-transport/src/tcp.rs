use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::DmonStream;

/// TCP transport.
///
/// Provides bind/accept on the collector side and connect on the sender side.
/// Accepted and connected streams have Nagle's algorithm disabled: batching is
/// the job of [`BufferedChannel`](crate::BufferedChannel), not the kernel.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on `addr` (`host:port`; port 0 picks a free port).
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;

        info!(%local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<(DmonStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%peer, error = %err, "could not disable nagle");
        }
        debug!(%peer, "accepted connection");
        Ok((DmonStream::from_tcp(stream), peer))
    }

    /// Connect to a listening collector (blocking).
    ///
    /// Unspecified addresses (`0.0.0.0`, `::`) are only meaningful for
    /// listening and are rejected here. With `timeout` set, each resolved
    /// address gets that long to complete the TCP handshake.
    pub fn connect(addr: &str, timeout: Option<Duration>) -> Result<DmonStream> {
        let candidates: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| TransportError::Connect {
                addr: addr.to_string(),
                source: e,
            })?
            .collect();

        if candidates.is_empty() {
            return Err(TransportError::InvalidAddress {
                addr: addr.to_string(),
                reason: "address did not resolve",
            });
        }
        if candidates.iter().any(|c| c.ip().is_unspecified()) {
            return Err(TransportError::InvalidAddress {
                addr: addr.to_string(),
                reason: "unspecified address cannot be a connection target",
            });
        }

        let mut last_err = None;
        for candidate in &candidates {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(candidate, timeout),
                None => TcpStream::connect(candidate),
            };
            match attempt {
                Ok(stream) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(peer = %candidate, error = %err, "could not disable nagle");
                    }
                    info!(peer = %candidate, "connected");
                    return Ok(DmonStream::from_tcp(stream));
                }
                Err(err) => {
                    debug!(peer = %candidate, error = %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(TransportError::Connect {
            addr: addr.to_string(),
            source: last_err.unwrap_or_else(|| std::io::Error::other("no address attempted")),
        })
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}
