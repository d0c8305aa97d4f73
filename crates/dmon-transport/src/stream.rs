use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::Result;
use crate::tls::TlsStream;

/// A connected byte stream: implements Read + Write.
///
/// Sessions only ever see this type. Whatever authentication the deployment
/// needs, including a TLS handshake, has already happened by the time a
/// `DmonStream` exists.
pub struct DmonStream {
    inner: StreamInner,
}

enum StreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    Tls(TlsStream),
}

impl Read for DmonStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            StreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.read(buf),
            StreamInner::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for DmonStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            StreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.write(buf),
            StreamInner::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            StreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.flush(),
            StreamInner::Tls(stream) => stream.flush(),
        }
    }
}

impl DmonStream {
    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: StreamInner::Tcp(stream),
        }
    }

    /// Wrap a connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: StreamInner::Unix(stream),
        }
    }

    pub(crate) fn from_tls(stream: TlsStream) -> Self {
        Self {
            inner: StreamInner::Tls(stream),
        }
    }

    /// True once a TLS session wraps the stream.
    pub fn is_tls(&self) -> bool {
        matches!(self.inner, StreamInner::Tls(_))
    }

    /// A connected pair of local streams.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            StreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            StreamInner::Tls(stream) => stream.socket().set_read_timeout(timeout),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            StreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            StreamInner::Tls(stream) => stream.socket().set_write_timeout(timeout),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            StreamInner::Tcp(stream) => StreamInner::Tcp(stream.try_clone()?),
            #[cfg(unix)]
            StreamInner::Unix(stream) => StreamInner::Unix(stream.try_clone()?),
            StreamInner::Tls(stream) => StreamInner::Tls(stream.try_clone()?),
        };
        Ok(Self { inner })
    }

    /// Close both directions.
    ///
    /// Any read or write blocked on this stream, or on a clone of it, returns
    /// immediately. Shutting down an already closed stream is not an error.
    /// A TLS stream closes its socket without sending close_notify.
    pub fn shutdown(&self) -> Result<()> {
        let result = match &self.inner {
            StreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
            StreamInner::Tls(stream) => return stream.socket().shutdown(),
        };
        match result {
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            other => other.map_err(Into::into),
        }
    }

    /// Human-readable peer label for diagnostics.
    pub fn peer_label(&self) -> String {
        match &self.inner {
            StreamInner::Tcp(stream) => stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "tcp:unknown".to_string()),
            #[cfg(unix)]
            StreamInner::Unix(_) => "unix".to_string(),
            StreamInner::Tls(stream) => stream.socket().peer_label(),
        }
    }
}

impl std::fmt::Debug for DmonStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            StreamInner::Tcp(_) => f.debug_struct("DmonStream").field("type", &"tcp").finish(),
            #[cfg(unix)]
            StreamInner::Unix(_) => f.debug_struct("DmonStream").field("type", &"unix").finish(),
            StreamInner::Tls(_) => f.debug_struct("DmonStream").field("type", &"tls").finish(),
        }
    }
}
