//! Mutually authenticated TLS for [`DmonStream`].
//!
//! Both ends present a certificate signed by a CA the other side trusts.
//! After the handshake the result is an ordinary `DmonStream`, so the layers
//! above never see whether a connection is encrypted.
//!
//! A session reads and writes the same stream from different threads. The
//! rustls connection sits behind a lock that is held only while records are
//! decrypted or encrypted; socket I/O happens outside it, so a reader blocked
//! on the network never stalls a writer.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{
    ClientConfig, ClientConnection, Connection, RootCertStore, ServerConfig, ServerConnection,
};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::stream::DmonStream;

/// Ciphertext read from the socket per refill. Kept below the rustls
/// plaintext limit so one refill can always be processed.
const RAW_READ_SIZE: usize = 8 * 1024;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client configuration from PEM files: our certificate chain, its private
/// key, and the CA bundle that signs server certificates.
pub fn client_config(cert: &Path, key: &Path, ca: &Path) -> Result<ClientConfig> {
    let roots = load_roots(ca)?;
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_client_auth_cert(load_certs(cert)?, load_key(key)?)?;
    Ok(config)
}

/// Server configuration from PEM files. Clients must present a certificate
/// signed by a CA in `ca`.
pub fn server_config(cert: &Path, key: &Path, ca: &Path) -> Result<ServerConfig> {
    let provider = provider();
    let verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(load_roots(ca)?), Arc::clone(&provider))
            .build()
            .map_err(|err| material("CA certificates", ca, err))?;
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(load_certs(cert)?, load_key(key)?)?;
    Ok(config)
}

fn material(what: &'static str, path: &Path, reason: impl fmt::Display) -> TransportError {
    TransportError::TlsMaterial {
        what,
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|certs| certs.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(|err| material("certificates", path, err))?;
    if certs.is_empty() {
        return Err(material("certificates", path, "no PEM certificates found"));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_file(path).map_err(|err| material("private key", path, err))
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(load_certs(path)?);
    if added == 0 {
        return Err(material("CA certificates", path, "no usable CA certificates"));
    }
    if ignored > 0 {
        debug!(path = %path.display(), ignored, "skipped unparsable CA certificates");
    }
    Ok(roots)
}

/// Wraps outgoing connections in TLS.
#[derive(Clone)]
pub struct TlsConnector {
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

impl TlsConnector {
    /// `server_name` must match a name in the server's certificate.
    pub fn new(config: Arc<ClientConfig>, server_name: &str) -> Result<Self> {
        let server_name = ServerName::try_from(server_name.to_string()).map_err(|_| {
            TransportError::InvalidAddress {
                addr: server_name.to_string(),
                reason: "not a valid TLS server name",
            }
        })?;
        Ok(Self {
            config,
            server_name,
        })
    }

    /// Run the client handshake over a connected stream.
    pub fn connect(&self, stream: DmonStream) -> Result<DmonStream> {
        let conn = ClientConnection::new(Arc::clone(&self.config), self.server_name.clone())?;
        TlsStream::handshake(Connection::Client(conn), stream).map(DmonStream::from_tls)
    }
}

impl fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnector")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Wraps accepted connections in TLS.
#[derive(Clone)]
pub struct TlsAcceptor {
    config: Arc<ServerConfig>,
}

impl TlsAcceptor {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    /// Run the server handshake over an accepted stream. Fails if the client
    /// does not present a trusted certificate.
    pub fn accept(&self, stream: DmonStream) -> Result<DmonStream> {
        let conn = ServerConnection::new(Arc::clone(&self.config))?;
        TlsStream::handshake(Connection::Server(conn), stream).map(DmonStream::from_tls)
    }
}

impl fmt::Debug for TlsAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsAcceptor").finish_non_exhaustive()
    }
}

struct TlsShared {
    conn: Mutex<Connection>,
    /// Held from encryption until the records reach the socket, so records
    /// from different clones go out in sequence order.
    write_order: Mutex<()>,
}

impl TlsShared {
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_order(&self) -> MutexGuard<'_, ()> {
        self.write_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// An established TLS session over a socket. Clones share the session and
/// each own a clone of the socket.
pub(crate) struct TlsStream {
    socket: Box<DmonStream>,
    shared: Arc<TlsShared>,
}

impl TlsStream {
    fn handshake(mut conn: Connection, mut socket: DmonStream) -> Result<Self> {
        let peer = socket.peer_label();
        let handshake_failed = |source: io::Error| TransportError::Handshake {
            peer: peer.clone(),
            source,
        };
        while conn.is_handshaking() {
            conn.complete_io(&mut socket).map_err(handshake_failed)?;
        }
        while conn.wants_write() {
            conn.write_tls(&mut socket).map_err(handshake_failed)?;
        }
        socket.flush().map_err(handshake_failed)?;
        debug!(peer = %peer, "tls handshake complete");

        Ok(Self {
            socket: Box::new(socket),
            shared: Arc::new(TlsShared {
                conn: Mutex::new(conn),
                write_order: Mutex::new(()),
            }),
        })
    }

    pub(crate) fn socket(&self) -> &DmonStream {
        &self.socket
    }

    pub(crate) fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            socket: Box::new(self.socket.try_clone()?),
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Encrypted records waiting to be sent.
fn drain_records(conn: &mut Connection) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    while conn.wants_write() {
        conn.write_tls(&mut out)?;
    }
    Ok(out)
}

/// Plaintext read after the socket reached end of stream.
fn read_after_eof(conn: &mut Connection, buf: &mut [u8]) -> io::Result<usize> {
    conn.read_tls(&mut io::empty())?;
    match conn.reader().read(buf) {
        // A peer that drops the socket without close_notify still ends the
        // stream; frames carry their own length, so a cut frame is caught above.
        Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::UnexpectedEof) => {
            Ok(0)
        }
        other => other,
    }
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut raw = [0u8; RAW_READ_SIZE];
        loop {
            match self.shared.conn().reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(0),
                Err(err) => return Err(err),
            }

            let n = self.socket.read(&mut raw)?;
            let mut conn = self.shared.conn();
            if n == 0 {
                return read_after_eof(&mut conn, buf);
            }
            let mut incoming = &raw[..n];
            while !incoming.is_empty() {
                conn.read_tls(&mut incoming)?;
                conn.process_new_packets()
                    .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
            }
        }
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _order = self.shared.write_order();
        let (n, records) = {
            let mut conn = self.shared.conn();
            let n = conn.writer().write(buf)?;
            (n, drain_records(&mut conn)?)
        };
        self.socket.write_all(&records)?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let _order = self.shared.write_order();
        let records = drain_records(&mut self.shared.conn())?;
        self.socket.write_all(&records)?;
        self.socket.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::path::PathBuf;
    use std::thread;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use rcgen::{
        BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
        ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
    };

    use super::*;
    use crate::{BufferConfig, BufferedChannel, TcpTransport};

    struct Authority {
        cert: Certificate,
        key: KeyPair,
    }

    impl Authority {
        fn new(name: &str) -> Self {
            let key = KeyPair::generate().expect("ca key should generate");
            let mut params =
                CertificateParams::new(Vec::<String>::new()).expect("ca params should build");
            params.distinguished_name = DistinguishedName::new();
            params.distinguished_name.push(DnType::CommonName, name);
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::DigitalSignature];
            let cert = params.self_signed(&key).expect("ca should self-sign");
            Self { cert, key }
        }

        /// PEM certificate and key for `name`, signed by this authority.
        fn issue(&self, name: &str, usage: ExtendedKeyUsagePurpose) -> (String, String) {
            let key = KeyPair::generate().expect("leaf key should generate");
            let mut params =
                CertificateParams::new(vec![name.to_string()]).expect("leaf params should build");
            params.distinguished_name = DistinguishedName::new();
            params.distinguished_name.push(DnType::CommonName, name);
            params.extended_key_usages = vec![usage];
            let cert = params
                .signed_by(&key, &self.cert, &self.key)
                .expect("leaf should be signed");
            (cert.pem(), key.serialize_pem())
        }
    }

    struct Pki {
        dir: PathBuf,
    }

    impl Pki {
        /// Server and client credentials from one CA, plus a client signed
        /// by a CA nobody trusts.
        fn new(tag: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "dmon-tls-{}-{}-{}",
                tag,
                std::process::id(),
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .expect("time should be after epoch")
                    .as_nanos()
            ));
            std::fs::create_dir_all(&dir).expect("temp dir should be creatable");

            let ca = Authority::new("dmon test ca");
            let rogue = Authority::new("dmon rogue ca");
            let write = |name: &str, contents: &str| {
                std::fs::write(dir.join(name), contents).expect("pem should be written");
            };
            write("ca.pem", &ca.cert.pem());
            let (cert, key) = ca.issue("localhost", ExtendedKeyUsagePurpose::ServerAuth);
            write("server.pem", &cert);
            write("server.key", &key);
            let (cert, key) = ca.issue("client", ExtendedKeyUsagePurpose::ClientAuth);
            write("client.pem", &cert);
            write("client.key", &key);
            let (cert, key) = rogue.issue("client", ExtendedKeyUsagePurpose::ClientAuth);
            write("rogue.pem", &cert);
            write("rogue.key", &key);
            Self { dir }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.join(name)
        }

        fn acceptor(&self) -> TlsAcceptor {
            let config = server_config(
                &self.path("server.pem"),
                &self.path("server.key"),
                &self.path("ca.pem"),
            )
            .expect("server config should load");
            TlsAcceptor::new(Arc::new(config))
        }

        fn connector(&self, identity: &str) -> TlsConnector {
            let config = client_config(
                &self.path(&format!("{identity}.pem")),
                &self.path(&format!("{identity}.key")),
                &self.path("ca.pem"),
            )
            .expect("client config should load");
            TlsConnector::new(Arc::new(config), "localhost").expect("server name should parse")
        }
    }

    impl Drop for Pki {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn no_timer() -> BufferConfig {
        BufferConfig {
            flush_period: None,
            ..BufferConfig::default()
        }
    }

    #[test]
    fn mutual_tls_carries_bytes_both_ways() {
        let pki = Pki::new("roundtrip");
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let addr = listener.local_addr().expect("listener should have an address");
        let acceptor = pki.acceptor();

        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().expect("connection should arrive");
            let mut stream = acceptor
                .accept(DmonStream::from_tcp(socket))
                .expect("server handshake should succeed");
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).expect("ping should arrive");
            assert_eq!(&buf, b"ping");
            stream.write_all(b"pong").expect("pong should be written");
            stream.flush().expect("pong should be flushed");
        });

        let socket = TcpTransport::connect(&addr.to_string(), Some(Duration::from_secs(2)))
            .expect("tcp should connect");
        let mut stream = pki
            .connector("client")
            .connect(socket)
            .expect("client handshake should succeed");
        stream.write_all(b"ping").expect("ping should be written");
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).expect("pong should arrive");
        assert_eq!(&buf, b"pong");
        server.join().expect("server thread should finish");
    }

    #[test]
    fn buffered_channel_runs_over_tls() {
        let pki = Pki::new("channel");
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let addr = listener.local_addr().expect("listener should have an address");
        let acceptor = pki.acceptor();
        let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();

        let echo = thread::spawn(move || {
            let (socket, _) = listener.accept().expect("connection should arrive");
            let stream = acceptor
                .accept(DmonStream::from_tcp(socket))
                .expect("server handshake should succeed");
            let channel =
                BufferedChannel::from_stream(stream, no_timer()).expect("channel should build");
            let mut buf = [0u8; 1000];
            loop {
                match channel.read(&mut buf) {
                    Ok(n) => {
                        channel.write(&buf[..n]).expect("echo should be buffered");
                        channel.flush().expect("echo should be flushed");
                    }
                    Err(_) => return,
                }
            }
        });

        let socket = TcpTransport::connect(&addr.to_string(), Some(Duration::from_secs(2)))
            .expect("tcp should connect");
        let stream = pki
            .connector("client")
            .connect(socket)
            .expect("client handshake should succeed");
        let channel = Arc::new(
            BufferedChannel::from_stream(stream.try_clone().expect("stream should clone"), no_timer())
                .expect("channel should build"),
        );

        let reader = {
            let channel = Arc::clone(&channel);
            let len = payload.len();
            thread::spawn(move || {
                let mut echoed = vec![0u8; len];
                channel.read_full(&mut echoed).map(|()| echoed)
            })
        };
        for chunk in payload.chunks(700) {
            channel.write(chunk).expect("chunk should be accepted");
        }
        channel.flush().expect("payload should be flushed");

        let echoed = reader
            .join()
            .expect("reader thread should finish")
            .expect("echo should arrive in full");
        assert_eq!(echoed, payload);

        stream.shutdown().expect("shutdown should succeed");
        echo.join().expect("echo thread should finish");
    }

    #[test]
    fn client_from_untrusted_ca_is_rejected() {
        let pki = Pki::new("rogue");
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let addr = listener.local_addr().expect("listener should have an address");
        let acceptor = pki.acceptor();

        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().expect("connection should arrive");
            acceptor.accept(DmonStream::from_tcp(socket))
        });

        let socket = TcpTransport::connect(&addr.to_string(), Some(Duration::from_secs(2)))
            .expect("tcp should connect");
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("timeout should apply");
        // The client may finish its half before the server rejects it.
        let client = pki.connector("rogue").connect(socket);

        let err = server
            .join()
            .expect("server thread should finish")
            .expect_err("untrusted client must not complete the handshake");
        assert!(matches!(err, TransportError::Handshake { .. }));
        drop(client);
    }

    #[test]
    fn missing_key_file_is_reported() {
        let pki = Pki::new("missing");
        let err = client_config(
            &pki.path("client.pem"),
            &pki.path("absent.key"),
            &pki.path("ca.pem"),
        )
        .expect_err("missing key must fail");
        assert!(matches!(
            err,
            TransportError::TlsMaterial {
                what: "private key",
                ..
            }
        ));
    }
}
