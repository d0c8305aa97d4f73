use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use dmon_frame::CodecKind;
use dmon_session::{SessionConfig, DEFAULT_ACK_WINDOW, DEFAULT_BATCH_SIZE, DEFAULT_HANDOFF_DEPTH};
use dmon_transport::{BufferConfig, DEFAULT_BUFFER_SIZE};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};

pub mod client;
pub mod server;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and hand received messages to a sink.
    Server(ServerArgs),
    /// Connect to a server and send messages.
    Client(ClientArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Server(args) => server::run(args),
        Command::Client(args) => client::run(args),
        Command::Version(args) => version::run(args),
    }
}

/// Payload codec. Both ends must use the same one.
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub enum CodecArg {
    #[default]
    Binary,
    Json,
}

impl From<CodecArg> for CodecKind {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::Binary => CodecKind::Binary,
            CodecArg::Json => CodecKind::Json,
        }
    }
}

/// Flags shared by both roles.
#[derive(Args, Debug)]
pub struct ChannelArgs {
    /// Payload codec.
    #[arg(long, value_enum, default_value_t = CodecArg::Binary)]
    pub codec: CodecArg,
    /// Capacity of each direction's buffer in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,
    /// Background flush period (e.g. 10ms, 1s).
    #[arg(long, value_name = "DURATION", default_value = "10ms")]
    pub flush_period: String,
    /// Interval between stats reports (e.g. 5s, 500ms).
    #[arg(long, value_name = "DURATION", default_value = "5s")]
    pub stats_period: String,
    /// Fail a read that waits longer than this. Default: wait forever.
    #[arg(long, value_name = "DURATION")]
    pub read_timeout: Option<String>,
    /// Fail a write that waits longer than this. Default: wait forever.
    #[arg(long, value_name = "DURATION")]
    pub write_timeout: Option<String>,
    /// PEM certificate chain presented to the peer; enables mutual TLS.
    #[arg(long, value_name = "FILE", requires = "key", requires = "ca")]
    pub cert: Option<PathBuf>,
    /// PEM private key for --cert.
    #[arg(long, value_name = "FILE", requires = "cert")]
    pub key: Option<PathBuf>,
    /// PEM CA bundle that must have signed the peer's certificate.
    #[arg(long, value_name = "FILE", requires = "cert")]
    pub ca: Option<PathBuf>,
}

impl ChannelArgs {
    pub fn buffer_config(&self) -> CliResult<BufferConfig> {
        Ok(BufferConfig {
            capacity: self.buffer_size,
            flush_period: Some(parse_duration(&self.flush_period)?),
            ..BufferConfig::default()
        })
    }

    /// Codec, buffering and deadlines. TLS is set per role.
    pub fn session_config(&self) -> CliResult<SessionConfig> {
        Ok(SessionConfig {
            codec: self.codec.into(),
            buffer: self.buffer_config()?,
            read_timeout: self.read_timeout.as_deref().map(parse_duration).transpose()?,
            write_timeout: self
                .write_timeout
                .as_deref()
                .map(parse_duration)
                .transpose()?,
            ..SessionConfig::default()
        })
    }

    /// Certificate, key and CA paths when TLS was requested.
    pub fn tls_files(&self) -> Option<TlsFiles<'_>> {
        match (&self.cert, &self.key, &self.ca) {
            (Some(cert), Some(key), Some(ca)) => Some(TlsFiles { cert, key, ca }),
            _ => None,
        }
    }
}

pub struct TlsFiles<'a> {
    pub cert: &'a Path,
    pub key: &'a Path,
    pub ca: &'a Path,
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Address to listen on (e.g. 0.0.0.0:7000).
    pub addr: String,
    #[command(flatten)]
    pub channel: ChannelArgs,
    /// Capacity of the queue between connections and the sink.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_HANDOFF_DEPTH)]
    pub queue_depth: usize,
    /// Append received messages to this file, one JSON object per line.
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
    /// Messages per write when --out is set.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
    /// Flush the sink after the queue has been idle this long.
    #[arg(long, value_name = "DURATION", default_value = "1s")]
    pub idle_flush: String,
    /// Log every received message at debug level instead of discarding it.
    #[arg(long, conflicts_with = "out")]
    pub log_messages: bool,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Server address (e.g. 127.0.0.1:7000).
    pub addr: String,
    #[command(flatten)]
    pub channel: ChannelArgs,
    /// Frames in flight before the sender waits for an ack.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_ACK_WINDOW)]
    pub ack_window: usize,
    /// Stop after sending N messages. Default: run until interrupted.
    #[arg(long, value_name = "N")]
    pub count: Option<u64>,
    /// Level of every message.
    #[arg(long, default_value = "info")]
    pub level: String,
    /// System name of every message.
    #[arg(long, default_value = "dmon")]
    pub system: String,
    /// Component name of every message.
    #[arg(long, default_value = "client")]
    pub component: String,
    /// Message text.
    #[arg(long, default_value = "heartbeat")]
    pub message: String,
    /// Reconnect up to N times with backoff when the session fails; 0 exits
    /// on the first failure.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub retry: u32,
    /// Name checked against the server certificate. Default: the host part
    /// of ADDR.
    #[arg(long, value_name = "NAME", requires = "cert")]
    pub server_name: Option<String>,
}

impl ClientArgs {
    pub fn server_name(&self) -> &str {
        if let Some(name) = &self.server_name {
            return name;
        }
        let host = self
            .addr
            .rsplit_once(':')
            .map_or(self.addr.as_str(), |(host, _)| host);
        host.trim_start_matches('[').trim_end_matches(']')
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `<digits><unit>` where unit is `us`, `ms`, `s` (the default) or `m`.
pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "us" => Ok(Duration::from_micros(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| CliError::new(USAGE, format!("duration out of range: {input}"))),
        other => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {other}"),
        )),
    }
}

/// Clears `running` on Ctrl-C.
pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    install_interrupt_hook(move || running.store(false, Ordering::SeqCst))
}

/// Runs `on_interrupt` on every Ctrl-C.
pub(crate) fn install_interrupt_hook<F>(on_interrupt: F) -> CliResult<()>
where
    F: Fn() + Send + 'static,
{
    ctrlc::set_handler(on_interrupt)
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
