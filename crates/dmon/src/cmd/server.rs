use std::sync::Arc;

use dmon_session::{BatchSink, DiscardSink, JsonLinesWriter, LogSink, Server, ServerConfig, Sink};
use dmon_stats::{default_sampler, Reporter, Stats};
use dmon_transport::{tls, TlsAcceptor};
use tracing::info;

use crate::cmd::{install_interrupt_hook, parse_duration, ServerArgs};
use crate::exit::{io_error, session_error, transport_error, CliResult, SUCCESS};

pub fn run(args: ServerArgs) -> CliResult<i32> {
    let _span = tracing::info_span!("server").entered();

    let config = ServerConfig {
        session: args.channel.session_config()?,
        handoff_depth: args.queue_depth,
        idle_flush: parse_duration(&args.idle_flush)?,
        tls: acceptor(&args)?,
    };
    let stats_period = parse_duration(&args.channel.stats_period)?;

    let server = Server::bind(&args.addr, config).map_err(|err| session_error("bind failed", err))?;
    let handle = server.shutdown_handle();
    install_interrupt_hook(move || handle.shutdown())?;

    let sink = select_sink(&args);
    let stats = Arc::new(Stats::default());
    let reporter = Reporter::spawn(Arc::clone(&stats), stats_period, default_sampler())
        .map_err(|err| io_error("stats reporter failed", err))?;

    let result = server.serve(sink, stats);
    reporter.stop();
    let summary = result.map_err(|err| session_error("serve failed", err))?;

    info!(
        connections = summary.connections,
        failed_connections = summary.failed_connections,
        received = summary.received,
        dropped = summary.dropped,
        "shutdown complete"
    );
    Ok(SUCCESS)
}

fn acceptor(args: &ServerArgs) -> CliResult<Option<TlsAcceptor>> {
    let Some(files) = args.channel.tls_files() else {
        return Ok(None);
    };
    let config = tls::server_config(files.cert, files.key, files.ca)
        .map_err(|err| transport_error("tls setup failed", err))?;
    info!(cert = %files.cert.display(), ca = %files.ca.display(), "client certificates required");
    Ok(Some(TlsAcceptor::new(Arc::new(config))))
}

fn select_sink(args: &ServerArgs) -> Box<dyn Sink> {
    match &args.out {
        Some(path) => {
            info!(path = %path.display(), batch_size = args.batch_size, "writing messages");
            Box::new(BatchSink::new(JsonLinesWriter::new(path), args.batch_size))
        }
        None if args.log_messages => Box::new(LogSink),
        None => Box::new(DiscardSink::new()),
    }
}
