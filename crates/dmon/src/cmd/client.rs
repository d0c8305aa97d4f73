use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dmon_frame::Message;
use dmon_session::{Producer, ProducerSummary, RetryPolicy, SessionConfig};
use dmon_stats::{default_sampler, Reporter, Stats};
use dmon_transport::{tls, TlsConnector};
use tracing::info;

use crate::cmd::{install_ctrlc_handler, parse_duration, ClientArgs};
use crate::exit::{io_error, session_error, transport_error, CliResult, SUCCESS};

pub fn run(args: ClientArgs) -> CliResult<i32> {
    let _span = tracing::info_span!("client").entered();

    let config = SessionConfig {
        ack_window: args.ack_window,
        tls: connector(&args)?,
        ..args.channel.session_config()?
    };
    let stats_period = parse_duration(&args.channel.stats_period)?;
    let policy = retry_policy(args.retry);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let stats = Arc::new(Stats::default());
    let reporter = Reporter::spawn(Arc::clone(&stats), stats_period, default_sampler())
        .map_err(|err| io_error("stats reporter failed", err))?;

    let mut producer = Producer::new(args.addr.as_str(), config, policy, stats);
    let mut seq: u64 = 0;
    while running.load(Ordering::SeqCst) && args.count.is_none_or(|count| seq < count) {
        let msg = Message::new(
            args.level.as_str(),
            args.system.as_str(),
            args.component.as_str(),
            args.message.as_str(),
        )
        .with_id(seq as i64);

        if let Err(err) = producer.send(&msg) {
            print_summary(&producer.summary());
            return Err(session_error("send failed", err));
        }
        seq += 1;
    }

    let result = producer.finish();
    reporter.stop();
    let summary = result.map_err(|err| session_error("close failed", err))?;

    info!(
        sent = summary.sent,
        acked = summary.acked,
        dropped = summary.dropped,
        reconnects = summary.reconnects,
        "client finished"
    );
    print_summary(&summary);
    Ok(SUCCESS)
}

fn connector(args: &ClientArgs) -> CliResult<Option<TlsConnector>> {
    let Some(files) = args.channel.tls_files() else {
        return Ok(None);
    };
    let config = tls::client_config(files.cert, files.key, files.ca)
        .map_err(|err| transport_error("tls setup failed", err))?;
    let connector = TlsConnector::new(Arc::new(config), args.server_name())
        .map_err(|err| transport_error("tls setup failed", err))?;
    Ok(Some(connector))
}

fn retry_policy(retries: u32) -> RetryPolicy {
    if retries == 0 {
        RetryPolicy::FailFast
    } else {
        RetryPolicy::backoff(retries)
    }
}

fn print_summary(summary: &ProducerSummary) {
    let value = serde_json::json!({
        "sent": summary.sent,
        "acked": summary.acked,
        "dropped": summary.dropped,
        "reconnects": summary.reconnects,
    });
    println!("{value}");
}
