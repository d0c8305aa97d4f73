use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dmon_frame::Message;
use dmon_stats::Stats;
use tracing::{error, info, warn};

use crate::client::{Client, ClientSummary};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};

/// What a [`Producer`] does when its session fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Report the failure to the caller; the producer is done.
    #[default]
    FailFast,
    /// Drop the message whose send failed, then reconnect with exponential
    /// backoff, giving up after `max_attempts` consecutive failed connects.
    Backoff {
        max_attempts: u32,
        initial: Duration,
        max: Duration,
    },
}

impl RetryPolicy {
    /// Backoff with defaults suited to a long-lived producer.
    pub fn backoff(max_attempts: u32) -> Self {
        RetryPolicy::Backoff {
            max_attempts,
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
        }
    }

    /// Delay before connect attempt `attempt` (1-based), or `None` when no
    /// attempt is left.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match *self {
            RetryPolicy::FailFast => (attempt <= 1).then_some(Duration::ZERO),
            RetryPolicy::Backoff {
                max_attempts,
                initial,
                max,
            } => {
                if attempt > max_attempts.max(1) {
                    return None;
                }
                if attempt <= 1 {
                    return Some(Duration::ZERO);
                }
                let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
                Some(initial.saturating_mul(factor).min(max))
            }
        }
    }
}

/// Totals over every session a producer opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerSummary {
    pub sent: u64,
    pub acked: u64,
    /// Messages lost to failed sends.
    pub dropped: u64,
    /// Sessions opened after the first one.
    pub reconnects: u64,
}

/// Long-lived sender that owns the connection and applies a [`RetryPolicy`].
///
/// Delivery is at most once: frames in flight when a session fails are not
/// resent.
#[derive(Debug)]
pub struct Producer {
    addr: String,
    config: SessionConfig,
    policy: RetryPolicy,
    stats: Arc<Stats>,
    client: Option<Client>,
    sessions: u64,
    summary: ProducerSummary,
}

impl Producer {
    /// Create a producer. The first connection is made on the first send.
    pub fn new(
        addr: impl Into<String>,
        config: SessionConfig,
        policy: RetryPolicy,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            addr: addr.into(),
            config,
            policy,
            stats,
            client: None,
            sessions: 0,
            summary: ProducerSummary::default(),
        }
    }

    /// Send one message, connecting first if needed.
    ///
    /// Under [`RetryPolicy::Backoff`] a failed send drops the message and
    /// returns `Ok(false)`; the next call reconnects.
    pub fn send(&mut self, msg: &Message) -> Result<bool> {
        let client = self.client()?;
        match client.send(msg) {
            Ok(_) => Ok(true),
            Err(SessionError::Frame(err)) if !err.is_transport() => Err(SessionError::Frame(err)),
            Err(err) => {
                self.retire_client();
                self.summary.dropped += 1;
                match self.policy {
                    RetryPolicy::FailFast => {
                        error!(peer = %self.addr, error = %err, "session failed");
                        Err(err)
                    }
                    RetryPolicy::Backoff { .. } => {
                        warn!(peer = %self.addr, error = %err, "session failed; message dropped");
                        Ok(false)
                    }
                }
            }
        }
    }

    /// Close the current session, waiting for outstanding acks.
    pub fn finish(mut self) -> Result<ProducerSummary> {
        let result = match self.client.take() {
            Some(client) => client.close().map(|summary| self.absorb(summary)),
            None => Ok(()),
        };
        result.map(|()| self.summary)
    }

    pub fn summary(&self) -> ProducerSummary {
        let mut summary = self.summary;
        if let Some(client) = &self.client {
            summary.sent += client.sent();
            summary.acked += client.acked();
        }
        summary
    }

    fn client(&mut self) -> Result<&mut Client> {
        if self.client.is_none() {
            let client = self.connect()?;
            self.client = Some(client);
        }
        self.client.as_mut().ok_or(SessionError::Closed)
    }

    fn connect(&mut self) -> Result<Client> {
        let mut attempt = 1u32;
        loop {
            let Some(delay) = self.policy.delay(attempt) else {
                return Err(SessionError::Closed);
            };
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            match Client::connect(&self.addr, &self.config, Arc::clone(&self.stats)) {
                Ok(client) => {
                    if self.sessions > 0 {
                        self.summary.reconnects += 1;
                        info!(peer = %self.addr, attempt, "reconnected");
                    }
                    self.sessions += 1;
                    return Ok(client);
                }
                Err(err) if self.policy.delay(attempt + 1).is_some() => {
                    warn!(peer = %self.addr, attempt, error = %err, "connect failed; retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn retire_client(&mut self) {
        if let Some(client) = self.client.take() {
            let summary = client.abort();
            self.absorb(summary);
        }
    }

    fn absorb(&mut self, summary: ClientSummary) {
        self.summary.sent += summary.sent;
        self.summary.acked += summary.acked;
    }
}
