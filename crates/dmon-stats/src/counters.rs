use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::window::StatsWindow;

/// Default number of latency samples kept.
pub const DEFAULT_LATENCY_WINDOW: usize = 10_000;

/// Throughput counters accumulated since the last [`Stats::take`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub messages: u64,
    pub bytes: u64,
}

/// Mean and standard deviation of the windowed latency, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySummary {
    pub samples: usize,
    pub mean_us: f64,
    pub std_dev_us: f64,
}

/// Process statistics shared by every task that moves messages.
///
/// Message and byte counters are plain atomics swapped out by the reporter;
/// the latency window lives behind a single mutex.
#[derive(Debug)]
pub struct Stats {
    messages: AtomicU64,
    bytes: AtomicU64,
    latency: Mutex<StatsWindow>,
}

impl Stats {
    pub fn new(latency_window: usize) -> Self {
        Self {
            messages: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            latency: Mutex::new(StatsWindow::new(latency_window)),
        }
    }

    /// Count one message of `wire_len` bytes.
    pub fn record(&self, wire_len: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(wire_len as u64, Ordering::Relaxed);
    }

    /// Add one round-trip latency sample.
    pub fn record_latency(&self, latency: Duration) {
        let micros = latency.as_secs_f64() * 1e6;
        self.latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(micros);
    }

    /// Swap both counters to zero and return what they held.
    pub fn take(&self) -> Counters {
        Counters {
            messages: self.messages.swap(0, Ordering::Relaxed),
            bytes: self.bytes.swap(0, Ordering::Relaxed),
        }
    }

    pub fn latency(&self) -> LatencySummary {
        let window = self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        LatencySummary {
            samples: window.len(),
            mean_us: window.average(),
            std_dev_us: window.std_dev(),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW)
    }
}
