//! Live statistics for dmon.
//!
//! - [`StatsWindow`] keeps a numerically stable mean/variance over the most
//!   recent `W` samples in O(1) per insert
//! - [`Stats`] is the owned, shareable set of throughput counters and the
//!   latency window that session tasks update
//! - [`Reporter`] periodically turns those counters into a [`Report`] and logs
//!   it, together with CPU utilization from a [`UtilizationSampler`]

pub mod counters;
pub mod error;
pub mod report;
pub mod sampler;
pub mod window;

pub use counters::{Counters, LatencySummary, Stats, DEFAULT_LATENCY_WINDOW};
pub use error::{Result, StatsError};
pub use report::{Report, Reporter, DEFAULT_REPORT_PERIOD};
pub use sampler::{default_sampler, CpuTicks, NullSampler, ProcStatSampler, UtilizationSampler};
pub use window::StatsWindow;
