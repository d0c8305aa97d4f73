//! CPU utilization sampling.
//!
//! Samples are used for display only; a failing sampler degrades the report,
//! it never affects message flow.

use std::fs;

use crate::error::{Result, StatsError};

/// Cumulative CPU tick counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    /// Ticks spent by this process (user + system).
    pub process: u64,
    /// Idle ticks of the whole machine.
    pub idle: u64,
    /// All ticks of the whole machine.
    pub total: u64,
}

/// Source of [`CpuTicks`].
pub trait UtilizationSampler: Send {
    fn sample(&mut self) -> Result<CpuTicks>;
}

/// Reads `/proc/stat` and `/proc/self/stat`.
#[derive(Debug, Default)]
pub struct ProcStatSampler {
    _private: (),
}

impl ProcStatSampler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UtilizationSampler for ProcStatSampler {
    fn sample(&mut self) -> Result<CpuTicks> {
        let system = fs::read_to_string("/proc/stat")?;
        let (idle, total) = parse_system_ticks(&system)?;
        let process = fs::read_to_string("/proc/self/stat")?;
        Ok(CpuTicks {
            process: parse_process_ticks(&process)?,
            idle,
            total,
        })
    }
}

/// Always reports zero ticks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSampler;

impl UtilizationSampler for NullSampler {
    fn sample(&mut self) -> Result<CpuTicks> {
        Ok(CpuTicks::default())
    }
}

/// The best sampler for this platform.
pub fn default_sampler() -> Box<dyn UtilizationSampler> {
    if cfg!(target_os = "linux") {
        Box::new(ProcStatSampler::new())
    } else {
        Box::new(NullSampler)
    }
}

/// `(idle, total)` from the aggregate `cpu` line of `/proc/stat`.
fn parse_system_ticks(contents: &str) -> Result<(u64, u64)> {
    let line = contents
        .lines()
        .next()
        .filter(|line| line.starts_with("cpu "))
        .ok_or(StatsError::Parse {
            source_name: "/proc/stat",
            reason: "missing aggregate cpu line",
        })?;

    let mut idle = 0u64;
    let mut total = 0u64;
    for (i, field) in line.split_whitespace().skip(1).enumerate() {
        let value: u64 = field.parse().map_err(|_| StatsError::Parse {
            source_name: "/proc/stat",
            reason: "non-numeric tick count",
        })?;
        // user nice system idle ...
        if i == 3 {
            idle = value;
        }
        total += value;
    }
    Ok((idle, total))
}

/// `utime + stime` from `/proc/<pid>/stat`.
fn parse_process_ticks(contents: &str) -> Result<u64> {
    let layout = || StatsError::Parse {
        source_name: "/proc/self/stat",
        reason: "unexpected layout",
    };
    // The command name is parenthesized and may contain spaces.
    let rest = contents
        .rfind(')')
        .map(|idx| &contents[idx + 1..])
        .ok_or_else(layout)?;
    // Fields after the name start at `state` (field 3); utime and stime are 14 and 15.
    let mut ticks = rest
        .split_whitespace()
        .skip(11)
        .take(2)
        .map(|field| field.parse::<u64>().map_err(|_| layout()));
    let utime = ticks.next().ok_or_else(layout)??;
    let stime = ticks.next().ok_or_else(layout)??;
    Ok(utime + stime)
}
