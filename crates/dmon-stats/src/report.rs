use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::counters::{Counters, LatencySummary, Stats};
use crate::sampler::{CpuTicks, UtilizationSampler};

/// Default reporting period.
pub const DEFAULT_REPORT_PERIOD: Duration = Duration::from_secs(5);

/// Throughput and utilization over one reporting interval.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Report {
    pub messages: u64,
    pub bytes: u64,
    pub usec_per_msg: f64,
    pub bytes_per_msg: f64,
    pub khz: f64,
    pub mb_per_sec: f64,
    pub cpu_pct: f64,
    pub idle_pct: f64,
    pub latency: LatencySummary,
}

impl Report {
    /// Derive rates from the counters of an interval of length `elapsed`.
    ///
    /// Rates are zero for an empty or zero-length interval; utilization is
    /// zero when no ticks elapsed.
    pub fn compute(
        counters: Counters,
        elapsed: Duration,
        before: CpuTicks,
        after: CpuTicks,
        latency: LatencySummary,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let mut report = Report {
            messages: counters.messages,
            bytes: counters.bytes,
            latency,
            ..Report::default()
        };

        if secs > 0.0 && counters.messages > 0 {
            let rate = counters.messages as f64 / secs;
            report.usec_per_msg = 1e6 / rate;
            report.bytes_per_msg = counters.bytes as f64 / counters.messages as f64;
            report.khz = rate / 1000.0;
            report.mb_per_sec = counters.bytes as f64 / (1e6 * secs);
        }

        let total = after.total.saturating_sub(before.total);
        if total > 0 {
            let process = after.process.saturating_sub(before.process);
            let idle = after.idle.saturating_sub(before.idle);
            report.cpu_pct = 100.0 * process as f64 / total as f64;
            report.idle_pct = 100.0 * idle as f64 / total as f64;
        }
        report
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3} usec/msg, {:.3} B/msg, {:.3} kHz, {:.3} MB/s, cpu: {:.1}% idle: {:.1}%",
            self.usec_per_msg,
            self.bytes_per_msg,
            self.khz,
            self.mb_per_sec,
            self.cpu_pct,
            self.idle_pct
        )?;
        if self.latency.samples > 0 {
            write!(
                f,
                ", latency: {:.1} usec (stddev {:.1})",
                self.latency.mean_us, self.latency.std_dev_us
            )?;
        }
        Ok(())
    }
}

/// Periodic stats reporting task.
///
/// Every period it swaps out the counters of a [`Stats`], samples CPU
/// utilization and logs a [`Report`]. Dropping the reporter stops the task.
#[derive(Debug)]
pub struct Reporter {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    pub fn spawn(
        stats: Arc<Stats>,
        period: Duration,
        mut sampler: Box<dyn UtilizationSampler>,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("dmon-stats".to_string())
            .spawn(move || {
                let mut ticks = sample_or_zero(sampler.as_mut());
                let mut stamp = Instant::now();
                let mut next = stamp + period;

                while !flag.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if now < next {
                        thread::park_timeout(next - now);
                        continue;
                    }
                    next = now + period;

                    let counters = stats.take();
                    let elapsed = stamp.elapsed();
                    stamp = Instant::now();
                    let current = sample_or_zero(sampler.as_mut());

                    let report =
                        Report::compute(counters, elapsed, ticks, current, stats.latency());
                    ticks = current;
                    info!(messages = report.messages, bytes = report.bytes, "{report}");
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the task and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sample_or_zero(sampler: &mut dyn UtilizationSampler) -> CpuTicks {
    sampler.sample().unwrap_or_else(|err| {
        debug!(error = %err, "utilization sample failed");
        CpuTicks::default()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::sampler::NullSampler;

    struct CountingSampler(Arc<Mutex<u32>>);

    impl UtilizationSampler for CountingSampler {
        fn sample(&mut self) -> crate::Result<CpuTicks> {
            let mut calls = self.0.lock().unwrap();
            *calls += 1;
            Ok(CpuTicks {
                process: u64::from(*calls) * 10,
                idle: u64::from(*calls) * 50,
                total: u64::from(*calls) * 100,
            })
        }
    }

    #[test]
    fn computes_rates_over_the_interval() {
        let report = Report::compute(
            Counters {
                messages: 2000,
                bytes: 100_000,
            },
            Duration::from_secs(2),
            CpuTicks {
                process: 100,
                idle: 1000,
                total: 2000,
            },
            CpuTicks {
                process: 125,
                idle: 1050,
                total: 2100,
            },
            LatencySummary::default(),
        );

        assert!((report.usec_per_msg - 1000.0).abs() < 1e-9);
        assert!((report.bytes_per_msg - 50.0).abs() < 1e-9);
        assert!((report.khz - 1.0).abs() < 1e-9);
        assert!((report.mb_per_sec - 0.05).abs() < 1e-9);
        assert!((report.cpu_pct - 25.0).abs() < 1e-9);
        assert!((report.idle_pct - 50.0).abs() < 1e-9);
        assert_eq!(
            report.to_string(),
            "1000.000 usec/msg, 50.000 B/msg, 1.000 kHz, 0.050 MB/s, cpu: 25.0% idle: 50.0%"
        );
    }

    #[test]
    fn idle_interval_reports_zeroes() {
        let report = Report::compute(
            Counters::default(),
            Duration::from_secs(5),
            CpuTicks::default(),
            CpuTicks::default(),
            LatencySummary::default(),
        );
        assert_eq!(report.usec_per_msg, 0.0);
        assert_eq!(report.bytes_per_msg, 0.0);
        assert_eq!(report.cpu_pct, 0.0);
    }

    #[test]
    fn latency_is_appended_when_sampled() {
        let report = Report::compute(
            Counters::default(),
            Duration::from_secs(1),
            CpuTicks::default(),
            CpuTicks::default(),
            LatencySummary {
                samples: 3,
                mean_us: 150.0,
                std_dev_us: 12.5,
            },
        );
        assert!(report
            .to_string()
            .ends_with("latency: 150.0 usec (stddev 12.5)"));
    }

    #[test]
    fn reporter_swaps_counters_each_period() {
        let stats = Arc::new(Stats::default());
        let calls = Arc::new(Mutex::new(0));
        let reporter = Reporter::spawn(
            Arc::clone(&stats),
            Duration::from_millis(10),
            Box::new(CountingSampler(Arc::clone(&calls))),
        )
        .unwrap();

        stats.record(64);
        let start = Instant::now();
        while *calls.lock().unwrap() < 3 && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }
        reporter.stop();

        assert!(*calls.lock().unwrap() >= 3);
        assert_eq!(stats.take(), Counters::default());
    }

    #[test]
    fn dropping_reporter_stops_it_promptly() {
        let reporter = Reporter::spawn(
            Arc::new(Stats::default()),
            Duration::from_secs(3600),
            Box::new(NullSampler),
        )
        .unwrap();

        let start = Instant::now();
        drop(reporter);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
