//! Process Metrics
//!
//! Fixed catalog of process-level gauges, refreshed on every scrape.

use crate::domain::value_objects::MetricKind;
use crate::error::MetricsError;
use crate::infrastructure::metrics::MetricsRegistry;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const PROCESS_START_TIME_SECONDS: &str = "process_start_time_seconds";
pub const PROCESS_UPTIME_SECONDS: &str = "process_uptime_seconds";
pub const PROCESS_RESIDENT_MEMORY_BYTES: &str = "process_resident_memory_bytes";
pub const PROCESS_OPEN_FDS: &str = "process_open_fds";

const CATALOG: [(&str, &str); 4] = [
    (
        PROCESS_START_TIME_SECONDS,
        "Start time of the process since unix epoch in seconds.",
    ),
    (PROCESS_UPTIME_SECONDS, "Seconds since the process started."),
    (
        PROCESS_RESIDENT_MEMORY_BYTES,
        "Resident memory size in bytes.",
    ),
    (PROCESS_OPEN_FDS, "Number of open file descriptors."),
];

/// Samples process gauges into a registry.
pub struct ProcessCollector {
    started_at: Instant,
    start_time_seconds: f64,
}

impl ProcessCollector {
    /// Register the catalog gauges and return a collector for them.
    pub fn register(registry: &MetricsRegistry) -> Result<Self, MetricsError> {
        for (name, help) in CATALOG {
            registry.register(name, MetricKind::Gauge, help, &[], None)?;
        }

        let start_time_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let collector = Self {
            started_at: Instant::now(),
            start_time_seconds: start_time_seconds.floor(),
        };
        collector.refresh(registry);
        Ok(collector)
    }

    /// Update every catalog gauge. Errors are logged, never returned.
    pub fn refresh(&self, registry: &MetricsRegistry) {
        let samples = [
            (PROCESS_START_TIME_SECONDS, self.start_time_seconds),
            (
                PROCESS_UPTIME_SECONDS,
                self.started_at.elapsed().as_secs_f64(),
            ),
            (
                PROCESS_RESIDENT_MEMORY_BYTES,
                resident_memory_bytes().unwrap_or(0) as f64,
            ),
            (PROCESS_OPEN_FDS, open_fds().unwrap_or(0) as f64),
        ];

        for (name, value) in samples {
            if let Err(e) = registry.set(name, &[], value) {
                tracing::warn!(metric = name, error = %e, "failed to refresh process metric");
            }
        }
    }
}

/// Resident set size from the `VmRSS` line of `/proc/self/status`.
fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

/// `VmRSS:     1234 kB` is reported in KiB regardless of the page size.
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let mut fields = line["VmRSS:".len()..].split_whitespace();
    let value: u64 = fields.next()?.parse().ok()?;
    match fields.next() {
        Some("kB") | None => Some(value * 1024),
        Some(_) => None,
    }
}

fn open_fds() -> Option<usize> {
    std::fs::read_dir("/proc/self/fd").ok().map(|dir| dir.count())
}
