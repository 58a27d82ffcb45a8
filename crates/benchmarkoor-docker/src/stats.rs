//! Periodic container resource sampling
//!
//! Reads the engine's stats stream and records memory, cumulative CPU
//! time and block-IO counters, tagging each sample with the executor's
//! currently active step.

use std::sync::Arc;
use std::time::Duration;

use bollard::container::{BlkioStatsEntry, Stats, StatsOptions};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::manager::ContainerManager;

/// Default sampling interval.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Shared pointer to the executor's active step.
///
/// The executor updates it as tests progress; the sampler only reads.
#[derive(Debug, Clone, Default)]
pub struct StepTracker(Arc<Mutex<Option<String>>>);

impl StepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, step: impl Into<String>) {
        *self.0.lock() = Some(step.into());
    }

    pub fn clear(&self) {
        *self.0.lock() = None;
    }

    pub fn current(&self) -> Option<String> {
        self.0.lock().clone()
    }
}

/// One timestamped resource reading.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub memory_bytes: u64,
    /// Cumulative CPU time in microseconds.
    pub cpu_total_micros: u64,
    pub blkio_read_bytes: u64,
    pub blkio_write_bytes: u64,
    pub blkio_read_ops: u64,
    pub blkio_write_ops: u64,
}

impl ResourceSample {
    fn from_stats(stats: &Stats, step: Option<String>) -> Self {
        let (read_bytes, write_bytes) =
            split_blkio(stats.blkio_stats.io_service_bytes_recursive.as_deref());
        let (read_ops, write_ops) =
            split_blkio(stats.blkio_stats.io_serviced_recursive.as_deref());
        Self {
            timestamp: Utc::now(),
            step,
            memory_bytes: stats.memory_stats.usage.unwrap_or_default(),
            cpu_total_micros: stats.cpu_stats.cpu_usage.total_usage / 1_000,
            blkio_read_bytes: read_bytes,
            blkio_write_bytes: write_bytes,
            blkio_read_ops: read_ops,
            blkio_write_ops: write_ops,
        }
    }
}

/// Sum blkio entries into (read, write). The op casing differs between
/// cgroup v1 and v2.
fn split_blkio(entries: Option<&[BlkioStatsEntry]>) -> (u64, u64) {
    let mut read = 0;
    let mut write = 0;
    for entry in entries.unwrap_or_default() {
        if entry.op.eq_ignore_ascii_case("read") {
            read += entry.value;
        } else if entry.op.eq_ignore_ascii_case("write") {
            write += entry.value;
        }
    }
    (read, write)
}

/// Follow the stats stream for `container` until cancelled or the
/// container exits, keeping at most one sample per `interval`.
pub async fn collect_samples(
    manager: &ContainerManager,
    container: &str,
    interval: Duration,
    tracker: StepTracker,
    cancel: &CancellationToken,
) -> Vec<ResourceSample> {
    let mut stream = manager.docker().stats(
        container,
        Some(StatsOptions {
            stream: true,
            one_shot: false,
        }),
    );

    let mut samples = Vec::new();
    let mut last_taken: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(stats)) => {
                    let now = tokio::time::Instant::now();
                    if last_taken.is_some_and(|taken| now - taken < interval) {
                        continue;
                    }
                    last_taken = Some(now);
                    samples.push(ResourceSample::from_stats(&stats, tracker.current()));
                }
                Some(Err(error)) => {
                    warn!(container, %error, "stats stream error");
                    break;
                }
                None => break,
            },
        }
    }
    samples
}
