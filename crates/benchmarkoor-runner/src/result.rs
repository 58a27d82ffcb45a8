//! Run and per-test result model
//!
//! `result.json` carries the aggregated per-test stats; the raw per-call
//! duration and status arrays go to each test's details file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;

/// Run lifecycle status; monotonic toward a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    ContainerDied,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::ContainerDied)
    }
}

/// Aggregated `result.json` for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_end: Option<DateTime<Utc>>,
    pub suite_hash: String,
    pub instance_id: String,
    pub client: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
    pub tests: Vec<TestResult>,
}

/// Aggregated per-test stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub path: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    /// Wall-clock time of the measured test phase.
    pub test_duration_ns: u64,
    pub steps: BTreeMap<String, StepResult>,
    /// Client-reported block metrics, embedded verbatim when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_log: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub duration_ns: u64,
    pub methods: BTreeMap<String, MethodStats>,
}

/// Latency aggregate for one RPC method within one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodStats {
    pub count: u64,
    pub last_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: u64,
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
}

impl MethodStats {
    /// Aggregate from raw latencies; `None` for an empty set.
    pub fn from_latencies(latencies: &[u64]) -> Option<Self> {
        let last = *latencies.last()?;
        let mut sorted = latencies.to_vec();
        sorted.sort_unstable();

        let count = sorted.len() as u64;
        let sum: u64 = sorted.iter().sum();
        Some(Self {
            count,
            last_ns: last,
            min_ns: sorted[0],
            max_ns: sorted[sorted.len() - 1],
            mean_ns: sum / count,
            p50_ns: percentile(&sorted, 0.50),
            p95_ns: percentile(&sorted, 0.95),
            p99_ns: percentile(&sorted, 0.99),
        })
    }
}

fn percentile(sorted: &[u64], quantile: f64) -> u64 {
    let index = (sorted.len() as f64 * quantile).ceil() as usize;
    sorted[index.saturating_sub(1).min(sorted.len() - 1)]
}

/// Raw per-call arrays persisted as `{test_path}.result-details.json`.
///
/// `durations_ns` and `status` stay parallel; an entry succeeds iff its
/// status is 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestDetails {
    pub steps: BTreeMap<String, StepDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepDetails {
    pub durations_ns: Vec<u64>,
    pub status: Vec<i32>,
}

impl StepDetails {
    pub fn all_succeeded(&self) -> bool {
        self.status.iter().all(|&status| status == 0)
    }
}

/// Accumulates one step's calls, then splits into the aggregate and the
/// raw arrays at a single append point so the arrays cannot diverge.
pub(crate) struct StepRecorder {
    started: Instant,
    durations_ns: Vec<u64>,
    status: Vec<i32>,
    method_latencies: BTreeMap<String, Vec<u64>>,
}

impl StepRecorder {
    pub(crate) fn start() -> Self {
        Self {
            started: Instant::now(),
            durations_ns: Vec::new(),
            status: Vec::new(),
            method_latencies: BTreeMap::new(),
        }
    }

    pub(crate) fn record(&mut self, method: &str, duration_ns: u64, ok: bool) {
        self.durations_ns.push(duration_ns);
        self.status.push(i32::from(!ok));
        self.method_latencies
            .entry(method.to_string())
            .or_default()
            .push(duration_ns);
    }

    pub(crate) fn finish(self) -> (StepResult, StepDetails) {
        let duration_ns = self.started.elapsed().as_nanos() as u64;
        let methods = self
            .method_latencies
            .iter()
            .filter_map(|(method, latencies)| {
                MethodStats::from_latencies(latencies).map(|stats| (method.clone(), stats))
            })
            .collect();
        (
            StepResult {
                duration_ns,
                methods,
            },
            StepDetails {
                durations_ns: self.durations_ns,
                status: self.status,
            },
        )
    }
}
