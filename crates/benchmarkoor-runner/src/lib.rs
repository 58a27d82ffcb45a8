//! Per-instance benchmark orchestration
//!
//! The runner provisions one client container per instance, conditions
//! the host, wires the block-log collector into the container's log
//! stream, drives the test executor over the Engine API, and persists
//! run artifacts to the content-addressed layout.

pub mod collector;
pub mod error;
pub mod executor;
pub mod persist;
pub mod result;
pub mod runner;

pub use collector::{BlockLogCollector, InterceptWriter, MAX_UNMATCHED};
pub use error::{Result, RunnerError};
pub use executor::{ClientReset, ExecutorConfig, ResetEndpoints, TestExecutor};
pub use persist::{RunConfigArtifact, RunWriter, SystemInfo};
pub use result::{
    MethodStats, RunResult, RunStatus, StepDetails, StepResult, TestDetails, TestResult,
};
pub use runner::{generate_run_id, run_instance, RunSummary, RunnerContext};
