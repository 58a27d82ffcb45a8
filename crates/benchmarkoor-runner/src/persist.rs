//! Run artifact writer
//!
//! Owns all writes under `runs/{run_id}/`. Test detail files flush as
//! each test concludes; the aggregate files are finalized at teardown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use benchmarkoor_config::{InstanceConfig, RunSection};
use benchmarkoor_docker::ResourceSample;
use benchmarkoor_storage::layout;

use crate::error::Result;
use crate::result::{RunResult, TestDetails};

/// `config.json`: the full instance, run and host configuration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfigArtifact {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub suite_hash: String,
    pub instance: InstanceConfig,
    pub run: RunSection,
    pub system: SystemInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub hostname: String,
}

impl SystemInfo {
    pub fn capture() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: std::env::var("HOSTNAME").unwrap_or_default(),
        }
    }
}

pub struct RunWriter {
    run_dir: PathBuf,
}

impl RunWriter {
    /// Create the run directory and return a writer bound to it.
    pub fn create(results_root: &Path, run_id: &str) -> Result<Self> {
        let run_dir = layout::run_dir(results_root, run_id);
        std::fs::create_dir_all(&run_dir)?;
        Ok(Self { run_dir })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn write_config(&self, config: &RunConfigArtifact) -> Result<()> {
        self.write_json(layout::CONFIG_FILE, config)
    }

    pub fn write_result(&self, result: &RunResult) -> Result<()> {
        self.write_json(layout::RESULT_FILE, result)
    }

    /// Block-log payloads by test name; skipped entirely when empty.
    pub fn write_block_logs(&self, block_logs: &BTreeMap<String, Value>) -> Result<()> {
        if block_logs.is_empty() {
            return Ok(());
        }
        self.write_json(layout::BLOCK_LOGS_FILE, block_logs)
    }

    pub fn write_test_details(&self, test_path: &str, details: &TestDetails) -> Result<()> {
        let path = self
            .run_dir
            .join(format!("{test_path}{}", layout::RESULT_DETAILS_SUFFIX));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(details)?)?;
        Ok(())
    }

    pub fn write_resource_stats(&self, samples: &[ResourceSample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.write_json("resource-stats.json", samples)
    }

    /// Sink for the main container's log stream.
    pub fn container_log(&self) -> Result<File> {
        Ok(File::create(self.run_dir.join(layout::CONTAINER_LOG_FILE))?)
    }

    /// Sink for the init container's log stream.
    pub fn container_init_log(&self) -> Result<File> {
        Ok(File::create(self.run_dir.join(layout::CONTAINER_INIT_LOG_FILE))?)
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        std::fs::write(self.run_dir.join(name), serde_json::to_vec_pretty(value)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{RunStatus, StepDetails};

    fn instance() -> InstanceConfig {
        serde_json::from_value(serde_json::json!({
            "id": "geth-default",
            "client": "geth",
            "genesis": "./genesis.json",
        }))
        .expect("instance config")
    }

    #[test]
    fn test_writer_produces_the_layout() {
        let root = tempfile::tempdir().expect("tempdir");
        let writer = RunWriter::create(root.path(), "a1b2c3d4").expect("writer");

        writer
            .write_config(&RunConfigArtifact {
                run_id: "a1b2c3d4".to_string(),
                timestamp: Utc::now(),
                suite_hash: "f".repeat(64),
                instance: instance(),
                run: RunSection::default(),
                system: SystemInfo::capture(),
            })
            .expect("config");

        writer
            .write_result(&RunResult {
                run_id: "a1b2c3d4".to_string(),
                timestamp: Utc::now(),
                timestamp_end: None,
                suite_hash: "f".repeat(64),
                instance_id: "geth-default".to_string(),
                client: "geth".to_string(),
                status: RunStatus::Completed,
                termination_reason: None,
                tests: vec![],
            })
            .expect("result");

        let mut details = TestDetails::default();
        details.steps.insert(
            "test".to_string(),
            StepDetails {
                durations_ns: vec![10, 20],
                status: vec![0, 0],
            },
        );
        writer
            .write_test_details("cancun/blobs/test_one", &details)
            .expect("details");

        let run_dir = root.path().join("runs/a1b2c3d4");
        assert!(run_dir.join("config.json").exists());
        assert!(run_dir.join("result.json").exists());
        assert!(run_dir
            .join("cancun/blobs/test_one.result-details.json")
            .exists());
    }

    #[test]
    fn test_empty_block_logs_write_nothing() {
        let root = tempfile::tempdir().expect("tempdir");
        let writer = RunWriter::create(root.path(), "a1b2c3d4").expect("writer");
        writer.write_block_logs(&BTreeMap::new()).expect("noop");
        assert!(!root
            .path()
            .join("runs/a1b2c3d4/result.block-logs.json")
            .exists());

        let mut logs = BTreeMap::new();
        logs.insert("TestA".to_string(), serde_json::json!({"block": {"hash": "0xabc"}}));
        writer.write_block_logs(&logs).expect("write");
        let bytes = std::fs::read(root.path().join("runs/a1b2c3d4/result.block-logs.json"))
            .expect("read");
        let parsed: BTreeMap<String, Value> = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(parsed["TestA"]["block"]["hash"], "0xabc");
    }
}
