//! Configuration model for Benchmarkoor
//!
//! Mirrors the recognized sections of the YAML config file: `client`,
//! `suite`, `run`, `indexer`, and `upload`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ConfigError, Result};

/// Default overall readiness timeout in seconds.
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 120;

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub client: ClientSection,
    pub suite: SuiteSection,
    pub run: RunSection,
    pub indexer: IndexerSection,
    pub upload: UploadSection,
}

/// `client` section: the instances to benchmark.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientSection {
    pub instances: Vec<InstanceConfig>,
}

/// A single client instance under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Unique id within a run.
    pub id: String,
    /// Client type name, e.g. `geth`. Case-sensitive.
    pub client: String,
    /// Image override; the registry default is used when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Entrypoint override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    /// Command override; the registry default is used when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Arguments appended after the resolved command.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Extra environment variables, merged over the registry defaults.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Genesis source: an `http(s)://` URL or a local file path.
    pub genesis: String,
    #[serde(default)]
    pub pull_policy: PullPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<ResourceLimits>,
    /// Host CPU-frequency conditioning applied around this instance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_freq: Option<CpuFreqConfig>,
    /// How the executor returns the client to the pre-test head.
    #[serde(default)]
    pub rollback: RollbackStrategy,
}

/// Image pull policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

/// Container resource limits forwarded to the container host config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResourceLimits {
    /// CPU quota in whole-CPU units (1.5 = one and a half CPUs).
    pub cpus: Option<f64>,
    /// Explicit cpuset, e.g. `0-3` or `0,2`.
    pub cpuset: Option<String>,
    /// Memory limit in bytes.
    pub memory: Option<i64>,
}

/// Scoped CPU-frequency pinning for the host while an instance runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CpuFreqConfig {
    /// Exact frequency in kHz, the string `max`, or absent for unchanged.
    pub frequency: Option<Frequency>,
    /// Turbo-boost override; absent leaves the platform setting untouched.
    pub turbo: Option<bool>,
    /// Scaling governor name, e.g. `performance`.
    pub governor: Option<String>,
    /// Target CPU ids; empty targets all online CPUs.
    pub cpus: Vec<usize>,
}

/// A frequency spec: an exact kHz value or the platform maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frequency {
    KHz(u64),
    Named(NamedFrequency),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NamedFrequency {
    Max,
}

/// Rollback selection for the cleanup step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackStrategy {
    /// Use the client registry's RPC rollback spec when it has one.
    #[default]
    Auto,
    /// Always recreate the container between tests.
    Recreate,
}

/// `suite` section: where fixtures come from.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SuiteSection {
    pub sources: Vec<SuiteSource>,
    /// Substring filter over relative fixture paths.
    pub filter: Option<String>,
}

/// One fixture source: a pre-fetched git checkout or a local directory.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SuiteSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_dir: Option<String>,
    /// Scripts from this source run once at suite start instead of being timed.
    #[serde(default)]
    pub warmup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSource {
    pub repo: String,
    pub sha: String,
    /// Subdirectory within the checkout holding fixture files.
    #[serde(default)]
    pub dir: String,
    /// Local checkout path of `repo` at `sha`.
    pub checkout: String,
}

/// `run` section: shared run parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub results_dir: String,
    pub docker_network: String,
    /// 32-byte Engine-API JWT secret, hex encoded.
    pub jwt: String,
    /// Overall readiness timeout in seconds; 0 selects the default (120).
    pub ready_timeout: u64,
    /// Quiescence window after readiness, in seconds.
    pub ready_wait_after: u64,
    /// Substring filter over test names.
    pub test_filter: Option<String>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            results_dir: "./results".to_string(),
            docker_network: "benchmarkoor".to_string(),
            jwt: String::new(),
            ready_timeout: 0,
            ready_wait_after: 2,
            test_filter: None,
        }
    }
}

impl RunSection {
    /// Effective readiness timeout: the configured value or the default when 0.
    pub fn effective_ready_timeout(&self) -> u64 {
        if self.ready_timeout == 0 {
            DEFAULT_READY_TIMEOUT_SECS
        } else {
            self.ready_timeout
        }
    }

    /// Decode the configured JWT secret, requiring exactly 32 bytes.
    pub fn jwt_secret(&self) -> Result<[u8; 32]> {
        let bytes = hex::decode(self.jwt.trim_start_matches("0x"))
            .map_err(|e| ConfigError::InvalidJwtSecret(e.to_string()))?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| ConfigError::InvalidJwtSecret(format!("expected 32 bytes, got {}", bytes.len())))
    }
}

/// `indexer` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSection {
    pub enabled: bool,
    /// Scan interval in seconds.
    pub interval: u64,
    /// Worker count for per-run index builds.
    pub concurrency: usize,
}

impl Default for IndexerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 60,
            concurrency: 4,
        }
    }
}

/// `upload` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UploadSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,
}

/// S3 upload target. The uploader itself is an external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_parallel_uploads")]
    pub parallel_uploads: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acl: Option<String>,
}

fn default_parallel_uploads() -> usize {
    4
}
