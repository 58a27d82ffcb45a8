//! Configuration types and YAML loader for Benchmarkoor
//!
//! The config file drives everything: which client instances to provision,
//! where test fixtures come from, and how runs are persisted and indexed.

pub mod config;
pub mod error;
pub mod loader;

pub use config::{
    ClientSection, Config, CpuFreqConfig, Frequency, GitSource, IndexerSection, InstanceConfig,
    NamedFrequency, PullPolicy, ResourceLimits, RollbackStrategy, RunSection, S3Config,
    SuiteSection, SuiteSource, UploadSection, DEFAULT_READY_TIMEOUT_SECS,
};
pub use error::{ConfigError, Result};
pub use loader::{load_config, validate};
