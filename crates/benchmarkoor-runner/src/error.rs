//! Error types for the run engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RunnerError>;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Unknown client type: {0}")]
    UnknownClient(String),

    #[error("Failed to fetch genesis from {source_desc}: {message}")]
    GenesisFetch {
        source_desc: String,
        message: String,
    },

    #[error(transparent)]
    Config(#[from] benchmarkoor_config::ConfigError),

    #[error(transparent)]
    Docker(#[from] benchmarkoor_docker::DockerError),

    #[error(transparent)]
    Host(#[from] benchmarkoor_host::HostError),

    #[error(transparent)]
    Rpc(#[from] benchmarkoor_rpc::RpcError),

    #[error(transparent)]
    Suite(#[from] benchmarkoor_suite::SuiteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Container died before the run completed (exit code {code})")]
    ContainerDied { code: i64 },
}
