//! Error types for configuration loading

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    ParseFailed(#[from] serde_yaml::Error),

    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),

    #[error("Duplicate instance id: {0}")]
    DuplicateInstanceId(String),

    #[error("Instance {id}: {message}")]
    InvalidInstance { id: String, message: String },

    #[error("Suite source must set exactly one of `git` or `local_dir`")]
    AmbiguousSuiteSource,

    #[error("No suite sources configured")]
    NoSuiteSources,
}
