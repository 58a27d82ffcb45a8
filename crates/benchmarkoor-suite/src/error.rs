//! Error types for suite building

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SuiteError>;

#[derive(Error, Debug)]
pub enum SuiteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source {source_name}: directory {dir} does not exist")]
    MissingSourceDir { source_name: String, dir: String },

    #[error("Suite source is neither git nor local_dir")]
    InvalidSource,

    #[error("Failed to serialize suite summary: {0}")]
    Summary(#[from] serde_json::Error),
}
