//! Error types for host conditioning

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HostError>;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize conditioner state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sysfs is not writable at {path}")]
    SysfsNotWritable { path: String },

    #[error("Unknown governor {governor} for cpu{cpu} (available: {available})")]
    UnknownGovernor {
        governor: String,
        cpu: usize,
        available: String,
    },

    #[error("Frequency {requested} kHz out of range [{min}, {max}] for cpu{cpu}")]
    FrequencyOutOfRange {
        requested: u64,
        min: u64,
        max: u64,
        cpu: usize,
    },

    #[error("No online CPUs found")]
    NoOnlineCpus,

    #[error("Failed to parse state file {path}: {source}")]
    BadStateFile {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
