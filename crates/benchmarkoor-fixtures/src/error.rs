//! Error types for fixture conversion

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FixtureError>;

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Failed to parse fixture file: {0}")]
    ParseFailed(#[from] serde_json::Error),

    #[error("Fixture {name} has no payloads")]
    EmptyPayloads { name: String },

    #[error("Fixture {name}: unsupported newPayload version {version}")]
    UnsupportedVersion { name: String, version: u8 },

    #[error("Fixture {name}, payload {index}: missing or empty blockHash")]
    MissingBlockHash { name: String, index: usize },

    #[error("Fixture {name}, payload {index}: missing {field} required by version {version}")]
    MissingVersionedField {
        name: String,
        index: usize,
        field: &'static str,
        version: u8,
    },

    #[error("Fixture {name}, payload {index}: invalid blockNumber: {value}")]
    InvalidBlockNumber {
        name: String,
        index: usize,
        value: String,
    },
}
