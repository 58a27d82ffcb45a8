//! Error types for the RPC client

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RpcError>;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse JSON-RPC response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to sign JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("JSON-RPC error {code}: {message}")]
    Call { code: i64, message: String },

    #[error("{method} returned no result")]
    MissingResult { method: String },

    /// Distinguished retryable condition: the client accepted the payload
    /// but is still syncing toward it.
    #[error("{method} returned SYNCING")]
    Syncing { method: String },

    #[error("{method} returned status {status}{}", format_validation_error(.validation_error))]
    InvalidStatus {
        method: String,
        status: String,
        validation_error: Option<String>,
    },

    #[error("RPC endpoint not ready after {seconds}s")]
    ReadyTimeout { seconds: u64 },

    #[error("Readiness probe cancelled")]
    Cancelled,
}

impl RpcError {
    /// Whether this error is the retryable `SYNCING` condition.
    pub fn is_syncing(&self) -> bool {
        matches!(self, Self::Syncing { .. })
    }
}

fn format_validation_error(validation_error: &Option<String>) -> String {
    match validation_error {
        Some(detail) => format!(": {detail}"),
        None => String::new(),
    }
}
