//! Error types for container management

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DockerError>;

#[derive(Error, Debug)]
pub enum DockerError {
    #[error("Container engine error: {0}")]
    Engine(#[from] bollard::errors::Error),

    #[error("Init container {name} exited with code {code}")]
    InitFailed { name: String, code: i64 },

    #[error("Container {name} has no IP address on network {network}")]
    NoIpAddress { name: String, network: String },

    #[error("Image {image} not present and pull policy is `never`")]
    ImageNotPresent { image: String },

    #[error("Log stream write failed: {0}")]
    LogWrite(#[from] std::io::Error),
}
