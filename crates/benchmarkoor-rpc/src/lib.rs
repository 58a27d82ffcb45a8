//! JWT-signed Engine API JSON-RPC client and response validators
//!
//! The caller sends pre-serialized request lines with a per-call HS256
//! bearer token and validates responses through composable, method-prefix
//! gated checks.

pub mod auth;
pub mod client;
pub mod error;
pub mod response;
pub mod validate;

pub use auth::JwtSigner;
pub use client::{wait_until_ready, EngineClient, LineMeta, DEFAULT_CALL_TIMEOUT};
pub use error::{Result, RpcError};
pub use response::{RpcCallError, RpcResponse};
pub use validate::validate_response;
