//! JSON-RPC 2.0 response envelope

use serde::Deserialize;
use serde_json::Value;

/// Parsed response envelope. Execution clients attach nonstandard members
/// to error responses, so unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcCallError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcCallError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}
