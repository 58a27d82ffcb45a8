//! Composable Engine API response validators
//!
//! Validators run in order: the generic JSON-RPC error check first, then
//! method-prefix gated engine checks. Non-engine methods pass through
//! untouched.

use serde_json::Value;

use crate::error::{Result, RpcError};
use crate::response::RpcResponse;

const NEW_PAYLOAD_PREFIX: &str = "engine_newPayload";
const FORKCHOICE_PREFIX: &str = "engine_forkchoiceUpdated";
const STATUS_VALID: &str = "VALID";
const STATUS_SYNCING: &str = "SYNCING";

/// Validate a response for the given request method.
pub fn validate_response(method: &str, response: &RpcResponse) -> Result<()> {
    if let Some(error) = &response.error {
        return Err(RpcError::Call {
            code: error.code,
            message: error.message.clone(),
        });
    }

    if method.starts_with(NEW_PAYLOAD_PREFIX) {
        let result = require_result(method, response)?;
        return check_payload_status(method, result, result.get("status"));
    }

    if method.starts_with(FORKCHOICE_PREFIX) {
        let result = require_result(method, response)?;
        let status = result.get("payloadStatus").and_then(|s| s.get("status"));
        return check_payload_status(method, result, status);
    }

    Ok(())
}

fn require_result<'a>(method: &str, response: &'a RpcResponse) -> Result<&'a Value> {
    response.result.as_ref().ok_or_else(|| RpcError::MissingResult {
        method: method.to_string(),
    })
}

fn check_payload_status(method: &str, result: &Value, status: Option<&Value>) -> Result<()> {
    let status = status.and_then(Value::as_str).unwrap_or_default();
    match status {
        STATUS_VALID => Ok(()),
        STATUS_SYNCING if method.starts_with(NEW_PAYLOAD_PREFIX) => Err(RpcError::Syncing {
            method: method.to_string(),
        }),
        other => Err(RpcError::InvalidStatus {
            method: method.to_string(),
            status: other.to_string(),
            validation_error: validation_error(result),
        }),
    }
}

fn validation_error(result: &Value) -> Option<String> {
    let direct = result.get("validationError");
    let nested = result
        .get("payloadStatus")
        .and_then(|s| s.get("validationError"));
    direct
        .or(nested)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}
