//! HTTP JSON-RPC client for the Engine and RPC endpoints
//!
//! Test scripts carry fully serialized request bodies; the client sends
//! them as-is and only parses the response envelope. A fresh JWT is
//! signed per call.

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::JwtSigner;
use crate::error::{Result, RpcError};
use crate::response::RpcResponse;

/// Default per-call timeout. Heavy benchmark blocks can execute for a
/// long time, so this is far above a live client's normal latency.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval of the readiness probe.
const READY_PROBE_INTERVAL: Duration = Duration::from_secs(1);

pub struct EngineClient {
    http: reqwest::Client,
    endpoint: Url,
    signer: Option<JwtSigner>,
    default_timeout: Duration,
}

impl EngineClient {
    /// A client for `endpoint`; `secret` enables Engine-API JWT signing.
    pub fn new(endpoint: Url, secret: Option<&[u8; 32]>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            signer: secret.map(JwtSigner::new),
            default_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send one pre-serialized JSON-RPC line.
    pub async fn call_line(&self, line: &str, timeout: Option<Duration>) -> Result<RpcResponse> {
        self.post(line.to_string(), timeout).await
    }

    /// Build and send a single-method call, for requests that are not part
    /// of a script (rollback, readiness).
    pub async fn call_method(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<RpcResponse> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        self.post(body.to_string(), timeout).await
    }

    async fn post(&self, body: String, timeout: Option<Duration>) -> Result<RpcResponse> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .timeout(timeout.unwrap_or(self.default_timeout))
            .body(body);

        if let Some(signer) = &self.signer {
            request = request.header(AUTHORIZATION, signer.bearer_token()?);
        }

        let response = request.send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Probe the plain RPC port at 1 Hz until it answers `web3_clientVersion`
/// with HTTP 200, the overall timeout elapses, or the token is cancelled.
pub async fn wait_until_ready(
    rpc_url: &Url,
    timeout_secs: u64,
    cancel: &CancellationToken,
) -> Result<()> {
    let http = reqwest::Client::new();
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "web3_clientVersion",
        "params": [],
    })
    .to_string();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(RpcError::ReadyTimeout {
                seconds: timeout_secs,
            });
        }

        let attempt = http
            .post(rpc_url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .timeout(READY_PROBE_INTERVAL)
            .body(body.clone())
            .send();

        tokio::select! {
            () = cancel.cancelled() => return Err(RpcError::Cancelled),
            result = attempt => {
                match result {
                    Ok(response) if response.status().is_success() => return Ok(()),
                    Ok(response) => {
                        tracing::debug!(status = %response.status(), "client not ready yet");
                    }
                    Err(error) => {
                        tracing::debug!(%error, "readiness probe failed");
                    }
                }
            }
        }

        tokio::select! {
            () = cancel.cancelled() => return Err(RpcError::Cancelled),
            () = tokio::time::sleep(READY_PROBE_INTERVAL) => {}
        }
    }
}

/// Cheap per-line introspection: the executor needs the method to pick
/// validators and the first param's block hash for collector registration.
#[derive(Debug, Clone, Default)]
pub struct LineMeta {
    pub method: String,
    pub id: u64,
    pub block_hash: Option<String>,
}

impl LineMeta {
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)?;
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let id = value.get("id").and_then(Value::as_u64).unwrap_or_default();
        let block_hash = value
            .get("params")
            .and_then(|params| params.get(0))
            .and_then(|first| first.get("blockHash"))
            .and_then(Value::as_str)
            .map(ToString::to_string);
        Ok(Self {
            method,
            id,
            block_hash,
        })
    }
}
