//! Minimal JSON-RPC 2.0 client over reqwest
//!
//! Every call is bounded by the client timeout so a hung node cannot hold
//! a request open.

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::PaymentError;

#[derive(Debug, Error)]
pub enum RpcError {
    /// Connect failure, timeout or non-2xx status
    #[error("RPC transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("Malformed RPC response: {0}")]
    Malformed(String),
}

/// JSON-RPC client shared by the EVM and Solana verifiers
pub struct JsonRpcClient {
    http: Client,
}

impl JsonRpcClient {
    pub fn new(timeout_secs: u64) -> Result<Self, PaymentError> {
        let http = Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(timeout_secs.min(5)))
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("payment-gateway/1.0")
            .build()
            .map_err(|e| PaymentError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http })
    }

    /// Underlying HTTP client, for non-RPC upstreams sharing the pool
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Invoke `method` and return its `result` member (may be JSON null)
    pub async fn call(&self, url: &str, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Transport(format!("HTTP {}", status.as_u16())));
        }

        let mut envelope: Value = response
            .json()
            .await
            .map_err(|e| RpcError::Malformed(e.without_url().to_string()))?;

        parse_envelope(&mut envelope)
    }
}

fn parse_envelope(envelope: &mut Value) -> Result<Value, RpcError> {
    if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
        return Err(RpcError::Node {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }

    envelope
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| RpcError::Malformed("missing result".to_string()))
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(value: &Value) -> Option<u64> {
    let hex = value.as_str()?.strip_prefix("0x")?;
    u64::from_str_radix(hex, 16).ok()
}
