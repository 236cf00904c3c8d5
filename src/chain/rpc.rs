//! JSON-RPC 2.0 client shared by the account-based adapters

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::ChainError;

/// JSON-RPC request structure
#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// Failure of a single RPC round trip, before chain-specific mapping
#[derive(Debug, Clone)]
pub enum RpcFailure {
    /// Node answered with a JSON-RPC error object
    Rpc(JsonRpcError),
    /// Transport or decoding failure
    Chain(ChainError),
}

impl From<RpcFailure> for ChainError {
    fn from(f: RpcFailure) -> Self {
        match f {
            RpcFailure::Rpc(e) => ChainError::Rejected(format!("RPC error {}: {}", e.code, e.message)),
            RpcFailure::Chain(e) => e,
        }
    }
}

/// Map a reqwest failure to the chain error taxonomy
pub fn classify_reqwest(e: reqwest::Error) -> ChainError {
    if e.is_timeout() {
        ChainError::Timeout(e.to_string())
    } else if e.is_decode() {
        ChainError::Parse(e.to_string())
    } else {
        ChainError::Transport(e.to_string())
    }
}

/// Map a non-2xx HTTP status to the chain error taxonomy
pub fn classify_status(status: reqwest::StatusCode, body: &str) -> ChainError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ChainError::NodeBusy(format!("HTTP {}: {}", status, body))
    } else {
        ChainError::Rejected(format!("HTTP {}: {}", status, body))
    }
}

#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    url: String,
    client: reqwest::Client,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make a JSON-RPC call.
    ///
    /// A `null` result is returned as `Ok(None)`.
    pub async fn call<T, R>(&self, method: &'static str, params: T) -> Result<Option<R>, RpcFailure>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcFailure::Chain(classify_reqwest(e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcFailure::Chain(classify_status(status, &body)));
        }

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| RpcFailure::Chain(ChainError::Parse(e.to_string())))?;

        if let Some(error) = rpc_response.error {
            return Err(RpcFailure::Rpc(error));
        }

        Ok(rpc_response.result)
    }

    /// Call that must return a non-null result
    pub async fn call_required<T, R>(&self, method: &'static str, params: T) -> Result<R, ChainError>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        self.call(method, params)
            .await?
            .ok_or_else(|| ChainError::Parse(format!("No result in {} response", method)))
    }
}
