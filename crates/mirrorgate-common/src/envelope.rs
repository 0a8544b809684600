//! JSON-RPC 2.0 request and response envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";

/// A single decoded JSON-RPC request.
///
/// `id` keeps whatever JSON value the client sent (number, string or null)
/// so the response can echo it verbatim.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Structural validation of the envelope itself, before any method or
    /// parameter checks: `jsonrpc` must be exactly "2.0", and `method` and
    /// `id` must be present.
    pub fn check_well_formed(&self) -> Result<(), RpcError> {
        match self.jsonrpc.as_deref() {
            Some(JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(RpcError::invalid_request(format!(
                    "unsupported jsonrpc version '{other}'"
                )));
            }
            None => return Err(RpcError::invalid_request("missing jsonrpc field")),
        }
        if self.method.as_deref().unwrap_or("").is_empty() {
            return Err(RpcError::invalid_request("missing method field"));
        }
        if self.id.is_none() {
            return Err(RpcError::invalid_request("missing id field"));
        }
        Ok(())
    }

    /// Positional parameters as a vector; absent params are an empty list.
    pub fn params_vec(&self) -> Result<Vec<Value>, RpcError> {
        match &self.params {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(other) => Err(RpcError::invalid_request(format!(
                "params must be an array, got {other}"
            ))),
        }
    }
}

/// A JSON-RPC response carrying exactly one of `result` or `error`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn from_result(id: Value, outcome: Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(result) => Self::success(id, result),
            Err(error) => Self::failure(id, error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
