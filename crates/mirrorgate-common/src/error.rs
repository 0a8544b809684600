//! JSON-RPC error model and the gateway's stable error codes.
//!
//! Every error that leaves the process does so as an `RpcError` inside a
//! response envelope. Internal failure detail (store outages, backend
//! faults, stack traces) never reaches the wire; handlers map those onto
//! `internal_error` before returning.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// JSON-RPC 2.0 standard codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// Gateway-specific codes
pub const LIMIT_EXCEEDED: i64 = -32005;
pub const BATCH_SIZE_EXCEEDED: i64 = -32203;
pub const SUBSCRIPTIONS_DISABLED: i64 = -32207;
pub const IP_RATE_LIMIT_EXCEEDED: i64 = -32605;
pub const MAX_SUBSCRIPTIONS: i64 = -32608;

/// A JSON-RPC error object: `{ code, message, data? }`.
#[derive(thiserror::Error, Clone, Debug, Serialize, Deserialize, PartialEq)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Unable to parse JSON")
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, format!("Invalid request: {}", reason.into()))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method {method} not found"))
    }

    pub fn invalid_params(reason: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, reason)
    }

    /// Invalid value for a declared parameter, with its location.
    pub fn invalid_parameter(location: &str, reason: &str, value: &Value) -> Self {
        Self::new(
            INVALID_PARAMS,
            format!("Invalid parameter {location}: {reason}, value: {value}"),
        )
    }

    pub fn missing_required_parameter(location: &str) -> Self {
        Self::new(
            INVALID_PARAMS,
            format!("Missing required parameter {location}"),
        )
    }

    pub fn unexpected_parameter(location: &str) -> Self {
        Self::new(INVALID_PARAMS, format!("Unexpected parameter {location}"))
    }

    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, reason)
    }

    pub fn limit_exceeded(reason: impl Into<String>) -> Self {
        Self::new(LIMIT_EXCEEDED, reason)
    }

    pub fn batch_size_exceeded(size: usize, max: usize) -> Self {
        Self::new(
            BATCH_SIZE_EXCEEDED,
            format!("Batch request amount {size} exceeds max {max}"),
        )
    }

    pub fn batch_requests_disabled() -> Self {
        Self::new(METHOD_NOT_FOUND, "Batch requests are disabled")
    }

    pub fn method_not_allowed_in_batch(method: &str) -> Self {
        Self::new(
            METHOD_NOT_FOUND,
            format!("Method {method} is not permitted in batch requests"),
        )
    }

    pub fn subscriptions_disabled() -> Self {
        Self::new(SUBSCRIPTIONS_DISABLED, "Subscriptions are disabled")
    }

    pub fn ip_rate_limit_exceeded(method: &str) -> Self {
        Self::new(
            IP_RATE_LIMIT_EXCEEDED,
            format!("IP rate limit exceeded on {method}"),
        )
    }

    pub fn max_subscriptions() -> Self {
        Self::new(MAX_SUBSCRIPTIONS, "Exceeded maximum allowed subscriptions")
    }

    /// True for conditions caused by the client rather than the gateway.
    ///
    /// The HTTP facade uses this to decide whether the configurable 400
    /// status applies; internal errors always keep the success status so
    /// a gateway fault is never reported as a client fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self.code, INTERNAL_ERROR)
    }
}
