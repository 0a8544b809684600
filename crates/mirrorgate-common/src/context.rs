//! Per-request context threaded through the dispatch pipeline.

use uuid::Uuid;

/// Metadata for one RPC invocation.
///
/// Used only for logging and rate-limiter keys; never persisted.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: String,
    pub connection_id: String,
}

impl RequestContext {
    pub fn new(client_ip: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().simple().to_string(),
            client_ip: client_ip.into(),
            connection_id: connection_id.into(),
        }
    }

    /// Context for internally originated work (startup probes, tests).
    pub fn internal() -> Self {
        Self::new("127.0.0.1", "internal")
    }
}
