//! Seam to the consensus/mirror backend.
//!
//! The production client that speaks to the upstream network lives behind
//! `MirrorBackend`; the gateway only depends on this trait. `MemoryBackend`
//! is the standalone stand-in used by tests and local runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use alloy::primitives::keccak256;

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait MirrorBackend: Send + Sync {
    async fn chain_id(&self) -> Result<u64, BackendError>;

    async fn block_number(&self) -> Result<u64, BackendError>;

    async fn gas_price(&self) -> Result<u64, BackendError>;

    async fn balance(&self, address: &str, block: &Value) -> Result<String, BackendError>;

    async fn transaction_count(&self, address: &str, block: &Value)
    -> Result<String, BackendError>;

    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<Value>, BackendError>;

    async fn logs(&self, filter: &Value) -> Result<Vec<Value>, BackendError>;

    async fn call(&self, transaction: &Value, block: &Value) -> Result<String, BackendError>;

    /// Submit a raw signed transaction; returns its hash.
    async fn submit_transaction(&self, raw: &[u8]) -> Result<String, BackendError>;

    async fn trace_transaction(
        &self,
        id: &str,
        tracer: &Value,
        tracer_config: &Value,
    ) -> Result<Value, BackendError>;
}

/// Fixed-answer backend for standalone runs and tests. Submitted raw
/// transactions are retained so tests can assert on ordering.
pub struct MemoryBackend {
    chain_id: u64,
    submissions: Mutex<Vec<Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn submissions(&self) -> Vec<Vec<u8>> {
        self.submissions.lock().clone()
    }
}

#[async_trait]
impl MirrorBackend for MemoryBackend {
    async fn chain_id(&self) -> Result<u64, BackendError> {
        Ok(self.chain_id)
    }

    async fn block_number(&self) -> Result<u64, BackendError> {
        Ok(0)
    }

    async fn gas_price(&self) -> Result<u64, BackendError> {
        Ok(710_000_000_000)
    }

    async fn balance(&self, _address: &str, _block: &Value) -> Result<String, BackendError> {
        Ok("0x0".to_string())
    }

    async fn transaction_count(
        &self,
        _address: &str,
        _block: &Value,
    ) -> Result<String, BackendError> {
        Ok("0x0".to_string())
    }

    async fn transaction_by_hash(&self, _hash: &str) -> Result<Option<Value>, BackendError> {
        Ok(None)
    }

    async fn logs(&self, _filter: &Value) -> Result<Vec<Value>, BackendError> {
        Ok(Vec::new())
    }

    async fn call(&self, _transaction: &Value, _block: &Value) -> Result<String, BackendError> {
        Ok("0x".to_string())
    }

    async fn submit_transaction(&self, raw: &[u8]) -> Result<String, BackendError> {
        let hash = keccak256(raw);
        self.submissions.lock().push(raw.to_vec());
        Ok(format!("{hash:#x}"))
    }

    async fn trace_transaction(
        &self,
        _id: &str,
        tracer: &Value,
        _tracer_config: &Value,
    ) -> Result<Value, BackendError> {
        Ok(json!({ "tracer": tracer, "calls": [] }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_hashes_submissions() {
        let backend = MemoryBackend::new(298);
        let hash = backend.submit_transaction(&[1, 2, 3]).await.unwrap();
        assert!(hash.starts_with("0x"));
        assert_eq!(hash.len(), 66);
        assert_eq!(backend.submissions(), vec![vec![1, 2, 3]]);
    }
}
