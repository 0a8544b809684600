//! Per-sender transaction serialization.
//!
//! Two transactions signed by the same account must reach the upstream in
//! the order their submissions arrived, across every gateway instance.
//! `SenderSerializer` recovers the sender from the raw signed transaction
//! and brackets the caller-supplied critical section with the sender's
//! lock.
//!
//! Liveness beats ordering: when the sender cannot be recovered or the
//! lock layer fails open, the critical section runs unserialized. Only an
//! acquisition that exceeds the configured timeout is surfaced, as an
//! error kind distinct from anything the critical section itself returns.

use std::sync::Arc;
use std::time::Duration;

use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Decodable2718;
use tracing::{debug, warn};

use mirrorgate_common::context::RequestContext;
use mirrorgate_lock::LockStrategy;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SerializeError {
    #[error("timed out waiting for the sender lock")]
    AcquireTimeout,
}

pub struct SenderSerializer {
    strategy: Arc<dyn LockStrategy>,
    acquire_timeout: Duration,
}

impl SenderSerializer {
    pub fn new(strategy: Arc<dyn LockStrategy>, acquire_timeout: Duration) -> Self {
        Self {
            strategy,
            acquire_timeout,
        }
    }

    /// Recover the signing address from a raw signed transaction, as a
    /// lowercase hex string. Returns `None` for anything that does not
    /// decode to a signed envelope with a recoverable signature.
    pub fn extract_sender(raw_tx: &[u8]) -> Option<String> {
        let envelope = TxEnvelope::decode_2718(&mut &raw_tx[..]).ok()?;
        let sender = envelope.recover_signer().ok()?;
        Some(format!("{sender:#x}"))
    }

    /// Run `critical` while holding the sender's lock.
    ///
    /// The lock is released after the critical section settles regardless
    /// of its outcome; the section's own result is passed through
    /// untouched.
    pub async fn run_exclusive<T, F, Fut>(
        &self,
        raw_tx: &[u8],
        ctx: &RequestContext,
        critical: F,
    ) -> Result<T, SerializeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(sender) = Self::extract_sender(raw_tx) else {
            warn!(
                request_id = %ctx.request_id,
                "no sender recoverable from raw transaction, skipping serialization"
            );
            return Ok(critical().await);
        };

        let session = match tokio::time::timeout(
            self.acquire_timeout,
            self.strategy.acquire(&sender),
        )
        .await
        {
            Err(_elapsed) => {
                warn!(
                    request_id = %ctx.request_id,
                    sender,
                    timeout_ms = self.acquire_timeout.as_millis() as u64,
                    "sender lock acquisition timed out"
                );
                return Err(SerializeError::AcquireTimeout);
            }
            Ok(None) => {
                debug!(
                    request_id = %ctx.request_id,
                    sender,
                    "sender lock failed open, proceeding unserialized"
                );
                None
            }
            Ok(Some(session)) => Some(session),
        };

        let outcome = critical().await;

        if let Some(session) = session {
            self.strategy.release(&sender, &session).await;
        }
        Ok(outcome)
    }
}
