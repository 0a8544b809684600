//! Per-key lock strategies.
//!
//! Provides:
//! - `LockStrategy`: the acquire/release contract shared by both strategies
//! - `LocalLockStrategy`: one mutex per key in a bounded LRU (single process)
//! - `QueuedLockStrategy`: FIFO queued lock over the shared key-value store
//! - `LockMetrics`: observation surface injected into the strategies
//!
//! Both strategies fail open: a store fault makes `acquire` return `None`
//! and the caller proceeds without mutual exclusion rather than rejecting
//! the request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use mirrorgate_store::KvStore;

pub mod local;
pub mod metrics;
pub mod queued;

pub use local::LocalLockStrategy;
pub use metrics::LockMetrics;
pub use queued::QueuedLockStrategy;

/// Proof of a successful acquisition. The session key is required for
/// release; `acquired_at` is monotonic and is used to classify releases
/// that happen after the hold deadline.
#[derive(Clone, Debug)]
pub struct LockSession {
    pub session_key: String,
    pub acquired_at: Instant,
}

/// The per-key mutual exclusion contract.
#[async_trait]
pub trait LockStrategy: Send + Sync {
    /// Block until the lock for `lock_id` is held, or fail open (`None`)
    /// on a store fault. Callers that need a bounded wait wrap this future
    /// in a timeout.
    async fn acquire(&self, lock_id: &str) -> Option<LockSession>;

    /// Ownership-checked, idempotent release. A session that does not own
    /// the lock leaves it untouched. Never fails outward.
    async fn release(&self, lock_id: &str, session: &LockSession);

    /// Strategy label used in metrics and logs.
    fn name(&self) -> &'static str;
}

/// Tunables shared by both strategies.
#[derive(Clone, Debug)]
pub struct LockConfig {
    /// Upper bound on how long a lock may be held before reclamation.
    pub max_hold: Duration,
    /// Distributed queue poll interval.
    pub poll_interval: Duration,
    /// Heartbeat TTL multiplier: a waiter missing this many polls is a zombie.
    pub heartbeat_missed_count: u32,
    /// Local LRU capacity.
    pub local_max_entries: u64,
    /// Local LRU entry idle TTL.
    pub local_entry_ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_hold: Duration::from_millis(30_000),
            poll_interval: Duration::from_millis(100),
            heartbeat_missed_count: 3,
            local_max_entries: 1_000,
            local_entry_ttl: Duration::from_millis(300_000),
        }
    }
}

/// Lock identifiers are account addresses; key derivation is case-normalized
/// so checksummed and lowercase spellings contend on the same lock.
pub(crate) fn normalize_lock_id(lock_id: &str) -> String {
    lock_id.to_ascii_lowercase()
}

/// Picks the strategy for this process: distributed when a shared store is
/// configured and ready, local otherwise. Called once at startup; the
/// choice is fixed for the process lifetime.
pub fn create_lock_strategy(
    config: &LockConfig,
    store: Option<Arc<dyn KvStore>>,
    metrics: Arc<LockMetrics>,
) -> Arc<dyn LockStrategy> {
    match store {
        Some(store) if store.is_ready() => {
            tracing::info!("sender locks using distributed queued strategy");
            Arc::new(QueuedLockStrategy::new(config, store, metrics))
        }
        _ => {
            tracing::info!("sender locks using local in-process strategy");
            Arc::new(LocalLockStrategy::new(config, metrics))
        }
    }
}
