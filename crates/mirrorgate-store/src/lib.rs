//! Shared key-value store adapter.
//!
//! The lock strategies and the shared rate limiter talk to the store
//! through the `KvStore` trait, never to a client library directly. Two
//! implementations exist: `RedisStore` for production fleets and
//! `MemoryStore` for tests and single-process deployments.
//!
//! Callers are expected to treat `StoreError` as a fail-open condition:
//! a store outage must never reject client traffic.

use async_trait::async_trait;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Errors surfaced by the adapter. Transient and permanent failures are
/// not distinguished; callers fail open either way.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store command failed: {0}")]
    Command(String),
}

/// Minimal primitives required by the lock strategies and rate limiter.
///
/// List keys are ordered newest-at-head; `list_push_head` + `list_index(-1)`
/// give FIFO observation of the oldest entry.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditional set with a millisecond TTL.
    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), StoreError>;

    /// Set-if-absent with a millisecond TTL. Returns true when the key was set.
    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool, StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn list_push_head(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn list_pop_tail(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Read by index; negative indexes address from the tail (-1 = oldest).
    async fn list_index(&self, key: &str, index: i64) -> Result<Option<String>, StoreError>;

    /// Remove up to `count` occurrences of `value`. Returns removed count.
    async fn list_remove(&self, key: &str, count: i64, value: &str) -> Result<u64, StoreError>;

    async fn list_len(&self, key: &str) -> Result<u64, StoreError>;

    /// Atomically delete `key` only if its current value equals `expected`.
    /// Returns true when the delete happened. Evaluated as a script at the
    /// store so ownership checks cannot race with other writers.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Increment a counter, attaching the TTL on the 0 -> 1 transition.
    /// Returns the post-increment value.
    async fn incr_px(&self, key: &str, ttl_ms: u64) -> Result<i64, StoreError>;

    /// Whether the adapter believes the backing store is usable. Checked
    /// once at strategy selection; not a per-call health probe.
    fn is_ready(&self) -> bool;
}
