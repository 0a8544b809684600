//! Distributed queued lock strategy.
//!
//! Coordinates N stateless gateway processes through three key shapes in
//! the shared store:
//!
//! - holder key `lock:{id}`: value is the owning session key, TTL = max hold
//! - queue key `lock:queue:{id}`: list of waiting session keys, newest at
//!   the head, oldest at the tail
//! - heartbeat key `lock:heartbeat:{session}`: proof of life for a waiter,
//!   TTL = poll interval x missed count
//!
//! A waiter joins the queue, then polls: refresh own heartbeat, read the
//! tail. Only the tail may try the set-if-absent on the holder key; a tail
//! whose heartbeat is gone is a zombie and is removed by whoever observes
//! it. The queue entry is removed only after a confirmed acquisition, so a
//! racing set-if-absent can never let a later joiner overtake the queue.
//!
//! Release is a scripted compare-and-delete on the holder key: ownership
//! is checked at the store, so an expired or foreign session cannot delete
//! a lock it no longer owns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use mirrorgate_store::{KvStore, StoreError};

use crate::metrics::LockMetrics;
use crate::{LockConfig, LockSession, LockStrategy, normalize_lock_id};

pub(crate) const STRATEGY_DISTRIBUTED: &str = "distributed";

const KEY_PREFIX: &str = "lock";

pub struct QueuedLockStrategy {
    store: Arc<dyn KvStore>,
    max_hold: Duration,
    poll_interval: Duration,
    heartbeat_ttl_ms: u64,
    metrics: Arc<LockMetrics>,
}

fn holder_key(id: &str) -> String {
    format!("{KEY_PREFIX}:{id}")
}

fn queue_key(id: &str) -> String {
    format!("{KEY_PREFIX}:queue:{id}")
}

fn heartbeat_key(session_key: &str) -> String {
    format!("{KEY_PREFIX}:heartbeat:{session_key}")
}

impl QueuedLockStrategy {
    pub fn new(config: &LockConfig, store: Arc<dyn KvStore>, metrics: Arc<LockMetrics>) -> Self {
        Self {
            store,
            max_hold: config.max_hold,
            poll_interval: config.poll_interval,
            heartbeat_ttl_ms: config.poll_interval.as_millis() as u64
                * u64::from(config.heartbeat_missed_count.max(2)),
            metrics,
        }
    }

    /// The polling loop. Any store error propagates out and is turned into
    /// a fail-open result by `acquire`.
    async fn acquire_inner(
        &self,
        id: &str,
        session_key: &str,
    ) -> Result<LockSession, StoreError> {
        let holder = holder_key(id);
        let queue = queue_key(id);

        loop {
            // Proof of life. A waiter that stops refreshing becomes a
            // zombie and is removed by the next live tail-checker.
            self.store
                .set_px(&heartbeat_key(session_key), "1", self.heartbeat_ttl_ms)
                .await?;

            match self.store.list_index(&queue, -1).await? {
                Some(tail) if tail == session_key => {
                    let acquired = self
                        .store
                        .set_nx_px(&holder, session_key, self.max_hold.as_millis() as u64)
                        .await?;
                    if acquired {
                        // Leave the queue only after the holder key is ours.
                        self.store.list_remove(&queue, 1, session_key).await?;
                        let _ = self.store.del(&heartbeat_key(session_key)).await;
                        debug!(lock_id = %id, "acquired distributed lock");
                        return Ok(LockSession {
                            session_key: session_key.to_string(),
                            acquired_at: Instant::now(),
                        });
                    }
                    // Previous holder's TTL has not elapsed yet.
                    tokio::time::sleep(self.poll_interval).await;
                }
                Some(tail) => {
                    if self.store.exists(&heartbeat_key(&tail)).await? {
                        tokio::time::sleep(self.poll_interval).await;
                    } else if self.store.list_remove(&queue, -1, &tail).await? > 0 {
                        // Dead waiter at the tail; remove it and recheck
                        // immediately. Only the tail is ever inspected, so
                        // live entries are never overtaken.
                        debug!(lock_id = %id, zombie = %tail, "removed zombie queue entry");
                        self.metrics.zombie_cleanup();
                    }
                }
                None => {
                    // Our entry vanished (store flush or our own heartbeat
                    // lapsed and another waiter removed us). Rejoin.
                    self.store.list_push_head(&queue, session_key).await?;
                }
            }
        }
    }
}

#[async_trait]
impl LockStrategy for QueuedLockStrategy {
    async fn acquire(&self, lock_id: &str) -> Option<LockSession> {
        let id = normalize_lock_id(lock_id);
        let session_key = Uuid::new_v4().simple().to_string();
        let queue = queue_key(&id);

        if let Err(err) = self.store.list_push_head(&queue, &session_key).await {
            warn!(lock_id = %id, error = %err, "failed to join lock queue, failing open");
            self.metrics.store_error("queue_join");
            self.metrics.lock_failed(STRATEGY_DISTRIBUTED);
            return None;
        }

        let wait_start = Instant::now();
        let result = {
            let _waiting = self.metrics.waiting_guard(STRATEGY_DISTRIBUTED);
            self.acquire_inner(&id, &session_key).await
        };

        match result {
            Ok(session) => {
                self.metrics
                    .observe_wait(STRATEGY_DISTRIBUTED, wait_start.elapsed().as_secs_f64());
                self.metrics.lock_acquired(STRATEGY_DISTRIBUTED);
                Some(session)
            }
            Err(err) => {
                warn!(lock_id = %id, error = %err, "store fault during lock acquire, failing open");
                self.metrics.store_error("acquire");
                self.metrics.lock_failed(STRATEGY_DISTRIBUTED);
                // Best-effort cleanup so the dead entry does not linger
                // until zombie detection.
                let _ = self.store.list_remove(&queue, 1, &session_key).await;
                let _ = self.store.del(&heartbeat_key(&session_key)).await;
                None
            }
        }
    }

    async fn release(&self, lock_id: &str, session: &LockSession) {
        let id = normalize_lock_id(lock_id);
        match self
            .store
            .compare_and_delete(&holder_key(&id), &session.session_key)
            .await
        {
            Ok(true) => {
                self.metrics.lock_released(
                    STRATEGY_DISTRIBUTED,
                    session.acquired_at.elapsed().as_secs_f64(),
                );
            }
            Ok(false) => {
                // Either the TTL already reaped the holder key or another
                // session now owns it. Past the hold deadline this was a
                // timeout release; otherwise it is a double release or a
                // foreign session and stays a no-op.
                if session.acquired_at.elapsed() >= self.max_hold {
                    warn!(lock_id = %id, "lock expired before release (hold deadline elapsed)");
                    self.metrics.timeout_release(STRATEGY_DISTRIBUTED);
                }
            }
            Err(err) => {
                warn!(lock_id = %id, error = %err, "store fault during lock release");
                self.metrics.store_error("release");
            }
        }
    }

    fn name(&self) -> &'static str {
        STRATEGY_DISTRIBUTED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorgate_store::MemoryStore;

    fn config() -> LockConfig {
        LockConfig {
            max_hold: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
            heartbeat_missed_count: 3,
            ..LockConfig::default()
        }
    }

    fn strategy_over(store: Arc<dyn KvStore>) -> (QueuedLockStrategy, Arc<LockMetrics>) {
        let metrics = Arc::new(LockMetrics::unregistered());
        (
            QueuedLockStrategy::new(&config(), store, metrics.clone()),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_acquire_release_cycle() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let (strategy, metrics) = strategy_over(store.clone());

        let session = strategy.acquire("0xAAAA").await.unwrap();
        assert!(store.exists("lock:0xaaaa").await.unwrap());
        assert_eq!(store.list_len("lock:queue:0xaaaa").await.unwrap(), 0);

        strategy.release("0xaaaa", &session).await;
        assert!(!store.exists("lock:0xaaaa").await.unwrap());
        assert_eq!(metrics.active(STRATEGY_DISTRIBUTED), 0);
        assert_eq!(metrics.acquisition_count(STRATEGY_DISTRIBUTED, "acquired"), 1);
    }

    #[tokio::test]
    async fn test_contention_serializes_holders() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let (strategy, _) = strategy_over(store.clone());
        let strategy = Arc::new(strategy);

        let first = strategy.acquire("0xbbbb").await.unwrap();

        let contender = {
            let strategy = strategy.clone();
            tokio::spawn(async move { strategy.acquire("0xbbbb").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        strategy.release("0xbbbb", &first).await;
        let second = tokio::time::timeout(Duration::from_secs(2), contender)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(second.acquired_at >= first.acquired_at);
        strategy.release("0xbbbb", &second).await;
    }

    #[tokio::test]
    async fn test_foreign_session_cannot_release() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let (strategy, metrics) = strategy_over(store.clone());

        let session = strategy.acquire("0xcccc").await.unwrap();
        let forged = LockSession {
            session_key: "somebody-else".to_string(),
            acquired_at: Instant::now(),
        };
        strategy.release("0xCCCC", &forged).await;

        // Holder key is untouched and still ours.
        assert_eq!(
            store.get("lock:0xcccc").await.unwrap(),
            Some(session.session_key.clone())
        );
        assert_eq!(metrics.active(STRATEGY_DISTRIBUTED), 1);
        strategy.release("0xcccc", &session).await;
    }

    #[tokio::test]
    async fn test_release_after_ttl_counts_timeout() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let (strategy, metrics) = strategy_over(store.clone());

        let session = strategy.acquire("0xdddd").await.unwrap();
        // Wait past the hold deadline: the TTL reaps the holder key.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!store.exists("lock:0xdddd").await.unwrap());

        strategy.release("0xdddd", &session).await;
        assert_eq!(metrics.timeout_release_count(STRATEGY_DISTRIBUTED), 1);
    }

    #[tokio::test]
    async fn test_zombie_tail_is_removed() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let (strategy, metrics) = strategy_over(store.clone());

        // A dead waiter sits at the tail of the queue with no heartbeat.
        store
            .list_push_head("lock:queue:0xeeee", "dead-session")
            .await
            .unwrap();

        let session = tokio::time::timeout(Duration::from_secs(2), strategy.acquire("0xeeee"))
            .await
            .expect("zombie must not block a live waiter")
            .unwrap();
        assert_eq!(metrics.zombie_cleanup_count(), 1);
        assert_eq!(store.list_len("lock:queue:0xeeee").await.unwrap(), 0);
        strategy.release("0xeeee", &session).await;
    }

    #[tokio::test]
    async fn test_live_waiter_ahead_is_not_skipped() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let (strategy, metrics) = strategy_over(store.clone());

        // A live waiter (heartbeat present) is ahead of us in the queue.
        store
            .list_push_head("lock:queue:0xffff", "live-session")
            .await
            .unwrap();
        store
            .set_px("lock:heartbeat:live-session", "1", 10_000)
            .await
            .unwrap();

        let acquire = tokio::time::timeout(Duration::from_millis(100), async {
            strategy.acquire("0xffff").await
        })
        .await;
        // We must still be waiting behind the live entry.
        assert!(acquire.is_err());
        assert_eq!(metrics.zombie_cleanup_count(), 0);
        assert_eq!(
            store.list_index("lock:queue:0xffff", -1).await.unwrap(),
            Some("live-session".to_string())
        );
    }

    #[tokio::test]
    async fn test_store_fault_fails_open() {
        struct BrokenStore;

        #[async_trait]
        impl KvStore for BrokenStore {
            async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
                Err(StoreError::Unavailable("down".to_string()))
            }
            async fn set_px(&self, _: &str, _: &str, _: u64) -> Result<(), StoreError> {
                Err(StoreError::Unavailable("down".to_string()))
            }
            async fn set_nx_px(&self, _: &str, _: &str, _: u64) -> Result<bool, StoreError> {
                Err(StoreError::Unavailable("down".to_string()))
            }
            async fn del(&self, _: &str) -> Result<(), StoreError> {
                Err(StoreError::Unavailable("down".to_string()))
            }
            async fn exists(&self, _: &str) -> Result<bool, StoreError> {
                Err(StoreError::Unavailable("down".to_string()))
            }
            async fn list_push_head(&self, _: &str, _: &str) -> Result<(), StoreError> {
                Ok(())
            }
            async fn list_pop_tail(&self, _: &str) -> Result<Option<String>, StoreError> {
                Err(StoreError::Unavailable("down".to_string()))
            }
            async fn list_index(&self, _: &str, _: i64) -> Result<Option<String>, StoreError> {
                Err(StoreError::Unavailable("down".to_string()))
            }
            async fn list_remove(&self, _: &str, _: i64, _: &str) -> Result<u64, StoreError> {
                Ok(0)
            }
            async fn list_len(&self, _: &str) -> Result<u64, StoreError> {
                Ok(0)
            }
            async fn compare_and_delete(&self, _: &str, _: &str) -> Result<bool, StoreError> {
                Err(StoreError::Unavailable("down".to_string()))
            }
            async fn incr_px(&self, _: &str, _: u64) -> Result<i64, StoreError> {
                Err(StoreError::Unavailable("down".to_string()))
            }
            fn is_ready(&self) -> bool {
                true
            }
        }

        let (strategy, metrics) = strategy_over(Arc::new(BrokenStore));
        assert!(strategy.acquire("0x1111").await.is_none());
        assert_eq!(metrics.acquisition_count(STRATEGY_DISTRIBUTED, "failed"), 1);

        // Release against a broken store must not panic either.
        let session = LockSession {
            session_key: "s".to_string(),
            acquired_at: Instant::now(),
        };
        strategy.release("0x1111", &session).await;
    }
}
