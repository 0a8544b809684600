//! In-process lock strategy.
//!
//! One async mutex per lock id, held in a bounded LRU so per-sender state
//! cannot grow without limit. An entry evicted while its mutex is still
//! held releases the mutex as part of eviction; a holder that outlives the
//! hold deadline is force-released by a timer and counted as a timeout
//! release.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::sync::Cache;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::metrics::LockMetrics;
use crate::{LockConfig, LockSession, LockStrategy, normalize_lock_id};

pub(crate) const STRATEGY_LOCAL: &str = "local";

struct HeldLock {
    session_key: String,
    acquired_at: Instant,
    // Dropping the guard is the release.
    _guard: OwnedMutexGuard<()>,
    expiry_timer: JoinHandle<()>,
}

struct LockEntry {
    mutex: Arc<tokio::sync::Mutex<()>>,
    held: Mutex<Option<HeldLock>>,
}

impl LockEntry {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            mutex: Arc::new(tokio::sync::Mutex::new(())),
            held: Mutex::new(None),
        })
    }

    /// Drop the held state if `session_key` matches (or unconditionally
    /// when `session_key` is `None`). Returns the hold duration when a
    /// release actually happened.
    fn take_held(&self, session_key: Option<&str>) -> Option<Duration> {
        let mut held = self.held.lock();
        let owns = match (held.as_ref(), session_key) {
            (Some(current), Some(wanted)) => current.session_key == wanted,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !owns {
            return None;
        }
        let state = held.take()?;
        state.expiry_timer.abort();
        Some(state.acquired_at.elapsed())
    }
}

pub struct LocalLockStrategy {
    entries: Cache<String, Arc<LockEntry>>,
    max_hold: Duration,
    metrics: Arc<LockMetrics>,
}

impl LocalLockStrategy {
    pub fn new(config: &LockConfig, metrics: Arc<LockMetrics>) -> Self {
        let eviction_metrics = metrics.clone();
        let entries = Cache::builder()
            .max_capacity(config.local_max_entries)
            .time_to_idle(config.local_entry_ttl)
            .eviction_listener(move |key: Arc<String>, entry: Arc<LockEntry>, _cause| {
                // An entry must never leave the cache with its mutex held.
                if entry.take_held(None).is_some() {
                    tracing::warn!(lock_id = %key, "evicting lock entry while held, forcing release");
                    eviction_metrics.timeout_release(STRATEGY_LOCAL);
                }
            })
            .build();

        Self {
            entries,
            max_hold: config.max_hold,
            metrics,
        }
    }

    /// Number of lock entries currently cached.
    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}

#[async_trait]
impl LockStrategy for LocalLockStrategy {
    async fn acquire(&self, lock_id: &str) -> Option<LockSession> {
        let id = normalize_lock_id(lock_id);
        let entry = self.entries.get_with(id.clone(), LockEntry::new);

        let wait_start = Instant::now();
        let guard = {
            let _waiting = self.metrics.waiting_guard(STRATEGY_LOCAL);
            entry.mutex.clone().lock_owned().await
        };
        self.metrics
            .observe_wait(STRATEGY_LOCAL, wait_start.elapsed().as_secs_f64());

        let session_key = Uuid::new_v4().simple().to_string();
        let acquired_at = Instant::now();

        // Reclaim the mutex if the holder never comes back.
        let timer_entry = entry.clone();
        let timer_session = session_key.clone();
        let timer_metrics = self.metrics.clone();
        let max_hold = self.max_hold;
        let expiry_timer = tokio::spawn(async move {
            tokio::time::sleep(max_hold).await;
            if timer_entry.take_held(Some(&timer_session)).is_some() {
                tracing::warn!("lock hold deadline elapsed, forcing release");
                timer_metrics.timeout_release(STRATEGY_LOCAL);
            }
        });

        *entry.held.lock() = Some(HeldLock {
            session_key: session_key.clone(),
            acquired_at,
            _guard: guard,
            expiry_timer,
        });
        self.metrics.lock_acquired(STRATEGY_LOCAL);

        Some(LockSession {
            session_key,
            acquired_at,
        })
    }

    async fn release(&self, lock_id: &str, session: &LockSession) {
        let id = normalize_lock_id(lock_id);
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        if let Some(held_for) = entry.take_held(Some(&session.session_key)) {
            self.metrics
                .lock_released(STRATEGY_LOCAL, held_for.as_secs_f64());
        }
    }

    fn name(&self) -> &'static str {
        STRATEGY_LOCAL
    }
}
