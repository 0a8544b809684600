//! Per-(client ip, method) rate limiting.
//!
//! Two implementations share one contract: a local in-memory window
//! counter, and a shared counter in the key-value store so every gateway
//! instance draws from the same budget. Store faults fail open with a
//! warning; a disabled limiter short-circuits to allow.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use mirrorgate_store::KvStore;

/// How often stale local counters are swept.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Decision surface consulted before every dispatch. Never errors: on any
/// internal fault the request is allowed through.
#[async_trait]
pub trait RateLimitService: Send + Sync {
    /// Returns true when the request must be rejected.
    async fn should_rate_limit(
        &self,
        ip: &str,
        method: &str,
        limit: u32,
        request_id: &str,
    ) -> bool;
}

/// No-op limiter for deployments that turn rate limiting off.
pub struct DisabledRateLimiter;

#[async_trait]
impl RateLimitService for DisabledRateLimiter {
    async fn should_rate_limit(&self, _: &str, _: &str, _: u32, _: &str) -> bool {
        false
    }
}

struct WindowCounter {
    count: u32,
    window_start: Instant,
}

/// In-process sliding window counter keyed `ip|method`.
pub struct LocalRateLimiter {
    counters: DashMap<String, WindowCounter>,
    window: Duration,
}

impl LocalRateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            counters: DashMap::new(),
            window,
        }
    }

    /// Drop counters whose window has long passed. Called periodically so
    /// per-client state stays bounded.
    pub fn cleanup(&self) {
        let window = self.window;
        self.counters
            .retain(|_, counter| counter.window_start.elapsed() < window * 2);
    }

    /// Spawn the periodic cleanup task for this limiter.
    pub fn start_cleanup_task(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                limiter.cleanup();
                debug!("rate limiter cleanup completed");
            }
        })
    }
}

#[async_trait]
impl RateLimitService for LocalRateLimiter {
    async fn should_rate_limit(
        &self,
        ip: &str,
        method: &str,
        limit: u32,
        request_id: &str,
    ) -> bool {
        let key = format!("{ip}|{method}");
        let mut counter = self.counters.entry(key).or_insert_with(|| WindowCounter {
            count: 0,
            window_start: Instant::now(),
        });

        if counter.window_start.elapsed() >= self.window {
            counter.count = 0;
            counter.window_start = Instant::now();
        }
        counter.count += 1;

        let limited = counter.count > limit;
        if limited {
            warn!(request_id, ip, method, "rate limit exceeded");
        }
        limited
    }
}

/// Counter shared across instances through the key-value store. The key
/// gets its TTL on the first increment of the window, so the window slides
/// from the first request.
pub struct SharedRateLimiter {
    store: Arc<dyn KvStore>,
    window_ms: u64,
}

impl SharedRateLimiter {
    pub fn new(store: Arc<dyn KvStore>, window: Duration) -> Self {
        Self {
            store,
            window_ms: window.as_millis() as u64,
        }
    }
}

#[async_trait]
impl RateLimitService for SharedRateLimiter {
    async fn should_rate_limit(
        &self,
        ip: &str,
        method: &str,
        limit: u32,
        request_id: &str,
    ) -> bool {
        let key = format!("ratelimit:{ip}:{method}");
        match self.store.incr_px(&key, self.window_ms).await {
            Ok(count) => {
                let limited = count > i64::from(limit);
                if limited {
                    warn!(request_id, ip, method, count, "rate limit exceeded");
                }
                limited
            }
            Err(err) => {
                warn!(request_id, ip, method, error = %err, "rate limiter store fault, failing open");
                false
            }
        }
    }
}

/// Mirror of the lock-strategy selection: shared counters when the store
/// is configured and ready, local otherwise, disabled when turned off.
pub fn create_rate_limiter(
    disabled: bool,
    window: Duration,
    store: Option<Arc<dyn KvStore>>,
) -> Arc<dyn RateLimitService> {
    if disabled {
        info!("rate limiting disabled");
        return Arc::new(DisabledRateLimiter);
    }
    match store {
        Some(store) if store.is_ready() => {
            info!("rate limiting using shared store counters");
            Arc::new(SharedRateLimiter::new(store, window))
        }
        _ => {
            info!("rate limiting using local counters");
            let limiter = Arc::new(LocalRateLimiter::new(window));
            limiter.start_cleanup_task(CLEANUP_INTERVAL);
            limiter
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorgate_store::MemoryStore;

    #[tokio::test]
    async fn test_local_limiter_denies_over_limit() {
        let limiter = LocalRateLimiter::new(Duration::from_secs(60));
        for _ in 0..3 {
            assert!(!limiter.should_rate_limit("1.2.3.4", "eth_call", 3, "r").await);
        }
        assert!(limiter.should_rate_limit("1.2.3.4", "eth_call", 3, "r").await);

        // other keys are unaffected
        assert!(!limiter.should_rate_limit("1.2.3.4", "eth_chainId", 3, "r").await);
        assert!(!limiter.should_rate_limit("5.6.7.8", "eth_call", 3, "r").await);
    }

    #[tokio::test]
    async fn test_local_limiter_window_resets() {
        let limiter = LocalRateLimiter::new(Duration::from_millis(50));
        assert!(!limiter.should_rate_limit("ip", "m", 1, "r").await);
        assert!(limiter.should_rate_limit("ip", "m", 1, "r").await);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!limiter.should_rate_limit("ip", "m", 1, "r").await);
    }

    #[tokio::test]
    async fn test_local_cleanup_bounds_state() {
        let limiter = LocalRateLimiter::new(Duration::from_millis(10));
        for i in 0..50 {
            limiter
                .should_rate_limit(&format!("10.0.0.{i}"), "eth_call", 5, "r")
                .await;
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        limiter.cleanup();
        assert!(limiter.counters.is_empty());
    }

    #[tokio::test]
    async fn test_shared_limiter_pools_across_instances() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let a = SharedRateLimiter::new(store.clone(), Duration::from_secs(2));
        let b = SharedRateLimiter::new(store.clone(), Duration::from_secs(2));

        // five through instance A
        for _ in 0..5 {
            assert!(!a.should_rate_limit("9.9.9.9", "eth_call", 5, "r").await);
        }
        // sixth through instance B shares the same counter
        assert!(b.should_rate_limit("9.9.9.9", "eth_call", 5, "r").await);
    }

    #[tokio::test]
    async fn test_shared_limiter_window_expires() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let limiter = SharedRateLimiter::new(store, Duration::from_millis(60));

        assert!(!limiter.should_rate_limit("ip", "m", 1, "r").await);
        assert!(limiter.should_rate_limit("ip", "m", 1, "r").await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!limiter.should_rate_limit("ip", "m", 1, "r").await);
    }

    #[tokio::test]
    async fn test_disabled_limiter_always_allows() {
        let limiter = DisabledRateLimiter;
        for _ in 0..100 {
            assert!(!limiter.should_rate_limit("ip", "m", 1, "r").await);
        }
    }

    #[tokio::test]
    async fn test_factory_selection() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let _shared = create_rate_limiter(false, Duration::from_secs(1), Some(store));
        let _local = create_rate_limiter(false, Duration::from_secs(1), None);
        let disabled = create_rate_limiter(true, Duration::from_secs(1), None);
        assert!(!disabled.should_rate_limit("ip", "m", 0, "r").await);
    }
}
