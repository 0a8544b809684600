//! Observation surface for the lock strategies.
//!
//! The strategies receive an `Arc<LockMetrics>` at construction instead of
//! reaching for a global registry, so tests and embedders control where
//! the series land.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};

/// Wait and hold buckets: 1 ms up to the 30 s hold ceiling.
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

pub struct LockMetrics {
    wait_seconds: HistogramVec,
    hold_seconds: HistogramVec,
    waiting_transactions: IntGaugeVec,
    active_count: IntGaugeVec,
    acquisitions: IntCounterVec,
    timeout_releases: IntCounterVec,
    zombie_cleanups: IntCounter,
    store_errors: IntCounterVec,
}

impl LockMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let wait_seconds = HistogramVec::new(
            HistogramOpts::new("lock_wait_seconds", "Time spent waiting to acquire a lock")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["strategy"],
        )?;
        let hold_seconds = HistogramVec::new(
            HistogramOpts::new("lock_hold_seconds", "Time a lock was held before release")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["strategy"],
        )?;
        let waiting_transactions = IntGaugeVec::new(
            Opts::new(
                "lock_waiting_transactions",
                "Number of transactions currently waiting on a lock",
            ),
            &["strategy"],
        )?;
        let active_count = IntGaugeVec::new(
            Opts::new("lock_active_count", "Number of locks currently held"),
            &["strategy"],
        )?;
        let acquisitions = IntCounterVec::new(
            Opts::new("lock_acquisitions_total", "Lock acquisition attempts by outcome"),
            &["strategy", "outcome"],
        )?;
        let timeout_releases = IntCounterVec::new(
            Opts::new(
                "lock_timeout_releases_total",
                "Locks reclaimed because the hold deadline elapsed",
            ),
            &["strategy"],
        )?;
        let zombie_cleanups = IntCounter::new(
            "lock_zombie_cleanups_total",
            "Queue entries removed because their heartbeat lapsed",
        )?;
        let store_errors = IntCounterVec::new(
            Opts::new("lock_store_errors_total", "Store faults observed by the lock path"),
            &["operation"],
        )?;

        registry.register(Box::new(wait_seconds.clone()))?;
        registry.register(Box::new(hold_seconds.clone()))?;
        registry.register(Box::new(waiting_transactions.clone()))?;
        registry.register(Box::new(active_count.clone()))?;
        registry.register(Box::new(acquisitions.clone()))?;
        registry.register(Box::new(timeout_releases.clone()))?;
        registry.register(Box::new(zombie_cleanups.clone()))?;
        registry.register(Box::new(store_errors.clone()))?;

        Ok(Self {
            wait_seconds,
            hold_seconds,
            waiting_transactions,
            active_count,
            acquisitions,
            timeout_releases,
            zombie_cleanups,
            store_errors,
        })
    }

    /// Metrics over a throwaway registry, for tests.
    pub fn unregistered() -> Self {
        Self::new(&Registry::new()).expect("metric construction cannot fail")
    }

    pub fn observe_wait(&self, strategy: &str, seconds: f64) {
        self.wait_seconds.with_label_values(&[strategy]).observe(seconds);
    }

    pub fn observe_hold(&self, strategy: &str, seconds: f64) {
        self.hold_seconds.with_label_values(&[strategy]).observe(seconds);
    }

    /// RAII guard around the waiting gauge so a cancelled acquire still
    /// decrements it.
    pub fn waiting_guard(&self, strategy: &str) -> WaitingGuard {
        let gauge = self.waiting_transactions.with_label_values(&[strategy]);
        gauge.inc();
        WaitingGuard { gauge }
    }

    pub fn lock_acquired(&self, strategy: &str) {
        self.acquisitions
            .with_label_values(&[strategy, "acquired"])
            .inc();
        self.active_count.with_label_values(&[strategy]).inc();
    }

    pub fn lock_failed(&self, strategy: &str) {
        self.acquisitions
            .with_label_values(&[strategy, "failed"])
            .inc();
    }

    pub fn lock_released(&self, strategy: &str, held_seconds: f64) {
        self.observe_hold(strategy, held_seconds);
        self.active_count.with_label_values(&[strategy]).dec();
    }

    pub fn timeout_release(&self, strategy: &str) {
        self.timeout_releases.with_label_values(&[strategy]).inc();
        self.active_count.with_label_values(&[strategy]).dec();
    }

    pub fn zombie_cleanup(&self) {
        self.zombie_cleanups.inc();
    }

    pub fn store_error(&self, operation: &str) {
        self.store_errors.with_label_values(&[operation]).inc();
    }

    // Raw accessors used by tests and the readiness probe.

    pub fn timeout_release_count(&self, strategy: &str) -> u64 {
        self.timeout_releases.with_label_values(&[strategy]).get()
    }

    pub fn zombie_cleanup_count(&self) -> u64 {
        self.zombie_cleanups.get()
    }

    pub fn active(&self, strategy: &str) -> i64 {
        self.active_count.with_label_values(&[strategy]).get()
    }

    pub fn wait_sample_count(&self, strategy: &str) -> u64 {
        self.wait_seconds
            .with_label_values(&[strategy])
            .get_sample_count()
    }

    pub fn acquisition_count(&self, strategy: &str, outcome: &str) -> u64 {
        self.acquisitions.with_label_values(&[strategy, outcome]).get()
    }
}

pub struct WaitingGuard {
    gauge: IntGauge,
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}
