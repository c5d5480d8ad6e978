use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Booking counters shared by the orchestrator and the `/metrics` route.
#[derive(Debug)]
pub struct BookingMetrics {
    started_at_ms: AtomicI64,
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejected: AtomicU64,
    lock_timeouts: AtomicU64,
    lock_wait_ms: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Seconds since start or last reset, two decimals.
    pub uptime: String,
    pub booking_attempts: u64,
    pub booking_successes: u64,
    pub booking_failures: u64,
    pub booking_rejected: u64,
    pub lock_timeouts: u64,
    pub avg_lock_wait_ms: u64,
    pub success_rate: String,
}

impl Default for BookingMetrics {
    fn default() -> Self {
        Self {
            started_at_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            lock_timeouts: AtomicU64::new(0),
            lock_wait_ms: AtomicU64::new(0),
        }
    }
}

impl BookingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, lock_wait: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        let ms = u64::try_from(lock_wait.as_millis()).unwrap_or(u64::MAX);
        self.lock_wait_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A request refused by validation, before any lock was tried.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let attempts = self.attempts.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let lock_wait_ms = self.lock_wait_ms.load(Ordering::Relaxed);

        let elapsed_ms = Utc::now().timestamp_millis() - self.started_at_ms.load(Ordering::Relaxed);
        let success_rate = if attempts > 0 {
            format!("{:.2}%", successes as f64 / attempts as f64 * 100.0)
        } else {
            "0%".to_string()
        };

        MetricsSnapshot {
            uptime: format!("{:.2}", elapsed_ms.max(0) as f64 / 1000.0),
            booking_attempts: attempts,
            booking_successes: successes,
            booking_failures: self.failures.load(Ordering::Relaxed),
            booking_rejected: self.rejected.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            avg_lock_wait_ms: lock_wait_ms.checked_div(successes).unwrap_or(0),
            success_rate,
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.attempts,
            &self.successes,
            &self.failures,
            &self.rejected,
            &self.lock_timeouts,
            &self.lock_wait_ms,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.started_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}
