//! Per-section distributed mutual exclusion with fencing tokens.
//!
//! A lock is a key in the coordinator keyspace whose value is a fresh token
//! owned by the holder. Release deletes the key only while it still holds
//! that token, so a holder whose lock expired can never clear a lock that
//! was since taken by someone else.

use futures::FutureExt;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::error::ReservationError;

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_millis(5000);
pub const DEFAULT_MAX_RETRIES: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Lock scoped to one section of one event.
    pub fn for_section(event_id: Uuid, section_id: Uuid) -> Self {
        Self(format!("booking:{event_id}:{section_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencingToken(String);

impl FencingToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub ttl: Duration,
    pub max_retries: u32,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_LOCK_TTL,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Proof of a successful acquisition, needed to release.
#[derive(Debug, Clone)]
pub struct LockHandle {
    pub key: LockKey,
    pub token: FencingToken,
    pub acquisition_time: Duration,
    pub attempts: u32,
}

/// Randomized delay between acquisition attempts.
///
/// The upper bound grows by `step` per failed attempt and never exceeds
/// `max`; the actual delay is drawn uniformly between `min` and that bound.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub min: Duration,
    pub step: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(50),
            step: Duration::from_millis(100),
            max: Duration::from_millis(1000),
        }
    }
}

impl Backoff {
    pub fn ceiling(&self, attempt: u32) -> Duration {
        (self.min + self.step.saturating_mul(attempt)).min(self.max).max(self.min)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if ceiling <= self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=ceiling)
    }
}

#[derive(Clone)]
pub struct LockCoordinator {
    coordinator: Arc<dyn Coordinator>,
    backoff: Backoff,
}

impl LockCoordinator {
    pub fn new(coordinator: Arc<dyn Coordinator>) -> Self {
        Self::with_backoff(coordinator, Backoff::default())
    }

    pub fn with_backoff(coordinator: Arc<dyn Coordinator>, backoff: Backoff) -> Self {
        Self {
            coordinator,
            backoff,
        }
    }

    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.coordinator
    }

    /// Tries up to `max_retries` times to take the lock.
    ///
    /// Contention and coordinator failures are treated alike: both count as
    /// a failed attempt, and exhausting the budget yields `LockTimeout`.
    pub async fn acquire(
        &self,
        key: &LockKey,
        options: &LockOptions,
    ) -> Result<LockHandle, ReservationError> {
        let token = FencingToken::generate();
        let started = Instant::now();
        let max_retries = options.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self
                .coordinator
                .set_if_absent(key.as_str(), token.as_str(), options.ttl)
                .await
            {
                Ok(true) => {
                    let acquisition_time = started.elapsed();
                    debug!(
                        "Lock acquired on attempt {} in {}ms",
                        attempt,
                        acquisition_time.as_millis()
                    );
                    return Ok(LockHandle {
                        key: key.clone(),
                        token,
                        acquisition_time,
                        attempts: attempt,
                    });
                }
                Ok(false) => debug!("Lock attempt {} failed: {} is held", attempt, key),
                Err(e) => debug!("Lock attempt {} failed: {}", attempt, e),
            }

            if attempt >= max_retries {
                warn!("Lock timeout for {} after {} attempts", key, attempt);
                return Err(ReservationError::LockTimeout {
                    key: key.to_string(),
                    attempts: attempt,
                });
            }

            tokio::time::sleep(self.backoff.delay(attempt)).await;
        }
    }

    /// Best-effort release; never fails the caller.
    ///
    /// A lock left behind by a failed release expires on its own TTL.
    pub async fn release(&self, handle: &LockHandle) {
        match self
            .coordinator
            .compare_and_delete(handle.key.as_str(), handle.token.as_str())
            .await
        {
            Ok(true) => debug!("Lock released: {}", handle.key),
            Ok(false) => warn!(
                "Lock {} was not released (expired or held by another token)",
                handle.key
            ),
            Err(e) => warn!("Error releasing lock {} (will expire by TTL): {}", handle.key, e),
        }
    }

    /// Runs `f` while holding the lock on `key`.
    ///
    /// The lock is released before returning whether `f` succeeds, fails or
    /// panics; `f`'s result (or panic) is passed through untouched.
    pub async fn with_lock<F, Fut, T>(
        &self,
        key: &LockKey,
        options: &LockOptions,
        f: F,
    ) -> Result<T, ReservationError>
    where
        F: FnOnce(LockHandle) -> Fut,
        Fut: Future<Output = Result<T, ReservationError>>,
    {
        let handle = self.acquire(key, options).await?;
        let outcome = AssertUnwindSafe(f(handle.clone())).catch_unwind().await;
        self.release(&handle).await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
