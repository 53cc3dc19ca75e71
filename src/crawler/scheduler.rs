//! Backoff scheduling for quota exhaustion and throttling
//!
//! This module handles:
//! - Waiting out an exhausted quota by polling the reset time at a fixed interval
//! - A single coarse cool-down after a throttle response with no known reset
//! - Cooperative cancellation checked on every poll tick
//!
//! Waits are expressed against a `Clock` so they can be driven by real time
//! in production and by a manual clock in tests and simulations.

use crate::config::BackoffConfig;
use crate::state::ResetAt;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of wall-clock time and sleeps
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;

    /// Suspends the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Real time: `chrono::Utc::now` and `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock that only moves when slept on
///
/// `sleep` returns immediately after advancing the clock by the requested
/// duration, so multi-minute quota waits complete instantly while preserving
/// their ordering against reported reset times.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: AtomicUsize,
}

impl ManualClock {
    /// Creates a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: AtomicUsize::new(0),
        }
    }

    /// Moves the clock forward without counting a sleep
    pub fn advance(&self, duration: Duration) {
        if let Ok(delta) = chrono::Duration::from_std(duration) {
            let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
            *now += delta;
        }
    }

    /// Number of sleeps performed so far
    pub fn sleep_count(&self) -> usize {
        self.sleeps.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        self.sleeps.fetch_add(1, Ordering::AcqRel);
        tokio::task::yield_now().await;
    }
}

/// Cooperative cancellation flag shared between a crawl and its operator
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; observed at the next loop iteration or poll tick
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A wait was abandoned because cancellation was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Executes the suspensions decided by the rate budget tracker
#[derive(Clone)]
pub struct BackoffScheduler {
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    cool_down: Duration,
}

impl BackoffScheduler {
    /// Creates a scheduler with explicit intervals
    pub fn new(clock: Arc<dyn Clock>, poll_interval: Duration, cool_down: Duration) -> Self {
        Self {
            clock,
            poll_interval,
            cool_down,
        }
    }

    /// Creates a scheduler from configuration
    pub fn from_config(clock: Arc<dyn Clock>, config: &BackoffConfig) -> Self {
        Self::new(clock, config.poll_interval(), config.cool_down())
    }

    /// Blocks until the clock reaches `reset`
    ///
    /// Polls every `poll_interval`, re-reading the clock each tick. A reset
    /// value that cannot be parsed is logged and treated as already elapsed.
    ///
    /// # Returns
    ///
    /// * `Ok(ticks)` - number of poll intervals slept (0 if no wait was needed)
    /// * `Err(Interrupted)` - cancellation was observed before the reset
    pub async fn wait_until(
        &self,
        reset: &ResetAt,
        cancel: &CancelToken,
    ) -> Result<usize, Interrupted> {
        let deadline = match reset.parse() {
            Ok(deadline) => deadline,
            Err(e) => {
                tracing::warn!("{}; treating quota reset as already elapsed", e);
                return Ok(0);
            }
        };

        let mut ticks = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Interrupted);
            }

            let now = self.clock.now();
            if now >= deadline {
                if ticks > 0 {
                    tracing::info!("Quota reset reached after {} poll(s)", ticks);
                }
                return Ok(ticks);
            }

            if ticks == 0 {
                tracing::warn!(
                    "Quota exhausted, waiting {}s until reset at {}",
                    (deadline - now).num_seconds(),
                    deadline.to_rfc3339()
                );
            } else {
                tracing::trace!("Still {}s until quota reset", (deadline - now).num_seconds());
            }

            self.clock.sleep(self.poll_interval).await;
            ticks += 1;
        }
    }

    /// Sleeps once for the configured cool-down, or `retry_after` if longer
    ///
    /// Used when the remote throttled a request without reporting an
    /// exhausted quota, so the actual reset time is unknown.
    pub async fn cool_down(
        &self,
        retry_after: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<(), Interrupted> {
        let total = retry_after.map_or(self.cool_down, |r| r.max(self.cool_down));
        tracing::warn!("Throttled by remote, cooling down for {}s", total.as_secs());

        let mut waited = Duration::ZERO;
        while waited < total {
            if cancel.is_cancelled() {
                return Err(Interrupted);
            }
            let step = self.poll_interval.min(total - waited);
            self.clock.sleep(step).await;
            waited += step;
        }

        if cancel.is_cancelled() {
            return Err(Interrupted);
        }
        Ok(())
    }

    /// Sleeps a single poll interval
    pub async fn pause(&self, cancel: &CancelToken) -> Result<(), Interrupted> {
        if cancel.is_cancelled() {
            return Err(Interrupted);
        }
        self.clock.sleep(self.poll_interval).await;
        if cancel.is_cancelled() {
            return Err(Interrupted);
        }
        Ok(())
    }
}

impl std::fmt::Debug for BackoffScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffScheduler")
            .field("poll_interval", &self.poll_interval)
            .field("cool_down", &self.cool_down)
            .finish()
    }
}
