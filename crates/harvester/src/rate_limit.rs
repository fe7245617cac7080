//! Header-driven rate limiting.
//!
//! GitHub reports the remaining call budget and the reset time on every
//! response. [`RateLimiter`] keeps the latest values and suspends the caller
//! before a request once the budget is down to its last call.
//!
//! ```ignore
//! let limiter = RateLimiter::new();
//!
//! limiter.before_call().await;
//! let response = transport.get(request).await?;
//! limiter.record_response(remaining, reset_at);
//! ```

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Margin added on top of the server-reported reset time.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(1);

/// Wait used when the server rejects a call without saying when to retry.
pub const FALLBACK_REJECTION_WAIT: Duration = Duration::from_secs(60);

/// Last known rate-limit budget.
///
/// `remaining: None` means the budget is unknown (nothing reported yet, or
/// a wait has just elapsed) and is treated as unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitState {
    /// Whether the next call would spend the last unit of budget.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self.remaining, Some(remaining) if remaining <= 1)
    }

    /// Time left until the reset if the budget is exhausted and the reset
    /// is still in the future.
    #[must_use]
    pub fn wait_needed(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.is_exhausted() {
            return None;
        }
        let reset_at = self.reset_at?;
        (reset_at - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

/// Throttle driven by response metadata.
///
/// This is a pure throttle, not a circuit breaker: it never fails, it only
/// delays. State lives behind a mutex so the limiter can be shared by
/// reference; the lock is never held across an await point.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<RateLimitState>,
    margin: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_margin(DEFAULT_SAFETY_MARGIN)
    }

    pub fn with_margin(margin: Duration) -> Self {
        Self {
            state: Mutex::new(RateLimitState::default()),
            margin,
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> RateLimitState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the budget reported by a response, successful or not.
    pub fn record_response(&self, remaining: u64, reset_at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.remaining = Some(remaining);
        state.reset_at = Some(reset_at);
    }

    /// Suspend until a call is allowed.
    ///
    /// Returns the time spent waiting, or `None` when no wait was needed.
    pub async fn before_call(&self) -> Option<Duration> {
        let wait = self.state().wait_needed(Utc::now())?;
        let wait = wait + self.margin;

        tracing::warn!(
            wait_secs = wait.as_secs(),
            "Rate limit budget exhausted, waiting for reset"
        );
        self.sleep_and_reset(wait).await;
        Some(wait)
    }

    /// Wait after the server rejected a call for rate-limit reasons.
    ///
    /// Prefers the server's `Retry-After`, then the known reset time, then a
    /// fixed fallback, so a rejection is never retried without waiting.
    pub async fn wait_after_rejection(&self, retry_after: Option<Duration>) -> Duration {
        let state = self.state();
        let wait = match retry_after {
            Some(retry_after) => retry_after,
            None => state
                .reset_at
                .and_then(|reset_at| (reset_at - Utc::now()).to_std().ok())
                .filter(|d| !d.is_zero())
                .map(|d| d + self.margin)
                .unwrap_or(FALLBACK_REJECTION_WAIT),
        };

        tracing::warn!(
            wait_secs = wait.as_secs(),
            "Request rejected by rate limit, waiting before retry"
        );
        self.sleep_and_reset(wait).await;
        wait
    }

    async fn sleep_and_reset(&self, wait: Duration) {
        tokio::time::sleep(wait).await;

        // The window has rolled over; the next response reports the new budget.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.remaining = None;
    }
}
