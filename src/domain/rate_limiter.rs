//! Sliding-window rate limiter
//!
//! One instance per outbound-request service, owned by that service's loop.
//! Timestamps older than the window are pruned lazily on each check, so the
//! record never holds more than `max_requests` entries.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Default maximum requests per window
pub const DEFAULT_MAX_REQUESTS: usize = 30;

/// Default window length in seconds
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Sliding-window admission control
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Maximum admitted requests inside one window
    max_requests: usize,
    /// Window length
    window: Duration,
    /// Admission times, oldest first
    request_timestamps: VecDeque<Instant>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, Duration::from_secs(DEFAULT_WINDOW_SECS))
    }
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            request_timestamps: VecDeque::with_capacity(max_requests),
        }
    }

    /// Admit a request now
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Admit a request at `now`, recording it on success
    pub fn allow_at(&mut self, now: Instant) -> bool {
        self.prune(now);

        if self.request_timestamps.len() >= self.max_requests {
            tracing::debug!(
                "Rate limited: {} requests in the last {:?}",
                self.request_timestamps.len(),
                self.window
            );
            return false;
        }

        self.request_timestamps.push_back(now);
        true
    }

    /// Time until the next request would be admitted (zero if admitted now)
    pub fn time_until_available_at(&mut self, now: Instant) -> Duration {
        self.prune(now);

        if self.request_timestamps.len() < self.max_requests {
            return Duration::ZERO;
        }

        self.request_timestamps
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Requests currently counted in the window
    pub fn in_window(&self) -> usize {
        self.request_timestamps.len()
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(&mut self, now: Instant) {
        while self
            .request_timestamps
            .front()
            .map_or(false, |t| now.saturating_duration_since(*t) >= self.window)
        {
            self.request_timestamps.pop_front();
        }
    }
}
