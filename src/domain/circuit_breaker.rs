//! Circuit Breaker
//!
//! Connection-level failure protection. After too many consecutive failures the
//! breaker opens and refuses attempts until a cooldown expires, then lets a
//! single probe through. Each trip without an intervening close doubles the
//! cooldown up to a ceiling.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Default consecutive failures before the breaker opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default cooldown after the first trip, in seconds
pub const DEFAULT_COOLDOWN_SECS: u64 = 30;

/// Default cooldown ceiling, in seconds
pub const DEFAULT_MAX_COOLDOWN_SECS: u64 = 300;

/// Status of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerStatus {
    /// Attempts allowed
    Closed,
    /// Attempts refused until the cooldown expires
    Open,
    /// One probe attempt allowed
    HalfOpen,
}

/// State change produced by a breaker operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    Opened,
    HalfOpened,
    Closed,
}

/// Outcome of asking the breaker for permission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed
    Allowed,
    /// Cooldown elapsed; this attempt is the half-open probe
    Probe,
    /// Breaker open
    Refused { remaining: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Refused { .. })
    }
}

/// Failure-threshold circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    /// Consecutive failures before opening
    failure_threshold: u32,
    /// Cooldown of the first trip
    base_cooldown: Duration,
    /// Cooldown ceiling
    max_cooldown: Duration,

    // State
    status: BreakerStatus,
    consecutive_failures: u32,
    /// Trips since the breaker last closed
    trips: u32,
    opened_at: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_config(
            DEFAULT_FAILURE_THRESHOLD,
            Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            Duration::from_secs(DEFAULT_MAX_COOLDOWN_SECS),
        )
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a circuit breaker with custom settings
    pub fn with_config(failure_threshold: u32, base_cooldown: Duration, max_cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            base_cooldown,
            max_cooldown: max_cooldown.max(base_cooldown),
            status: BreakerStatus::Closed,
            consecutive_failures: 0,
            trips: 0,
            opened_at: None,
        }
    }

    /// Current status
    pub fn status(&self) -> BreakerStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Cooldown applied to the current trip count
    pub fn current_cooldown(&self) -> Duration {
        let exponent = self.trips.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_cooldown
            .checked_mul(factor)
            .map_or(self.max_cooldown, |d| d.min(self.max_cooldown))
    }

    /// Cooldown left while open, `None` otherwise
    pub fn remaining_cooldown_at(&self, now: Instant) -> Option<Duration> {
        match (self.status, self.opened_at) {
            (BreakerStatus::Open, Some(opened_at)) => {
                let elapsed = now.saturating_duration_since(opened_at);
                Some(self.current_cooldown().saturating_sub(elapsed))
            }
            _ => None,
        }
    }

    /// Ask for permission to attempt at `now`
    ///
    /// While open with cooldown left this refuses without touching state. Once the
    /// cooldown expires the breaker moves to half-open and grants one probe.
    pub fn try_acquire_at(&mut self, now: Instant) -> (Admission, Option<BreakerTransition>) {
        match self.status {
            BreakerStatus::Closed => (Admission::Allowed, None),
            BreakerStatus::HalfOpen => (Admission::Probe, None),
            BreakerStatus::Open => {
                let remaining = self.remaining_cooldown_at(now).unwrap_or(Duration::ZERO);
                if !remaining.is_zero() {
                    return (Admission::Refused { remaining }, None);
                }
                self.status = BreakerStatus::HalfOpen;
                tracing::info!("Circuit breaker cooldown complete, probing");
                (Admission::Probe, Some(BreakerTransition::HalfOpened))
            }
        }
    }

    /// Record a successful attempt
    pub fn record_success(&mut self) -> Option<BreakerTransition> {
        self.consecutive_failures = 0;

        if self.status == BreakerStatus::Closed {
            return None;
        }

        tracing::info!("Circuit breaker closed after successful probe");
        self.status = BreakerStatus::Closed;
        self.trips = 0;
        self.opened_at = None;
        Some(BreakerTransition::Closed)
    }

    /// Record a failed attempt at `now`
    pub fn record_failure_at(&mut self, now: Instant) -> Option<BreakerTransition> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        match self.status {
            BreakerStatus::HalfOpen => {
                self.trip(now);
                tracing::warn!(
                    "Circuit breaker probe failed, reopening for {:?}",
                    self.current_cooldown()
                );
                Some(BreakerTransition::Opened)
            }
            BreakerStatus::Closed if self.consecutive_failures >= self.failure_threshold => {
                self.trip(now);
                tracing::error!(
                    "CIRCUIT BREAKER OPEN: {} consecutive failures, cooldown {:?}",
                    self.consecutive_failures,
                    self.current_cooldown()
                );
                Some(BreakerTransition::Opened)
            }
            _ => {
                tracing::debug!(
                    "Failure recorded ({}/{})",
                    self.consecutive_failures,
                    self.failure_threshold
                );
                None
            }
        }
    }

    fn trip(&mut self, now: Instant) {
        self.status = BreakerStatus::Open;
        self.trips = self.trips.saturating_add(1);
        self.opened_at = Some(now);
    }
}
