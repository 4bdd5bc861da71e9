//! Reconnection backoff
//!
//! `Backoff` computes exponential delays with a ceiling and jitter.
//! `RetryController` couples it with the circuit breaker so a service loop has
//! one place to ask "may I try now" and one place to report the outcome.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;

use super::circuit_breaker::{Admission, BreakerTransition, CircuitBreaker};

/// Default first retry delay
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default delay ceiling
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default jitter as a fraction of the delay
pub const DEFAULT_JITTER: f64 = 0.1;

/// Exponential backoff with ceiling and jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: DEFAULT_JITTER,
            attempt: 0,
        }
    }

    /// Override the jitter fraction (clamped to 0..=1)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt`, without jitter: `min(base * 2^attempt, max)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Jittered delay for the current attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter <= 0.0 {
            return delay;
        }

        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        delay.mul_f64(factor).min(self.max)
    }

    /// Back to the base delay
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Retries since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Counters reported in a service status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryCounters {
    pub reconnect_attempts: u32,
    pub consecutive_failures: u32,
}

/// Result of asking whether an attempt may run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Go ahead; `probe` is set for the half-open trial attempt
    Proceed { probe: bool },
    /// Breaker open; re-check after this long
    Wait(Duration),
}

/// What the loop should do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub delay: Duration,
    pub transition: Option<BreakerTransition>,
}

/// Backoff plus circuit breaker, owned by one service loop
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    backoff: Backoff,
    breaker: CircuitBreaker,
}

impl RetryController {
    pub fn new(backoff: Backoff, breaker: CircuitBreaker) -> Self {
        Self { backoff, breaker }
    }

    /// Check the breaker at `now`
    ///
    /// Returns the transition to half-open when the cooldown has just expired.
    pub fn gate_at(&mut self, now: Instant) -> (Gate, Option<BreakerTransition>) {
        let (admission, transition) = self.breaker.try_acquire_at(now);
        let gate = match admission {
            Admission::Allowed => Gate::Proceed { probe: false },
            Admission::Probe => Gate::Proceed { probe: true },
            Admission::Refused { remaining } => Gate::Wait(remaining),
        };
        (gate, transition)
    }

    /// Record a failure on both the breaker and the backoff
    pub fn record_failure_at(&mut self, now: Instant) -> FailureOutcome {
        let transition = self.breaker.record_failure_at(now);
        let delay = self.backoff.next_delay();
        FailureOutcome { delay, transition }
    }

    /// Record a success, resetting both
    pub fn record_success(&mut self) -> Option<BreakerTransition> {
        self.backoff.reset();
        self.breaker.record_success()
    }

    pub fn counters(&self) -> RetryCounters {
        RetryCounters {
            reconnect_attempts: self.backoff.attempt(),
            consecutive_failures: self.breaker.consecutive_failures(),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}
