//! Domain Layer - Core types and resilience logic for the XRP ticker
//!
//! Pure state machines and value types. Nothing here performs I/O; time is
//! passed in explicitly so every rule can be tested without sleeping.
//!
//! - `rate_limiter`: sliding-window admission control
//! - `circuit_breaker`: failure-threshold state machine
//! - `backoff`: exponential retry delays coupled to the breaker
//! - `status`: immutable service status values
//! - `snapshot`: price and balance snapshots

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod snapshot;
pub mod status;

pub use backoff::{Backoff, FailureOutcome, Gate, RetryController, RetryCounters};
pub use circuit_breaker::{
    Admission, BreakerStatus, BreakerTransition, CircuitBreaker,
    DEFAULT_COOLDOWN_SECS, DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_COOLDOWN_SECS,
};
pub use rate_limiter::{RateLimiter, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS};
pub use snapshot::{
    drops_to_xrp, BalanceBook, BalanceSnapshot, MarketQuote, PriceSnapshot, SnapshotError, XRP_MAX_SUPPLY_DROPS,
};
pub use status::{ConnectionState, ServiceStatus, STALE_AFTER_SECS};
