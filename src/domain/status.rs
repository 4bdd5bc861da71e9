//! Service connection status
//!
//! A `ServiceStatus` is a value: every transition builds a new one. The owning
//! service swaps it in and hands a copy to its status listener.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use super::backoff::RetryCounters;

/// Age after which data is considered stale
pub const STALE_AFTER_SECS: i64 = 30;

/// Connection state of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Failed,
    Disconnected,
}

impl ConnectionState {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Failed => "Failed",
            ConnectionState::Disconnected => "Disconnected",
        }
    }
}

/// Immutable status snapshot of one service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    service: &'static str,
    state: ConnectionState,
    last_error: Option<String>,
    reconnect_attempts: u32,
    consecutive_failures: u32,
    last_update: Option<DateTime<Utc>>,
    timestamp: DateTime<Utc>,
}

impl ServiceStatus {
    /// Initial status of a service that has never run
    pub fn initial(service: &'static str) -> Self {
        Self {
            service,
            state: ConnectionState::Disconnected,
            last_error: None,
            reconnect_attempts: 0,
            consecutive_failures: 0,
            last_update: None,
            timestamp: Utc::now(),
        }
    }

    /// Build the next status. `last_error` must already be sanitized.
    pub fn transition(
        &self,
        state: ConnectionState,
        last_error: Option<&str>,
        counters: RetryCounters,
    ) -> Self {
        Self {
            service: self.service,
            state,
            last_error: last_error.map(str::to_string),
            reconnect_attempts: counters.reconnect_attempts,
            consecutive_failures: counters.consecutive_failures,
            last_update: self.last_update,
            timestamp: Utc::now(),
        }
    }

    /// Same status, recording a successful data update at `at`
    pub fn touched(&self, at: DateTime<Utc>) -> Self {
        Self {
            last_update: Some(at),
            ..self.clone()
        }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// True when no update arrived in the last [`STALE_AFTER_SECS`] seconds
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.last_update {
            None => true,
            Some(at) => now - at > ChronoDuration::seconds(STALE_AFTER_SECS),
        }
    }
}
