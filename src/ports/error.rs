//! Fetch Error Types
//!
//! One taxonomy for everything that can go wrong between a service loop and
//! the network. Variants carry raw detail for the diagnostic log only; what
//! callers see is the category phrase.

use std::io;

use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::error::{CapacityError, ProtocolError};

use crate::domain::SnapshotError;
use crate::security::{classify_error, Categorize, ErrorCategory, SecurityError};

/// Errors from a price feed or ledger session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Request timed out")]
    Timeout,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Connection closed")]
    ConnectionClosed,

    /// Non-success HTTP status
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// Payload over its size ceiling, discarded unparsed
    #[error("Payload of {size} bytes exceeds limit of {limit} bytes")]
    Oversized { size: usize, limit: usize },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Untrusted endpoint: {0}")]
    UntrustedEndpoint(String),

    /// Error reported by the remote side inside a well-formed response
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Build the variant matching a classified category
    pub fn from_category(category: ErrorCategory, detail: String) -> Self {
        match category {
            ErrorCategory::ConnectionRefused => FetchError::ConnectionRefused(detail),
            ErrorCategory::Timeout => FetchError::Timeout,
            ErrorCategory::Tls => FetchError::Tls(detail),
            ErrorCategory::Certificate => FetchError::Certificate(detail),
            ErrorCategory::Dns => FetchError::Dns(detail),
            ErrorCategory::ConnectionReset => FetchError::ConnectionReset(detail),
            ErrorCategory::ConnectionClosed => FetchError::ConnectionClosed,
            ErrorCategory::UntrustedEndpoint => FetchError::UntrustedEndpoint(detail),
            ErrorCategory::InvalidResponse => FetchError::Malformed(detail),
            ErrorCategory::Other => FetchError::Other(detail),
        }
    }

    /// Static configuration problem; retrying cannot help
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::UntrustedEndpoint(_))
    }

    /// The transport itself failed; a streaming session must be re-established
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            FetchError::ConnectionRefused(_)
                | FetchError::Timeout
                | FetchError::Tls(_)
                | FetchError::Certificate(_)
                | FetchError::Dns(_)
                | FetchError::ConnectionReset(_)
                | FetchError::ConnectionClosed
                | FetchError::Oversized { .. }
                | FetchError::UntrustedEndpoint(_)
        )
    }
}

impl Categorize for FetchError {
    fn category(&self) -> ErrorCategory {
        match self {
            FetchError::ConnectionRefused(_) => ErrorCategory::ConnectionRefused,
            FetchError::Timeout => ErrorCategory::Timeout,
            FetchError::Tls(_) => ErrorCategory::Tls,
            FetchError::Certificate(_) => ErrorCategory::Certificate,
            FetchError::Dns(_) => ErrorCategory::Dns,
            FetchError::ConnectionReset(_) => ErrorCategory::ConnectionReset,
            FetchError::ConnectionClosed => ErrorCategory::ConnectionClosed,
            FetchError::HttpStatus(_) | FetchError::Oversized { .. } | FetchError::Malformed(_) => {
                ErrorCategory::InvalidResponse
            }
            FetchError::UntrustedEndpoint(_) => ErrorCategory::UntrustedEndpoint,
            FetchError::Upstream(_) | FetchError::Other(_) => ErrorCategory::Other,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::HttpStatus(status.as_u16())
        } else if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::from_category(classify_error(&err), err.to_string())
        }
    }
}

impl From<tungstenite::Error> for FetchError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                FetchError::ConnectionClosed
            }
            tungstenite::Error::Io(io_err) => FetchError::from(io_err),
            tungstenite::Error::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
                FetchError::Oversized { size, limit: max_size }
            }
            tungstenite::Error::Capacity(capacity) => FetchError::Malformed(capacity.to_string()),
            tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                FetchError::ConnectionReset("reset without closing handshake".to_string())
            }
            tungstenite::Error::Protocol(protocol) => FetchError::Malformed(protocol.to_string()),
            tungstenite::Error::Url(url_err) => FetchError::UntrustedEndpoint(url_err.to_string()),
            tungstenite::Error::Http(response) => FetchError::HttpStatus(response.status().as_u16()),
            other => FetchError::from_category(classify_error(&other), other.to_string()),
        }
    }
}

impl From<io::Error> for FetchError {
    fn from(err: io::Error) -> Self {
        FetchError::from_category(classify_error(&err), err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Malformed(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for FetchError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        FetchError::Timeout
    }
}

impl From<SecurityError> for FetchError {
    fn from(err: SecurityError) -> Self {
        match err {
            SecurityError::UntrustedEndpoint(_) | SecurityError::InvalidEndpoint(_) => {
                FetchError::UntrustedEndpoint(err.to_string())
            }
            SecurityError::Tls(detail) => FetchError::Tls(detail),
            SecurityError::PayloadTooLarge { size, limit } => FetchError::Oversized { size, limit },
            SecurityError::InvalidAddress { .. } => FetchError::Other(err.to_string()),
        }
    }
}

impl From<SnapshotError> for FetchError {
    fn from(err: SnapshotError) -> Self {
        FetchError::Malformed(err.to_string())
    }
}
