//! Security Gateway
//!
//! Every byte that crosses between the network and the rest of the process goes
//! through this module:
//! - `endpoint`: `wss://` allowlist for XRPL nodes
//! - `tls`: the single, non-configurable client TLS policy
//! - `sanitize`: error sanitization, masking, request ids, size ceilings
//! - `address`: XRP classic address validation
//!
//! All tables here are process-wide constants. Nothing in this module is mutable.

pub mod address;
pub mod endpoint;
pub mod sanitize;
pub mod tls;

use thiserror::Error;

pub use address::validate_xrp_address;
pub use endpoint::{is_trusted_endpoint, validate_endpoint};
pub use sanitize::{
    check_size, classify_error, generate_request_id, mask, mask_address, safe_user_agent,
    sanitize_display_text, sanitize_error, Categorize, ErrorCategory,
};
pub use tls::build_tls_context;

/// Trusted domains for XRPL WebSocket endpoints
pub const TRUSTED_XRPL_DOMAINS: [&str; 4] = [
    "xrplcluster.com",
    "s1.ripple.com",
    "s2.ripple.com",
    "xrpl.ws",
];

/// Maximum inbound WebSocket message (1 MiB)
pub const MAX_WS_MESSAGE: usize = 1024 * 1024;

/// Maximum HTTP response body (10 MiB)
pub const MAX_HTTP_RESPONSE: usize = 10 * 1024 * 1024;

/// Maximum configuration file (64 KiB)
pub const MAX_CONFIG_FILE: usize = 64 * 1024;

/// Application name used in the User-Agent header
pub const APP_NAME: &str = "XRP-Ticker";

/// Application version used in the User-Agent header
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Security policy violations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Untrusted endpoint: {0}")]
    UntrustedEndpoint(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("TLS configuration failed: {0}")]
    Tls(String),

    #[error("Payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Invalid XRP address {address}: {reason}")]
    InvalidAddress { address: String, reason: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_ceilings() {
        assert_eq!(MAX_WS_MESSAGE, 1_048_576);
        assert_eq!(MAX_HTTP_RESPONSE, 10_485_760);
        assert_eq!(MAX_CONFIG_FILE, 65_536);
        assert!(MAX_WS_MESSAGE < MAX_HTTP_RESPONSE);
    }

    #[test]
    fn test_trusted_domains_are_exactly_four() {
        assert_eq!(TRUSTED_XRPL_DOMAINS.len(), 4);
        assert!(TRUSTED_XRPL_DOMAINS.contains(&"xrplcluster.com"));
        assert!(TRUSTED_XRPL_DOMAINS.contains(&"xrpl.ws"));
    }
}
