//! Error sanitization and log hygiene
//!
//! Raw errors never leave this boundary. Callers get one of a small, fixed set of
//! phrases; the raw text is written to the diagnostic log next to a request id.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use super::{SecurityError, APP_NAME, APP_VERSION};

/// Characters kept at each end by [`mask_address`]
pub const DEFAULT_VISIBLE_CHARS: usize = 4;

/// Replacement for values too short to mask partially
const FULL_MASK: &str = "***";

/// Failure categories with a user-facing phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    ConnectionRefused,
    Timeout,
    Tls,
    Certificate,
    Dns,
    ConnectionReset,
    ConnectionClosed,
    UntrustedEndpoint,
    InvalidResponse,
    Other,
}

impl ErrorCategory {
    /// Short generic phrase shown to users
    pub fn phrase(&self) -> &'static str {
        match self {
            ErrorCategory::ConnectionRefused => "Connection refused",
            ErrorCategory::Timeout => "Request timed out",
            ErrorCategory::Tls => "SSL/TLS error",
            ErrorCategory::Certificate => "Certificate verification failed",
            ErrorCategory::Dns => "DNS resolution failed",
            ErrorCategory::ConnectionReset => "Connection reset",
            ErrorCategory::ConnectionClosed => "Connection closed",
            ErrorCategory::UntrustedEndpoint => "Endpoint not trusted",
            ErrorCategory::InvalidResponse => "Invalid response",
            ErrorCategory::Other => "An error occurred",
        }
    }
}

/// Errors that know their sanitization category
pub trait Categorize {
    fn category(&self) -> ErrorCategory;
}

impl Categorize for SecurityError {
    fn category(&self) -> ErrorCategory {
        match self {
            SecurityError::UntrustedEndpoint(_) | SecurityError::InvalidEndpoint(_) => {
                ErrorCategory::UntrustedEndpoint
            }
            SecurityError::Tls(_) => ErrorCategory::Tls,
            SecurityError::PayloadTooLarge { .. } => ErrorCategory::InvalidResponse,
            SecurityError::InvalidAddress { .. } => ErrorCategory::Other,
        }
    }
}

/// Map an error to its user-facing phrase, logging the raw error under `request_id`
pub fn sanitize_error<E>(error: &E, request_id: &str) -> &'static str
where
    E: Categorize + fmt::Display + ?Sized,
{
    let category = error.category();
    tracing::debug!(
        request_id = %request_id,
        category = ?category,
        "raw error: {}",
        error
    );
    category.phrase()
}

/// Classify an arbitrary error by walking its source chain
pub fn classify_error(error: &(dyn StdError + 'static)) -> ErrorCategory {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);

    while let Some(err) = current {
        if let Some(tls) = err.downcast_ref::<rustls::Error>() {
            return classify_rustls(tls);
        }

        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            // io::Error::source() skips the wrapped error itself
            if let Some(tls) = io_err
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<rustls::Error>())
            {
                return classify_rustls(tls);
            }
            if let Some(category) = classify_io_kind(io_err.kind()) {
                return category;
            }
        }

        if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return ErrorCategory::Timeout;
        }

        let text = err.to_string().to_ascii_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
            || text.contains("no such host")
        {
            return ErrorCategory::Dns;
        }
        if text.contains("certificate") {
            return ErrorCategory::Certificate;
        }

        current = err.source();
    }

    ErrorCategory::Other
}

fn classify_rustls(error: &rustls::Error) -> ErrorCategory {
    match error {
        rustls::Error::InvalidCertificate(_) => ErrorCategory::Certificate,
        _ => ErrorCategory::Tls,
    }
}

fn classify_io_kind(kind: io::ErrorKind) -> Option<ErrorCategory> {
    match kind {
        io::ErrorKind::ConnectionRefused => Some(ErrorCategory::ConnectionRefused),
        io::ErrorKind::TimedOut => Some(ErrorCategory::Timeout),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
            Some(ErrorCategory::ConnectionReset)
        }
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => {
            Some(ErrorCategory::ConnectionClosed)
        }
        _ => None,
    }
}

/// Mask a value for logging: first and last `visible` characters joined by `...`
///
/// Values with `2 * visible` characters or fewer are masked completely.
pub fn mask(value: &str, visible: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if visible == 0 || chars.len() <= visible * 2 {
        return FULL_MASK.to_string();
    }

    let head: String = chars[..visible].iter().collect();
    let tail: String = chars[chars.len() - visible..].iter().collect();
    format!("{}...{}", head, tail)
}

/// [`mask`] with the default four visible characters
pub fn mask_address(address: &str) -> String {
    mask(address, DEFAULT_VISIBLE_CHARS)
}

/// Strip control characters (except newline and tab) and cap the length
pub fn sanitize_display_text(text: &str, max_length: usize) -> String {
    let cleaned: Vec<char> = text
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    if cleaned.len() <= max_length {
        return cleaned.into_iter().collect();
    }

    let keep = max_length.saturating_sub(3);
    let mut truncated: String = cleaned[..keep].iter().collect();
    truncated.push_str("...");
    truncated
}

/// Random 16 hex character id used to correlate log lines for one attempt
pub fn generate_request_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Generic User-Agent that does not expose platform details
pub fn safe_user_agent() -> String {
    format!("{}/{}", APP_NAME, APP_VERSION)
}

/// Reject payloads larger than `limit` bytes
pub fn check_size(size: usize, limit: usize) -> Result<(), SecurityError> {
    if size > limit {
        return Err(SecurityError::PayloadTooLarge { size, limit });
    }
    Ok(())
}
