//! Client TLS policy
//!
//! Certificate chain and hostname verification against the webpki root store,
//! TLS 1.2 minimum. None of this is configurable.

use std::sync::Arc;

use rustls::version::{TLS12, TLS13};
use rustls::{ClientConfig, RootCertStore, SupportedProtocolVersion};

use super::SecurityError;

/// Protocol versions offered to peers, newest first
pub static TLS_PROTOCOL_VERSIONS: &[&SupportedProtocolVersion] = &[&TLS13, &TLS12];

/// Build the client TLS configuration shared by the HTTP and WebSocket adapters
pub fn build_tls_context() -> Result<Arc<ClientConfig>, SecurityError> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(TLS_PROTOCOL_VERSIONS)
        .map_err(|e| SecurityError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    tracing::debug!("TLS context built (min TLS 1.2, webpki roots)");
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_context_builds() {
        assert!(build_tls_context().is_ok());
    }

    #[test]
    fn test_no_legacy_versions() {
        assert_eq!(TLS_PROTOCOL_VERSIONS.len(), 2);
        assert!(TLS_PROTOCOL_VERSIONS
            .iter()
            .all(|v| v.version == rustls::ProtocolVersion::TLSv1_2
                || v.version == rustls::ProtocolVersion::TLSv1_3));
    }
}
