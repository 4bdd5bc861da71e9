//! XRPL WebSocket Client
//!
//! One session is one TLS WebSocket to an allowlisted node. Requests carry an
//! id and are answered in order on the same socket; transaction notifications
//! that arrive while a request is pending are queued for `next_activity`.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustls::ClientConfig;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use super::types::{
    account_info_request, parse_balance, parse_message, subscribe_request, LedgerMessage, ACCOUNT_NOT_FOUND,
};
use crate::ports::{AccountActivity, FetchError, LedgerConnector, LedgerSession};
use crate::security::{build_tls_context, check_size, sanitize_display_text, validate_endpoint, MAX_WS_MESSAGE};

/// Longest node error code kept for logs
const MAX_ERROR_CODE_LEN: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens XRPL sessions with the shared TLS policy
#[derive(Clone)]
pub struct XrplConnector {
    tls: Arc<ClientConfig>,
}

impl XrplConnector {
    pub fn new() -> Result<Self, FetchError> {
        Ok(Self {
            tls: build_tls_context()?,
        })
    }

    fn ws_config() -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(MAX_WS_MESSAGE))
            .max_frame_size(Some(MAX_WS_MESSAGE))
    }
}

#[async_trait]
impl LedgerConnector for XrplConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn LedgerSession>, FetchError> {
        let endpoint = validate_endpoint(endpoint.as_str())?;
        let host = endpoint.host_str().unwrap_or_default().to_string();

        let (stream, _) = connect_async_tls_with_config(
            endpoint.as_str(),
            Some(Self::ws_config()),
            false,
            Some(Connector::Rustls(Arc::clone(&self.tls))),
        )
        .await?;

        debug!("XRPL: WebSocket open to {}", host);
        Ok(Box::new(XrplSession::new(stream, host)))
    }
}

/// Live session with one node
pub struct XrplSession {
    stream: WsStream,
    host: String,
    next_id: u64,
    pending: VecDeque<AccountActivity>,
}

impl XrplSession {
    fn new(stream: WsStream, host: String) -> Self {
        Self {
            stream,
            host,
            next_id: 1,
            pending: VecDeque::new(),
        }
    }

    /// Read frames until one decodes to a message
    ///
    /// Cancel safe: nothing is buffered across the single `next()` await.
    async fn read_message(&mut self) -> Result<LedgerMessage, FetchError> {
        loop {
            let frame = match self.stream.next().await {
                Some(frame) => frame?,
                None => return Err(FetchError::ConnectionClosed),
            };

            match frame {
                Message::Text(text) => {
                    check_size(text.len(), MAX_WS_MESSAGE)?;
                    return parse_message(text.as_str());
                }
                Message::Binary(data) => {
                    check_size(data.len(), MAX_WS_MESSAGE)?;
                    trace!("XRPL: ignoring {} byte binary frame", data.len());
                }
                Message::Close(_) => return Err(FetchError::ConnectionClosed),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    /// Send one request and wait for its reply
    async fn request(&mut self, build: impl FnOnce(u64) -> Value) -> Result<Result<Value, String>, FetchError> {
        let id = self.next_id;
        self.next_id += 1;

        let payload = build(id).to_string();
        self.stream.send(Message::text(payload)).await?;

        loop {
            match self.read_message().await? {
                LedgerMessage::Response { id: Some(reply_id), outcome } if reply_id == id => return Ok(outcome),
                LedgerMessage::Response { id: reply_id, .. } => {
                    trace!("XRPL: dropping reply {:?} while waiting for {}", reply_id, id);
                }
                LedgerMessage::Transaction(activity) => self.pending.push_back(activity),
                LedgerMessage::Other => {}
            }
        }
    }
}

#[async_trait]
impl LedgerSession for XrplSession {
    async fn subscribe_accounts(&mut self, addresses: &[String]) -> Result<(), FetchError> {
        match self.request(|id| subscribe_request(id, addresses)).await? {
            Ok(_) => {
                debug!("XRPL: subscribed to {} accounts on {}", addresses.len(), self.host);
                Ok(())
            }
            Err(code) => Err(FetchError::Upstream(sanitize_display_text(&code, MAX_ERROR_CODE_LEN))),
        }
    }

    async fn account_balance(&mut self, address: &str) -> Result<u64, FetchError> {
        match self.request(|id| account_info_request(id, address)).await? {
            Ok(result) => parse_balance(&result),
            // Unfunded accounts hold nothing yet
            Err(code) if code == ACCOUNT_NOT_FOUND => Ok(0),
            Err(code) => Err(FetchError::Upstream(sanitize_display_text(&code, MAX_ERROR_CODE_LEN))),
        }
    }

    async fn next_activity(&mut self) -> Result<AccountActivity, FetchError> {
        if let Some(activity) = self.pending.pop_front() {
            return Ok(activity);
        }

        loop {
            if let LedgerMessage::Transaction(activity) = self.read_message().await? {
                return Ok(activity);
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            trace!("XRPL: close on {} failed: {}", self.host, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_builds() {
        assert!(XrplConnector::new().is_ok());
    }

    #[tokio::test]
    async fn test_untrusted_endpoint_refused_before_connect() {
        let connector = XrplConnector::new().unwrap();
        let url = Url::parse("wss://evil.example.com").unwrap();

        let result = connector.connect(&url).await;
        assert!(matches!(result, Err(FetchError::UntrustedEndpoint(_))));
    }

    #[tokio::test]
    async fn test_plain_ws_refused() {
        let connector = XrplConnector::new().unwrap();
        let url = Url::parse("ws://xrplcluster.com").unwrap();

        assert!(connector.connect(&url).await.is_err());
    }
}
