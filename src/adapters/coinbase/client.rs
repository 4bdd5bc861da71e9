//! Coinbase Exchange API Client
//!
//! HTTPS-only client for the public product endpoints. One quote is two
//! requests (stats, then ticker); the bodies are read with a size ceiling.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use super::types::{to_market_quote, StatsResponse, TickerResponse};
use crate::domain::MarketQuote;
use crate::ports::{FetchError, PriceFeed};
use crate::security::{build_tls_context, check_size, safe_user_agent, MAX_HTTP_RESPONSE};

/// Coinbase client configuration
#[derive(Debug, Clone)]
pub struct CoinbaseConfig {
    /// Base URL for the Exchange REST API
    pub api_base_url: String,
    /// Product id, e.g. `XRP-USD`
    pub product: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for CoinbaseConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.exchange.coinbase.com".to_string(),
            product: "XRP-USD".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Coinbase Exchange price feed
#[derive(Debug, Clone)]
pub struct CoinbaseClient {
    config: CoinbaseConfig,
    http: Client,
}

impl CoinbaseClient {
    /// Create a new client with custom configuration
    pub fn with_config(config: CoinbaseConfig) -> Result<Self, FetchError> {
        let tls = build_tls_context()?;
        let http = Client::builder()
            .use_preconfigured_tls((*tls).clone())
            .https_only(true)
            .timeout(config.timeout)
            .user_agent(safe_user_agent())
            .build()
            .map_err(|e| FetchError::Tls(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &CoinbaseConfig {
        &self.config
    }

    fn product_url(&self, resource: &str) -> String {
        format!("{}/products/{}/{}", self.config.api_base_url, self.config.product, resource)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let body = read_capped(response, MAX_HTTP_RESPONSE).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Read a response body, failing as soon as it grows past `limit`
async fn read_capped(mut response: Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    if let Some(length) = response.content_length() {
        check_size(usize::try_from(length).unwrap_or(usize::MAX), limit)?;
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        check_size(body.len() + chunk.len(), limit)?;
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[async_trait]
impl PriceFeed for CoinbaseClient {
    fn source(&self) -> &'static str {
        "coinbase"
    }

    fn symbol(&self) -> &str {
        &self.config.product
    }

    async fn fetch_quote(&self) -> Result<MarketQuote, FetchError> {
        let stats: StatsResponse = self.get_json(&self.product_url("stats")).await?;
        let ticker: TickerResponse = self.get_json(&self.product_url("ticker")).await?;
        tracing::debug!("Coinbase ticker {} (open {:?})", ticker.price, stats.open);
        Ok(to_market_quote(&ticker, &stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_urls() {
        let client = CoinbaseClient::with_config(CoinbaseConfig::default()).unwrap();
        assert_eq!(
            client.product_url("ticker"),
            "https://api.exchange.coinbase.com/products/XRP-USD/ticker"
        );
        assert_eq!(client.symbol(), "XRP-USD");
        assert_eq!(client.source(), "coinbase");
    }

    #[tokio::test]
    async fn test_plain_http_refused() {
        let client = CoinbaseClient::with_config(CoinbaseConfig {
            api_base_url: "http://api.exchange.coinbase.com".to_string(),
            ..CoinbaseConfig::default()
        })
        .unwrap();

        // https_only rejects the request before any connection is made
        assert!(client.fetch_quote().await.is_err());
    }
}
