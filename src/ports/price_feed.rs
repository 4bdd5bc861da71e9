use async_trait::async_trait;

use super::FetchError;
use crate::domain::MarketQuote;

/// Price feed port trait
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Source name shown in snapshots and status
    fn source(&self) -> &'static str;

    /// Trading pair, e.g. `XRP-USD`
    fn symbol(&self) -> &str;

    /// Fetch the current quote and 24h statistics in one exchange
    async fn fetch_quote(&self) -> Result<MarketQuote, FetchError>;
}
