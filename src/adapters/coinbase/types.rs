//! Coinbase Exchange response types
//!
//! Numbers arrive as JSON strings; `rust_decimal` accepts both forms.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::MarketQuote;

/// `GET /products/{id}/ticker`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TickerResponse {
    pub price: Decimal,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub time: Option<String>,
}

/// `GET /products/{id}/stats`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StatsResponse {
    #[serde(default)]
    pub open: Option<Decimal>,
    #[serde(default)]
    pub high: Option<Decimal>,
    #[serde(default)]
    pub low: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub last: Option<Decimal>,
}

/// Combine ticker and stats. A missing open falls back to the current price,
/// which yields a zero 24h change instead of an error.
pub fn to_market_quote(ticker: &TickerResponse, stats: &StatsResponse) -> MarketQuote {
    MarketQuote {
        price: ticker.price,
        open_24h: stats.open.unwrap_or(ticker.price),
        high_24h: stats.high.unwrap_or_default(),
        low_24h: stats.low.unwrap_or_default(),
        volume_24h: stats.volume.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const TICKER: &str = r#"{
        "ask": "0.5502",
        "bid": "0.5501",
        "volume": "48190331.12",
        "trade_id": 73351521,
        "price": "0.5501",
        "size": "120.5",
        "time": "2026-10-16T12:00:00.000000Z"
    }"#;

    const STATS: &str = r#"{
        "open": "0.5300",
        "high": "0.5600",
        "low": "0.5200",
        "last": "0.5501",
        "volume": "48190331.12",
        "volume_30day": "1604012345.5"
    }"#;

    #[test]
    fn test_parse_ticker() {
        let ticker: TickerResponse = serde_json::from_str(TICKER).unwrap();
        assert_eq!(ticker.price, dec!(0.5501));
        assert_eq!(ticker.bid, Some(dec!(0.5501)));
    }

    #[test]
    fn test_combine_quote() {
        let ticker: TickerResponse = serde_json::from_str(TICKER).unwrap();
        let stats: StatsResponse = serde_json::from_str(STATS).unwrap();
        let quote = to_market_quote(&ticker, &stats);

        assert_eq!(quote.price, dec!(0.5501));
        assert_eq!(quote.open_24h, dec!(0.53));
        assert_eq!(quote.high_24h, dec!(0.56));
        assert_eq!(quote.volume_24h, dec!(48190331.12));
    }

    #[test]
    fn test_missing_open_uses_price() {
        let ticker: TickerResponse = serde_json::from_str(r#"{"price": "1.25"}"#).unwrap();
        let stats: StatsResponse = serde_json::from_str("{}").unwrap();
        let quote = to_market_quote(&ticker, &stats);

        assert_eq!(quote.open_24h, dec!(1.25));
        assert_eq!(quote.low_24h, Decimal::ZERO);
    }

    #[test]
    fn test_missing_price_rejected() {
        assert!(serde_json::from_str::<TickerResponse>(r#"{"bid": "1"}"#).is_err());
    }
}
