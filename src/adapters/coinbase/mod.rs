//! Coinbase Adapter
//!
//! Implementation of the PriceFeed port for the Coinbase Exchange public API.

mod client;
mod types;

pub use client::{CoinbaseClient, CoinbaseConfig};
pub use types::{to_market_quote, StatsResponse, TickerResponse};
