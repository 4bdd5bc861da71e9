//! Ports Layer - Trait definitions for external dependencies
//!
//! This module defines the interfaces (ports) that adapters must implement.
//! Following hexagonal architecture, these traits abstract:
//! - The price API (current quote plus 24h statistics)
//! - XRP Ledger node sessions (balances and account notifications)

pub mod error;
pub mod ledger;
pub mod mocks;
pub mod price_feed;

pub use error::FetchError;
pub use ledger::{AccountActivity, LedgerConnector, LedgerSession};
pub use price_feed::PriceFeed;
