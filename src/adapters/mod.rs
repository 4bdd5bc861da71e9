//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Coinbase: Exchange REST price feed
//! - XRPL: rippled WebSocket sessions
//! - CLI: Command-line interface handlers

pub mod cli;
pub mod coinbase;
pub mod xrpl;

pub use cli::CliApp;
pub use coinbase::CoinbaseClient;
pub use xrpl::XrplConnector;
