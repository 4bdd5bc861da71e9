//! XRPL Adapter
//!
//! Implementation of the ledger ports over the rippled WebSocket API.

mod client;
mod types;

pub use client::{XrplConnector, XrplSession};
pub use types::{parse_balance, parse_message, LedgerMessage, ACCOUNT_NOT_FOUND};
