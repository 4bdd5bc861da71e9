//! XRP Ticker - resilient market and ledger data library
//!
//! Keeps an XRP/USD price and the XRP balances of a set of wallets current,
//! surviving flaky networks without hammering upstream services.
//!
//! # Modules
//!
//! - `security`: Endpoint allowlist, TLS policy, error sanitization, address validation
//! - `domain`: Rate limiter, circuit breaker, backoff, status and snapshot values
//! - `ports`: Trait abstractions (PriceFeed, LedgerConnector, LedgerSession)
//! - `adapters`: External implementations (Coinbase, XRPL, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: Price and balance services, event dispatch

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod security;
