//! Price and balance snapshots
//!
//! Snapshots are the only data handed to the presentation layer. They are built
//! fresh per successful cycle and never mutated afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Decimal places of one drop (1 XRP = 1,000,000 drops)
pub const XRP_DECIMALS: u32 = 6;

/// Total XRP supply in drops; no balance can exceed it
pub const XRP_MAX_SUPPLY_DROPS: u64 = 100_000_000_000_000_000;

/// Sanity upper bound for the XRP/USD price
pub const MAX_REASONABLE_XRP_PRICE: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Price out of range: {0}")]
    PriceOutOfRange(String),

    #[error("Negative market statistic: {0}")]
    NegativeStatistic(&'static str),

    #[error("Balance out of range: {0} drops")]
    BalanceOutOfRange(u64),
}

/// Convert drops to XRP
pub fn drops_to_xrp(drops: u64) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(drops), XRP_DECIMALS)
}

/// Latest XRP/USD market data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub price: Decimal,
    pub price_change_24h: Decimal,
    pub change_pct_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub volume_24h: Decimal,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

/// Raw market figures as reported by a price feed
#[derive(Debug, Clone, PartialEq)]
pub struct MarketQuote {
    pub price: Decimal,
    pub open_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub volume_24h: Decimal,
}

impl PriceSnapshot {
    /// Validate a quote and derive the 24h change against the open
    pub fn from_quote(
        symbol: &str,
        source: &str,
        quote: &MarketQuote,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, SnapshotError> {
        if quote.price <= Decimal::ZERO || quote.price > MAX_REASONABLE_XRP_PRICE {
            return Err(SnapshotError::PriceOutOfRange(quote.price.to_string()));
        }
        if quote.high_24h.is_sign_negative() {
            return Err(SnapshotError::NegativeStatistic("high_24h"));
        }
        if quote.low_24h.is_sign_negative() {
            return Err(SnapshotError::NegativeStatistic("low_24h"));
        }
        if quote.volume_24h.is_sign_negative() {
            return Err(SnapshotError::NegativeStatistic("volume_24h"));
        }

        let (price_change_24h, change_pct_24h) = if quote.open_24h > Decimal::ZERO {
            let change = quote.price - quote.open_24h;
            let pct = (change / quote.open_24h * Decimal::ONE_HUNDRED).round_dp(4);
            (change, pct)
        } else {
            (Decimal::ZERO, Decimal::ZERO)
        };

        Ok(Self {
            symbol: symbol.to_string(),
            price: quote.price,
            price_change_24h,
            change_pct_24h,
            high_24h: quote.high_24h,
            low_24h: quote.low_24h,
            volume_24h: quote.volume_24h,
            source: source.to_string(),
            fetched_at,
        })
    }
}

/// Aggregated wallet balances
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceSnapshot {
    pub balances: BTreeMap<String, Decimal>,
    pub total: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl BalanceSnapshot {
    pub fn wallet_count(&self) -> usize {
        self.balances.len()
    }
}

#[derive(Debug, Clone)]
struct BookEntry {
    address: String,
    drops: Option<u64>,
    updated_at: Option<Instant>,
}

/// Last known balance per tracked address
///
/// Owned by the balance service loop. Each entry keeps its own timestamp so a
/// failed query for one address never discards the others.
#[derive(Debug, Clone)]
pub struct BalanceBook {
    entries: Vec<BookEntry>,
}

impl BalanceBook {
    pub fn new(addresses: &[String]) -> Self {
        let mut entries: Vec<BookEntry> = Vec::with_capacity(addresses.len());
        for address in addresses {
            if entries.iter().any(|e| &e.address == address) {
                continue;
            }
            entries.push(BookEntry {
                address: address.clone(),
                drops: None,
                updated_at: None,
            });
        }
        Self { entries }
    }

    /// Tracked addresses in configuration order
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.address.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a balance. Returns true if the value changed.
    pub fn record(&mut self, address: &str, drops: u64, at: Instant) -> Result<bool, SnapshotError> {
        if drops > XRP_MAX_SUPPLY_DROPS {
            return Err(SnapshotError::BalanceOutOfRange(drops));
        }

        let Some(entry) = self.entries.iter_mut().find(|e| e.address == address) else {
            return Ok(false);
        };

        let changed = entry.drops != Some(drops);
        entry.drops = Some(drops);
        entry.updated_at = Some(at);
        Ok(changed)
    }

    /// Last known drops for an address
    pub fn drops(&self, address: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.address == address)
            .and_then(|e| e.drops)
    }

    /// True when the address has no value younger than `max_age`
    pub fn is_stale(&self, address: &str, now: Instant, max_age: Duration) -> bool {
        self.entries
            .iter()
            .find(|e| e.address == address)
            .and_then(|e| e.updated_at)
            .map_or(true, |at| now.saturating_duration_since(at) > max_age)
    }

    /// Number of addresses with a known value
    pub fn known(&self) -> usize {
        self.entries.iter().filter(|e| e.drops.is_some()).count()
    }

    /// Build the external snapshot. Addresses never resolved count as zero.
    pub fn snapshot(&self, updated_at: DateTime<Utc>) -> BalanceSnapshot {
        let mut balances = BTreeMap::new();
        let mut total_drops: u64 = 0;

        for entry in &self.entries {
            let drops = entry.drops.unwrap_or(0);
            total_drops = total_drops.saturating_add(drops);
            balances.insert(entry.address.clone(), drops_to_xrp(drops));
        }

        BalanceSnapshot {
            balances,
            total: drops_to_xrp(total_drops),
            updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote(price: Decimal, open: Decimal) -> MarketQuote {
        MarketQuote {
            price,
            open_24h: open,
            high_24h: dec!(0.55),
            low_24h: dec!(0.48),
            volume_24h: dec!(123456789.5),
        }
    }

    #[test]
    fn test_drops_to_xrp() {
        assert_eq!(drops_to_xrp(1_000_000), dec!(1));
        assert_eq!(drops_to_xrp(1_500_000), dec!(1.5));
        assert_eq!(drops_to_xrp(1), dec!(0.000001));
    }

    #[test]
    fn test_price_snapshot_change() {
        let snap = PriceSnapshot::from_quote("XRP-USD", "coinbase", &quote(dec!(0.55), dec!(0.50)), Utc::now()).unwrap();
        assert_eq!(snap.price_change_24h, dec!(0.05));
        assert_eq!(snap.change_pct_24h, dec!(10));
        assert_eq!(snap.symbol, "XRP-USD");
    }

    #[test]
    fn test_price_snapshot_zero_open() {
        let snap = PriceSnapshot::from_quote("XRP-USD", "coinbase", &quote(dec!(0.55), dec!(0)), Utc::now()).unwrap();
        assert_eq!(snap.price_change_24h, Decimal::ZERO);
        assert_eq!(snap.change_pct_24h, Decimal::ZERO);
    }

    #[test]
    fn test_price_snapshot_rejects_bad_price() {
        assert!(PriceSnapshot::from_quote("XRP-USD", "coinbase", &quote(dec!(0), dec!(0.5)), Utc::now()).is_err());
        assert!(PriceSnapshot::from_quote("XRP-USD", "coinbase", &quote(dec!(-1), dec!(0.5)), Utc::now()).is_err());
        assert!(PriceSnapshot::from_quote("XRP-USD", "coinbase", &quote(dec!(10001), dec!(0.5)), Utc::now()).is_err());
    }

    #[test]
    fn test_balance_book_keeps_last_known_values() {
        let addrs = vec!["rA".to_string(), "rB".to_string(), "rC".to_string()];
        let mut book = BalanceBook::new(&addrs);
        let now = Instant::now();

        assert!(book.record("rA", 10_000_000, now).unwrap());
        assert!(book.record("rB", 5_000_000, now).unwrap());
        // rC failed this cycle; a later cycle only updates rA
        assert!(!book.record("rA", 10_000_000, now).unwrap());

        let snap = book.snapshot(Utc::now());
        assert_eq!(snap.wallet_count(), 3);
        assert_eq!(snap.balances["rA"], dec!(10));
        assert_eq!(snap.balances["rB"], dec!(5));
        assert_eq!(snap.balances["rC"], dec!(0));
        assert_eq!(snap.total, dec!(15));
        assert_eq!(book.known(), 2);
    }

    #[test]
    fn test_balance_book_ignores_unknown_and_duplicates() {
        let addrs = vec!["rA".to_string(), "rA".to_string()];
        let mut book = BalanceBook::new(&addrs);
        assert_eq!(book.len(), 1);
        assert!(!book.record("rZ", 1, Instant::now()).unwrap());
        assert_eq!(book.drops("rZ"), None);
    }

    #[test]
    fn test_balance_book_rejects_impossible_balance() {
        let mut book = BalanceBook::new(&["rA".to_string()]);
        let result = book.record("rA", XRP_MAX_SUPPLY_DROPS + 1, Instant::now());
        assert!(matches!(result, Err(SnapshotError::BalanceOutOfRange(_))));
        assert_eq!(book.drops("rA"), None);
    }

    #[test]
    fn test_balance_book_staleness() {
        let mut book = BalanceBook::new(&["rA".to_string()]);
        let start = Instant::now();
        assert!(book.is_stale("rA", start, Duration::from_secs(30)));

        book.record("rA", 1, start).unwrap();
        assert!(!book.is_stale("rA", start + Duration::from_secs(10), Duration::from_secs(30)));
        assert!(book.is_stale("rA", start + Duration::from_secs(31), Duration::from_secs(30)));
    }

    #[test]
    fn test_max_reasonable_price_constant() {
        assert_eq!(MAX_REASONABLE_XRP_PRICE, dec!(10000));
    }
}
