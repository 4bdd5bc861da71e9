//! Service Integration Tests
//!
//! Drive the price and balance services end to end through the mock ports:
//! 1. Price service recovering from a refused connection
//! 2. Stopping the balance service in the middle of a refresh
//! 3. A refresh that completes only after stop() returned
//! 4. Lifecycle through the DataSource trait object
//!
//! All tests run on a paused clock and make no network calls.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio::time::Instant;

use xrp_ticker::application::{
    BalanceService, BalanceServiceConfig, ChannelListener, DataSource, PriceService, PriceServiceConfig,
    ServiceEvent, ServiceListener,
};
use xrp_ticker::domain::{BalanceSnapshot, ConnectionState, ServiceStatus};
use xrp_ticker::ports::mocks::{sample_quote, MockLedger, MockPriceFeed};
use xrp_ticker::ports::FetchError;

// ============================================================================
// Test Fixtures
// ============================================================================

const WALLET_A: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";
const WALLET_B: &str = "rrrrrrrrrrrrrrrrrrrrrhoLvTp";
const WALLET_C: &str = "rrrrrrrrrrrrrrrrrrrrBZbvji";

fn wallets() -> Vec<String> {
    vec![WALLET_A.to_string(), WALLET_B.to_string(), WALLET_C.to_string()]
}

/// Counts every callback and ignores detachment
#[derive(Default)]
struct CallbackCounter {
    statuses: Mutex<usize>,
    updates: Mutex<usize>,
}

impl ServiceListener<BalanceSnapshot> for CallbackCounter {
    fn on_status_change(&self, _status: &ServiceStatus) {
        *self.statuses.lock().unwrap() += 1;
    }

    fn on_update(&self, _data: &BalanceSnapshot) {
        *self.updates.lock().unwrap() += 1;
    }
}

// ============================================================================
// Price Service
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_price_recovers_after_refused_connection() {
    let feed = MockPriceFeed::new()
        .with_error(FetchError::ConnectionRefused("tcp connect error: 111".to_string()))
        .with_response(sample_quote());
    let service = PriceService::new(Arc::new(feed.clone()), PriceServiceConfig::default());
    let (listener, mut rx) = ChannelListener::channel();
    service.set_listener(listener);

    service.start().await.unwrap();

    let mut saw_refused = false;
    let snapshot = loop {
        match rx.recv().await {
            Some(ServiceEvent::Status(status)) => {
                if let Some(error) = status.last_error() {
                    // raw detail never reaches listeners
                    assert_eq!(error, "Connection refused");
                    assert_eq!(status.state(), ConnectionState::Reconnecting);
                    assert_eq!(status.consecutive_failures(), 1);
                    saw_refused = true;
                }
            }
            Some(ServiceEvent::Update(snapshot)) => break snapshot,
            None => panic!("listener detached"),
        }
    };

    assert!(saw_refused);
    assert_eq!(snapshot.price, dec!(0.55));
    assert_eq!(snapshot.change_pct_24h, dec!(10));

    let status = service.status();
    assert_eq!(status.state(), ConnectionState::Connected);
    assert_eq!(status.consecutive_failures(), 0);
    assert_eq!(status.reconnect_attempts(), 0);
    assert!(status.last_error().is_none());

    // second poll waited out the first backoff step (1s, +/-10% jitter)
    let calls = feed.get_calls();
    assert_eq!(calls.len(), 2);
    let gap = calls[1] - calls[0];
    assert!(gap >= Duration::from_millis(900) && gap <= Duration::from_millis(1100));

    service.stop().await;
}

// ============================================================================
// Balance Service
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_during_refresh_silences_listener() {
    let ledger = MockLedger::new()
        .with_balance(WALLET_A, 10_000_000)
        .with_balance(WALLET_B, 5_000_000)
        .with_balance_hang(WALLET_C);
    let service = BalanceService::new(Arc::new(ledger.clone()), BalanceServiceConfig::new(wallets()));
    let (listener, mut rx) = ChannelListener::channel();
    service.set_listener(listener);

    service.start().await.unwrap();
    ledger.wait_until_hung().await;
    assert_eq!(ledger.get_balance_calls(), wallets());

    let started = Instant::now();
    service.stop().await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!service.is_running());

    // only what was emitted before stop() returned, then the channel ends
    let events = rx.drain();
    assert!(events.iter().all(|e| matches!(e, ServiceEvent::Status(_))));
    assert_eq!(rx.recv().await, None);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(ledger.get_balance_calls().len(), 3);
    assert_eq!(service.status().state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_after_stop_is_discarded() {
    let ledger = MockLedger::new()
        .with_balance(WALLET_A, 10_000_000)
        .with_balance(WALLET_B, 5_000_000)
        .with_balance_after(WALLET_C, Duration::from_secs(5), 250_000);
    let service = BalanceService::new(Arc::new(ledger.clone()), BalanceServiceConfig::new(wallets()));
    let counter = Arc::new(CallbackCounter::default());
    service.set_listener(counter.clone());

    service.start().await.unwrap();
    ledger.wait_until_hung().await;
    service.stop().await;
    let statuses = *counter.statuses.lock().unwrap();

    // the delayed reply would have completed the pass by now
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(*counter.updates.lock().unwrap(), 0);
    assert_eq!(*counter.statuses.lock().unwrap(), statuses);
    assert!(service.status().last_update().is_none());
    assert_eq!(service.status().state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_balance_totals_across_wallets() {
    let ledger = MockLedger::new()
        .with_balance(WALLET_A, 10_000_000)
        .with_balance(WALLET_B, 5_000_000)
        .with_balance(WALLET_C, 250_000);
    let service = BalanceService::new(Arc::new(ledger.clone()), BalanceServiceConfig::new(wallets()));
    let (listener, mut rx) = ChannelListener::channel();
    service.set_listener(listener);

    service.start().await.unwrap();
    let snapshot = loop {
        match rx.recv().await {
            Some(ServiceEvent::Update(snapshot)) => break snapshot,
            Some(ServiceEvent::Status(_)) => {}
            None => panic!("listener detached"),
        }
    };
    service.stop().await;

    assert_eq!(snapshot.wallet_count(), 3);
    assert_eq!(snapshot.total, dec!(15.25));
    assert_eq!(ledger.get_connects(), vec!["xrplcluster.com"]);
}

// ============================================================================
// Lifecycle
// ============================================================================

async fn restart_cycle(source: &dyn DataSource) {
    source.start().await.unwrap();
    source.start().await.unwrap();
    assert!(source.is_running());

    source.restart().await.unwrap();
    assert!(source.is_running());

    source.stop().await;
    assert!(!source.is_running());
    assert_eq!(source.status().state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_through_trait_object() {
    let feed = MockPriceFeed::new().with_response(sample_quote());
    let price = PriceService::new(Arc::new(feed), PriceServiceConfig::default());
    restart_cycle(&price).await;
    assert_eq!(price.name(), "Price");

    let ledger = MockLedger::new().with_balance(WALLET_A, 1);
    let balances = BalanceService::new(
        Arc::new(ledger),
        BalanceServiceConfig::new(vec![WALLET_A.to_string()]),
    );
    restart_cycle(&balances).await;
    assert_eq!(balances.name(), "XRPL");
}

#[tokio::test(start_paused = true)]
async fn test_restart_keeps_listener() {
    let feed = MockPriceFeed::new().with_response(sample_quote());
    let service = PriceService::new(Arc::new(feed), PriceServiceConfig::default());
    let (listener, mut rx) = ChannelListener::channel();
    service.set_listener(listener);

    service.start().await.unwrap();
    service
        .update_config(PriceServiceConfig::default().with_interval(Duration::from_secs(15)));
    service.restart().await.unwrap();

    let mut updates = 0;
    while updates < 2 {
        match rx.recv().await {
            Some(ServiceEvent::Update(_)) => updates += 1,
            Some(ServiceEvent::Status(_)) => {}
            None => panic!("restart detached the listener"),
        }
    }
    assert_eq!(service.config().poll_interval, Duration::from_secs(15));
    service.stop().await;
}
