//! Mock ports for tests
//!
//! Each mock records its calls and replays a script of replies. The last
//! scripted reply repeats once the script is exhausted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Notify;
use tokio::time::Instant;
use url::Url;

use super::{AccountActivity, FetchError, LedgerConnector, LedgerSession, PriceFeed};
use crate::domain::MarketQuote;

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply<T> {
    Ok(T),
    Err(FetchError),
    /// Never completes
    Hang,
    /// Completes with the value once the delay has passed
    Delay(Duration, T),
}

fn next_reply<T: Clone>(script: &mut VecDeque<MockReply<T>>) -> Option<MockReply<T>> {
    if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().cloned()
    }
}

/// Quote with price 0.55 and open 0.50
pub fn sample_quote() -> MarketQuote {
    MarketQuote {
        price: Decimal::new(55, 2),
        open_24h: Decimal::new(50, 2),
        high_24h: Decimal::new(56, 2),
        low_24h: Decimal::new(49, 2),
        volume_24h: Decimal::new(12_345_678, 0),
    }
}

/// Mock price feed that records call times and replays scripted replies
#[derive(Debug, Clone, Default)]
pub struct MockPriceFeed {
    calls: Arc<Mutex<Vec<Instant>>>,
    script: Arc<Mutex<VecDeque<MockReply<MarketQuote>>>>,
    hung: Arc<Notify>,
}

impl MockPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to queue a successful quote
    pub fn with_response(self, quote: MarketQuote) -> Self {
        self.script.lock().unwrap().push_back(MockReply::Ok(quote));
        self
    }

    /// Builder method to queue a failure
    pub fn with_error(self, error: FetchError) -> Self {
        self.script.lock().unwrap().push_back(MockReply::Err(error));
        self
    }

    /// Builder method to queue a request that never completes
    pub fn with_hang(self) -> Self {
        self.script.lock().unwrap().push_back(MockReply::Hang);
        self
    }

    /// Get all recorded call times
    pub fn get_calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Resolves once a request has entered a scripted hang
    pub async fn wait_until_hung(&self) {
        self.hung.notified().await;
    }
}

#[async_trait]
impl PriceFeed for MockPriceFeed {
    fn source(&self) -> &'static str {
        "mock"
    }

    fn symbol(&self) -> &str {
        "XRP-USD"
    }

    async fn fetch_quote(&self) -> Result<MarketQuote, FetchError> {
        self.calls.lock().unwrap().push(Instant::now());
        let reply = next_reply(&mut self.script.lock().unwrap());

        match reply {
            Some(MockReply::Ok(quote)) => Ok(quote),
            Some(MockReply::Err(err)) => Err(err),
            Some(MockReply::Hang) => {
                self.hung.notify_one();
                std::future::pending().await
            }
            Some(MockReply::Delay(delay, quote)) => {
                tokio::time::sleep(delay).await;
                Ok(quote)
            }
            None => Err(FetchError::Other("No response configured".to_string())),
        }
    }
}

/// Mock ledger node: scripted connects, per-address balance scripts and
/// manually triggered account activity
#[derive(Debug, Clone, Default)]
pub struct MockLedger {
    connects: Arc<Mutex<Vec<String>>>,
    connect_failures: Arc<Mutex<VecDeque<FetchError>>>,
    balances: Arc<Mutex<HashMap<String, VecDeque<MockReply<u64>>>>>,
    balance_calls: Arc<Mutex<Vec<String>>>,
    subscriptions: Arc<Mutex<Vec<Vec<String>>>>,
    activity: Arc<Notify>,
    disconnect: Arc<Notify>,
    hung: Arc<Notify>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to fail the next connect attempt
    pub fn with_connect_error(self, error: FetchError) -> Self {
        self.connect_failures.lock().unwrap().push_back(error);
        self
    }

    /// Builder method to queue a balance reply for an address
    pub fn with_balance(self, address: &str, drops: u64) -> Self {
        self.push_reply(address, MockReply::Ok(drops));
        self
    }

    /// Builder method to queue a balance failure for an address
    pub fn with_balance_error(self, address: &str, error: FetchError) -> Self {
        self.push_reply(address, MockReply::Err(error));
        self
    }

    /// Builder method to queue a balance request that never completes
    pub fn with_balance_hang(self, address: &str) -> Self {
        self.push_reply(address, MockReply::Hang);
        self
    }

    /// Builder method to queue a balance reply that arrives after `delay`
    pub fn with_balance_after(self, address: &str, delay: Duration, drops: u64) -> Self {
        self.push_reply(address, MockReply::Delay(delay, drops));
        self
    }

    fn push_reply(&self, address: &str, reply: MockReply<u64>) {
        self.balances
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Hosts of all connect attempts, in order
    pub fn get_connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    /// Addresses of all balance requests, in order
    pub fn get_balance_calls(&self) -> Vec<String> {
        self.balance_calls.lock().unwrap().clone()
    }

    /// Address lists of all subscribe requests
    pub fn get_subscriptions(&self) -> Vec<Vec<String>> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Deliver one account notification to the open session
    pub fn trigger_activity(&self) {
        self.activity.notify_one();
    }

    /// Make the open session report a closed connection
    pub fn drop_connection(&self) {
        self.disconnect.notify_one();
    }

    /// Resolves once a balance request has entered a scripted hang or delay
    pub async fn wait_until_hung(&self) {
        self.hung.notified().await;
    }
}

#[async_trait]
impl LedgerConnector for MockLedger {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn LedgerSession>, FetchError> {
        self.connects
            .lock()
            .unwrap()
            .push(endpoint.host_str().unwrap_or_default().to_string());

        if let Some(err) = self.connect_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        Ok(Box::new(MockSession { ledger: self.clone() }))
    }
}

struct MockSession {
    ledger: MockLedger,
}

#[async_trait]
impl LedgerSession for MockSession {
    async fn subscribe_accounts(&mut self, addresses: &[String]) -> Result<(), FetchError> {
        self.ledger.subscriptions.lock().unwrap().push(addresses.to_vec());
        Ok(())
    }

    async fn account_balance(&mut self, address: &str) -> Result<u64, FetchError> {
        self.ledger.balance_calls.lock().unwrap().push(address.to_string());
        let reply = self
            .ledger
            .balances
            .lock()
            .unwrap()
            .get_mut(address)
            .and_then(next_reply);

        match reply {
            Some(MockReply::Ok(drops)) => Ok(drops),
            Some(MockReply::Err(err)) => Err(err),
            Some(MockReply::Hang) => {
                self.ledger.hung.notify_one();
                std::future::pending().await
            }
            Some(MockReply::Delay(delay, drops)) => {
                self.ledger.hung.notify_one();
                tokio::time::sleep(delay).await;
                Ok(drops)
            }
            None => Err(FetchError::Upstream("actNotFound".to_string())),
        }
    }

    async fn next_activity(&mut self) -> Result<AccountActivity, FetchError> {
        tokio::select! {
            _ = self.ledger.activity.notified() => Ok(AccountActivity::default()),
            _ = self.ledger.disconnect.notified() => Err(FetchError::ConnectionClosed),
        }
    }

    async fn close(&mut self) {}
}
