use async_trait::async_trait;
use url::Url;

use super::FetchError;

/// Notification that a tracked account was touched by a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountActivity {
    /// Transaction hash, when the node reported one
    pub tx_hash: Option<String>,
}

/// Opens sessions against a ledger node
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    /// Connect to `endpoint`. Implementations re-check the endpoint allowlist.
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn LedgerSession>, FetchError>;
}

/// One live connection to a ledger node
///
/// Requests are issued sequentially; the session is driven by a single task.
#[async_trait]
pub trait LedgerSession: Send {
    /// Subscribe to transaction notifications for `addresses`
    async fn subscribe_accounts(&mut self, addresses: &[String]) -> Result<(), FetchError>;

    /// Validated balance in drops. Accounts that do not exist yet report 0.
    async fn account_balance(&mut self, address: &str) -> Result<u64, FetchError>;

    /// Wait for the next transaction touching a subscribed account
    ///
    /// Must be cancel safe: the service races it against its timers.
    async fn next_activity(&mut self) -> Result<AccountActivity, FetchError>;

    /// Close the session, best effort
    async fn close(&mut self);
}
