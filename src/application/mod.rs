//! Application Layer
//!
//! Long-running data services and the event dispatch they share.

pub mod balance_service;
pub mod dispatch;
pub mod price_service;
pub mod service;

pub use balance_service::{
    fetch_balances, BalanceService, BalanceServiceConfig, BALANCE_SERVICE_NAME, DEFAULT_BALANCE_INTERVAL,
    DEFAULT_ENDPOINTS, MAX_BALANCE_INTERVAL, MIN_BALANCE_INTERVAL,
};
pub use dispatch::{ChannelListener, Dispatcher, EventReceiver, ServiceEvent, ServiceListener};
pub use price_service::{
    fetch_price, PriceService, PriceServiceConfig, DEFAULT_PRICE_INTERVAL, MIN_PRICE_INTERVAL,
    PRICE_SERVICE_NAME,
};
pub use service::{DataSource, ResilienceConfig, ServiceError, DEFAULT_REQUEST_TIMEOUT, STOP_GRACE};
