//! Price Polling Service
//!
//! Polls the price feed on a fixed interval. Each cycle passes the retry gate
//! and the rate limiter, then performs one bounded fetch.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{timeout, Instant};
use tracing::debug;

use super::dispatch::ServiceListener;
use super::service::{DataSource, Emitter, ResilienceConfig, ServiceCore, ServiceError, Shutdown};
use crate::domain::{Gate, PriceSnapshot, ServiceStatus};
use crate::ports::{FetchError, PriceFeed};
use crate::security::generate_request_id;

/// Service name used in status values and logs
pub const PRICE_SERVICE_NAME: &str = "Price";

/// Default poll interval
pub const DEFAULT_PRICE_INTERVAL: Duration = Duration::from_secs(5);

/// Shortest poll interval accepted
pub const MIN_PRICE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct PriceServiceConfig {
    pub poll_interval: Duration,
    pub resilience: ResilienceConfig,
}

impl Default for PriceServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_PRICE_INTERVAL,
            resilience: ResilienceConfig::default(),
        }
    }
}

impl PriceServiceConfig {
    /// Set the poll interval, raised to [`MIN_PRICE_INTERVAL`] if shorter
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_PRICE_INTERVAL);
        self
    }

    pub fn with_resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }
}

/// Fetch one quote within `limit` and validate it into a snapshot
pub async fn fetch_price(feed: &dyn PriceFeed, limit: Duration) -> Result<PriceSnapshot, FetchError> {
    let quote = timeout(limit, feed.fetch_quote()).await??;
    let snapshot = PriceSnapshot::from_quote(feed.symbol(), feed.source(), &quote, Utc::now())?;
    Ok(snapshot)
}

/// Periodic price poller
pub struct PriceService {
    feed: Arc<dyn PriceFeed>,
    config: RwLock<PriceServiceConfig>,
    core: ServiceCore<PriceSnapshot>,
}

impl PriceService {
    pub fn new(feed: Arc<dyn PriceFeed>, config: PriceServiceConfig) -> Self {
        Self {
            feed,
            config: RwLock::new(config),
            core: ServiceCore::new(PRICE_SERVICE_NAME),
        }
    }

    /// Install one listener for status changes and price updates
    pub fn set_listener(&self, listener: Arc<dyn ServiceListener<PriceSnapshot>>) {
        self.core.set_listener(listener);
    }

    pub fn config(&self) -> PriceServiceConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the configuration; takes effect on the next (re)start
    pub fn update_config(&self, config: PriceServiceConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    fn worker(
        &self,
    ) -> impl FnOnce(Emitter<PriceSnapshot>, Shutdown) -> Result<PollLoop, ServiceError> {
        let feed = Arc::clone(&self.feed);
        let config = self.config();
        move |emitter, shutdown| Ok(poll_loop(feed, config, emitter, shutdown))
    }
}

type PollLoop = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

fn poll_loop(
    feed: Arc<dyn PriceFeed>,
    config: PriceServiceConfig,
    emitter: Emitter<PriceSnapshot>,
    mut shutdown: Shutdown,
) -> PollLoop {
    Box::pin(async move {
        let mut limiter = config.resilience.rate_limiter();
        let mut retry = config.resilience.retry_controller();

        loop {
            let (gate, transition) = retry.gate_at(Instant::now());
            emitter.note_transition(transition, &retry);

            match gate {
                Gate::Wait(remaining) => {
                    debug!("{}: circuit open, next probe in {:?}", PRICE_SERVICE_NAME, remaining);
                    if !shutdown.sleep(remaining).await {
                        break;
                    }
                    continue;
                }
                Gate::Proceed { probe: true } => debug!("{}: probing", PRICE_SERVICE_NAME),
                Gate::Proceed { probe: false } => {}
            }

            if !limiter.allow() {
                debug!("{}: rate limited, skipping cycle", PRICE_SERVICE_NAME);
                if !shutdown.sleep(config.poll_interval).await {
                    break;
                }
                continue;
            }

            let request_id = generate_request_id();
            let fetched = match shutdown
                .run(fetch_price(feed.as_ref(), config.resilience.request_timeout))
                .await
            {
                Some(result) => result,
                None => break,
            };

            let wait = match fetched {
                Ok(snapshot) => {
                    debug!(
                        request_id = %request_id,
                        "{}: {} = {}",
                        PRICE_SERVICE_NAME,
                        snapshot.symbol,
                        snapshot.price
                    );
                    emitter.record_success(&mut retry);
                    emitter.publish(&snapshot);
                    config.poll_interval
                }
                Err(err) if err.is_fatal() => {
                    emitter.record_fatal(&retry, &err, &request_id);
                    break;
                }
                Err(err) => emitter.record_failure(&mut retry, &err, &request_id),
            };

            if !shutdown.sleep(wait).await {
                break;
            }
        }

        debug!("{}: poll loop exited", PRICE_SERVICE_NAME);
    })
}

#[async_trait]
impl DataSource for PriceService {
    fn name(&self) -> &'static str {
        self.core.name()
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.core.start(self.worker()).await
    }

    async fn stop(&self) {
        self.core.stop().await;
    }

    async fn restart(&self) -> Result<(), ServiceError> {
        self.core.restart(self.worker()).await
    }

    fn status(&self) -> ServiceStatus {
        self.core.status()
    }

    fn is_running(&self) -> bool {
        self.core.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatch::{ChannelListener, ServiceEvent};
    use crate::domain::ConnectionState;
    use crate::ports::mocks::{sample_quote, MockPriceFeed};

    fn service(feed: MockPriceFeed) -> PriceService {
        PriceService::new(Arc::new(feed), PriceServiceConfig::default())
    }

    #[test]
    fn test_interval_floor() {
        let config = PriceServiceConfig::default().with_interval(Duration::from_secs(1));
        assert_eq!(config.poll_interval, MIN_PRICE_INTERVAL);

        let config = PriceServiceConfig::default().with_interval(Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_price_times_out() {
        let feed = MockPriceFeed::new().with_hang();
        let result = fetch_price(&feed, Duration::from_secs(3)).await;
        assert_eq!(result, Err(FetchError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_price_rejects_bad_quote() {
        let mut quote = sample_quote();
        quote.price = rust_decimal::Decimal::ZERO;
        let feed = MockPriceFeed::new().with_response(quote);

        let result = fetch_price(&feed, Duration::from_secs(3)).await;
        assert!(matches!(result, Err(FetchError::Malformed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_interval() {
        let feed = MockPriceFeed::new().with_response(sample_quote());
        let service = service(feed.clone());
        let (listener, mut rx) = ChannelListener::channel();
        service.set_listener(listener);

        service.start().await.unwrap();
        let mut updates = 0;
        while updates < 3 {
            if let Some(ServiceEvent::Update(snapshot)) = rx.recv().await {
                assert_eq!(snapshot.source, "mock");
                updates += 1;
            }
        }
        service.stop().await;

        let calls = feed.get_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], DEFAULT_PRICE_INTERVAL);
        assert_eq!(calls[2] - calls[1], DEFAULT_PRICE_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_after_threshold() {
        let feed = MockPriceFeed::new().with_error(FetchError::Timeout);
        let service = service(feed.clone());
        let (listener, mut rx) = ChannelListener::channel();
        service.set_listener(listener);

        service.start().await.unwrap();
        loop {
            match rx.recv().await {
                Some(ServiceEvent::Status(status)) if status.state() == ConnectionState::Failed => {
                    assert_eq!(status.last_error(), Some("Request timed out"));
                    assert_eq!(status.consecutive_failures(), 5);
                    break;
                }
                Some(_) => {}
                None => panic!("listener detached early"),
            }
        }
        assert_eq!(feed.call_count(), 5);
        service.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_untrusted_redirect_stops_polling() {
        let feed = MockPriceFeed::new()
            .with_error(FetchError::UntrustedEndpoint("redirected to http://".into()))
            .with_response(sample_quote());
        let service = service(feed.clone());
        let (listener, mut rx) = ChannelListener::channel();
        service.set_listener(listener);

        service.start().await.unwrap();
        let failed = loop {
            match rx.recv().await {
                Some(ServiceEvent::Status(status)) if status.state() == ConnectionState::Failed => break status,
                Some(ServiceEvent::Status(_)) => {}
                Some(ServiceEvent::Update(_)) => panic!("no quote expected"),
                None => panic!("listener detached early"),
            }
        };
        assert_eq!(failed.last_error(), Some("Endpoint not trusted"));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(feed.call_count(), 1);
        assert!(!service.is_running());
        assert_eq!(service.status().state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_hanging_request() {
        let feed = MockPriceFeed::new().with_hang();
        let service = service(feed.clone());
        service.start().await.unwrap();
        feed.wait_until_hung().await;

        let started = Instant::now();
        service.stop().await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!service.is_running());
        assert_eq!(service.status().state(), ConnectionState::Disconnected);
    }
}
