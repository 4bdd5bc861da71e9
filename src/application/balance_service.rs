//! Balance Streaming Service
//!
//! Keeps one ledger session open, subscribed to the tracked accounts, and
//! re-queries every balance on a fixed interval or as soon as a transaction
//! touches one of them. Connection failures rotate through the configured
//! endpoints.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

use super::dispatch::ServiceListener;
use super::service::{DataSource, Emitter, ResilienceConfig, ServiceCore, ServiceError, Shutdown};
use crate::domain::{BalanceBook, BalanceSnapshot, Gate, RateLimiter, RetryController, ServiceStatus};
use crate::ports::{FetchError, LedgerConnector, LedgerSession};
use crate::security::{generate_request_id, mask_address, sanitize_error, validate_endpoint};

/// Service name used in status values and logs
pub const BALANCE_SERVICE_NAME: &str = "XRPL";

/// Default interval between full balance refreshes
pub const DEFAULT_BALANCE_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest refresh interval accepted
pub const MIN_BALANCE_INTERVAL: Duration = Duration::from_secs(10);

/// Longest refresh interval accepted
pub const MAX_BALANCE_INTERVAL: Duration = Duration::from_secs(300);

/// Public XRPL nodes tried in order
pub const DEFAULT_ENDPOINTS: [&str; 4] = [
    "wss://xrplcluster.com",
    "wss://s1.ripple.com",
    "wss://s2.ripple.com",
    "wss://xrpl.ws",
];

/// Time allowed for a polite close before the session is dropped
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceServiceConfig {
    pub addresses: Vec<String>,
    pub endpoints: Vec<String>,
    pub poll_interval: Duration,
    pub resilience: ResilienceConfig,
}

impl Default for BalanceServiceConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            endpoints: DEFAULT_ENDPOINTS.iter().map(|e| e.to_string()).collect(),
            poll_interval: DEFAULT_BALANCE_INTERVAL,
            resilience: ResilienceConfig::default(),
        }
    }
}

impl BalanceServiceConfig {
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            addresses,
            ..Self::default()
        }
    }

    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Set the refresh interval, clamped to 10..=300 seconds
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.clamp(MIN_BALANCE_INTERVAL, MAX_BALANCE_INTERVAL);
        self
    }

    pub fn with_resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }

    /// Validate static settings. Any untrusted endpoint rejects the whole list.
    pub fn validated_endpoints(&self) -> Result<Vec<Url>, ServiceError> {
        if self.addresses.is_empty() {
            return Err(ServiceError::NoAddresses);
        }
        if self.endpoints.is_empty() {
            return Err(ServiceError::NoEndpoints);
        }

        self.endpoints
            .iter()
            .map(|endpoint| validate_endpoint(endpoint).map_err(|e| ServiceError::UntrustedEndpoint(e.to_string())))
            .collect()
    }
}

/// Connect and subscribe, each step bounded by `limit`
async fn open_session(
    connector: &dyn LedgerConnector,
    endpoint: &Url,
    addresses: &[String],
    limit: Duration,
) -> Result<Box<dyn LedgerSession>, FetchError> {
    let mut session = timeout(limit, connector.connect(endpoint)).await??;
    timeout(limit, session.subscribe_accounts(addresses)).await??;
    Ok(session)
}

/// Query one address and record the reply; `Ok(true)` when its value changed
async fn query_balance(
    session: &mut dyn LedgerSession,
    book: &mut BalanceBook,
    address: &str,
    limit: Duration,
) -> Result<bool, FetchError> {
    let drops = timeout(limit, session.account_balance(address)).await??;
    Ok(book.record(address, drops, Instant::now())?)
}

/// Query every address once over a fresh session, trying endpoints in order
///
/// Used for one-shot lookups outside the service loop. An address that fails
/// is reported as zero as long as another one resolved; a dropped connection
/// moves on to the next endpoint.
pub async fn fetch_balances(
    connector: &dyn LedgerConnector,
    endpoints: &[Url],
    addresses: &[String],
    limit: Duration,
) -> Result<BalanceSnapshot, FetchError> {
    let mut last_error = FetchError::Other("no endpoints".to_string());

    for endpoint in endpoints {
        let mut session = match timeout(limit, connector.connect(endpoint)).await {
            Ok(Ok(session)) => session,
            Ok(Err(err)) if err.is_fatal() => return Err(err),
            Ok(Err(err)) => {
                last_error = err;
                continue;
            }
            Err(elapsed) => {
                last_error = elapsed.into();
                continue;
            }
        };

        let mut book = BalanceBook::new(addresses);
        let mut resolved = 0usize;
        let mut dropped = None;

        for address in addresses {
            match query_balance(session.as_mut(), &mut book, address, limit).await {
                Ok(_) => resolved += 1,
                Err(err) if err.is_connection_level() => {
                    dropped = Some(err);
                    break;
                }
                Err(err) => {
                    let request_id = generate_request_id();
                    warn!(
                        request_id = %request_id,
                        "{}: balance of {} unavailable: {}",
                        BALANCE_SERVICE_NAME,
                        mask_address(address),
                        sanitize_error(&err, &request_id)
                    );
                    last_error = err;
                }
            }
        }
        let _ = timeout(CLOSE_TIMEOUT, session.close()).await;

        if let Some(err) = dropped {
            debug!(
                "{}: {} dropped mid-lookup, trying next endpoint",
                BALANCE_SERVICE_NAME,
                endpoint.host_str().unwrap_or_default()
            );
            last_error = err;
            continue;
        }
        if resolved > 0 {
            return Ok(book.snapshot(Utc::now()));
        }
    }

    Err(last_error)
}

/// Streaming balance tracker
pub struct BalanceService {
    connector: Arc<dyn LedgerConnector>,
    config: RwLock<BalanceServiceConfig>,
    core: ServiceCore<BalanceSnapshot>,
}

impl BalanceService {
    pub fn new(connector: Arc<dyn LedgerConnector>, config: BalanceServiceConfig) -> Self {
        Self {
            connector,
            config: RwLock::new(config),
            core: ServiceCore::new(BALANCE_SERVICE_NAME),
        }
    }

    /// Install one listener for status changes and balance updates
    pub fn set_listener(&self, listener: Arc<dyn ServiceListener<BalanceSnapshot>>) {
        self.core.set_listener(listener);
    }

    pub fn config(&self) -> BalanceServiceConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the configuration (e.g. new wallet list); takes effect on restart
    pub fn update_config(&self, config: BalanceServiceConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    fn worker(
        &self,
    ) -> impl FnOnce(Emitter<BalanceSnapshot>, Shutdown) -> Result<StreamLoop, ServiceError> {
        let connector = Arc::clone(&self.connector);
        let config = self.config();
        move |emitter, shutdown| {
            let endpoints = config.validated_endpoints()?;
            Ok(stream_loop(connector, endpoints, config, emitter, shutdown))
        }
    }
}

type StreamLoop = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Why a session ended
enum SessionEnd {
    Shutdown,
    Failed(FetchError),
}

/// State owned by the worker task
struct Tracker {
    config: BalanceServiceConfig,
    book: BalanceBook,
    limiter: RateLimiter,
    retry: RetryController,
    emitter: Emitter<BalanceSnapshot>,
}

fn stream_loop(
    connector: Arc<dyn LedgerConnector>,
    endpoints: Vec<Url>,
    config: BalanceServiceConfig,
    emitter: Emitter<BalanceSnapshot>,
    mut shutdown: Shutdown,
) -> StreamLoop {
    Box::pin(async move {
        let mut tracker = Tracker {
            book: BalanceBook::new(&config.addresses),
            limiter: config.resilience.rate_limiter(),
            retry: config.resilience.retry_controller(),
            config,
            emitter,
        };
        let mut endpoint_index = 0usize;

        loop {
            let (gate, transition) = tracker.retry.gate_at(Instant::now());
            tracker.emitter.note_transition(transition, &tracker.retry);

            if let Gate::Wait(remaining) = gate {
                debug!("{}: circuit open, next probe in {:?}", BALANCE_SERVICE_NAME, remaining);
                if !shutdown.sleep(remaining).await {
                    break;
                }
                continue;
            }

            if !tracker.limiter.allow() {
                debug!("{}: rate limited, delaying connect", BALANCE_SERVICE_NAME);
                if !shutdown.sleep(tracker.config.poll_interval).await {
                    break;
                }
                continue;
            }

            let endpoint = &endpoints[endpoint_index];
            let request_id = generate_request_id();
            debug!(
                request_id = %request_id,
                "{}: connecting to {}",
                BALANCE_SERVICE_NAME,
                endpoint.host_str().unwrap_or_default()
            );

            let opened = shutdown
                .run(open_session(
                    connector.as_ref(),
                    endpoint,
                    &tracker.config.addresses,
                    tracker.config.resilience.request_timeout,
                ))
                .await;

            let end = match opened {
                None => break,
                Some(Ok(mut session)) => {
                    info!(
                        "{}: session open on {}",
                        BALANCE_SERVICE_NAME,
                        endpoint.host_str().unwrap_or_default()
                    );
                    let end = tracker.run_session(session.as_mut(), &mut shutdown).await;
                    let _ = timeout(CLOSE_TIMEOUT, session.close()).await;
                    end
                }
                Some(Err(err)) => SessionEnd::Failed(err),
            };

            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Failed(err) if err.is_fatal() => {
                    tracker.emitter.record_fatal(&tracker.retry, &err, &request_id);
                    break;
                }
                SessionEnd::Failed(err) => {
                    endpoint_index = (endpoint_index + 1) % endpoints.len();
                    let delay = tracker.emitter.record_failure(&mut tracker.retry, &err, &request_id);
                    if !shutdown.sleep(delay).await {
                        break;
                    }
                }
            }
        }

        debug!("{}: stream loop exited", BALANCE_SERVICE_NAME);
    })
}

impl Tracker {
    /// Refresh on every tick and on account activity until the session fails
    async fn run_session(&mut self, session: &mut dyn LedgerSession, shutdown: &mut Shutdown) -> SessionEnd {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.requested() => return SessionEnd::Shutdown,
                _ = ticker.tick() => {}
                activity = session.next_activity() => match activity {
                    Ok(activity) => {
                        debug!(
                            "{}: account activity {}",
                            BALANCE_SERVICE_NAME,
                            activity.tx_hash.as_deref().unwrap_or("-")
                        );
                        ticker.reset();
                    }
                    Err(err) => return SessionEnd::Failed(err),
                },
            }

            if !self.limiter.allow() {
                debug!("{}: rate limited, skipping refresh", BALANCE_SERVICE_NAME);
                continue;
            }

            if let Some(end) = self.refresh(session, shutdown).await {
                return end;
            }
        }
    }

    /// One sequential pass over all addresses
    ///
    /// Returns `Some` when the session must end. A pass that resolved at least
    /// one address is a success; the others keep their last known value.
    async fn refresh(&mut self, session: &mut dyn LedgerSession, shutdown: &mut Shutdown) -> Option<SessionEnd> {
        let limit = self.config.resilience.request_timeout;
        let addresses: Vec<String> = self.book.addresses().map(str::to_string).collect();
        let mut resolved = 0usize;
        let mut changed = false;
        let mut last_error = None;

        for address in &addresses {
            let request_id = generate_request_id();
            let recorded = match shutdown
                .run(query_balance(session, &mut self.book, address, limit))
                .await
            {
                None => return Some(SessionEnd::Shutdown),
                Some(recorded) => recorded,
            };

            match recorded {
                Ok(updated) => {
                    resolved += 1;
                    changed |= updated;
                }
                Err(err) if err.is_connection_level() => return Some(SessionEnd::Failed(err)),
                Err(err) => {
                    warn!(
                        request_id = %request_id,
                        "{}: balance of {} unavailable: {}",
                        BALANCE_SERVICE_NAME,
                        mask_address(address),
                        sanitize_error(&err, &request_id)
                    );
                    if self.book.is_stale(address, Instant::now(), self.config.poll_interval * 2) {
                        debug!(
                            "{}: {} has no value newer than {:?}",
                            BALANCE_SERVICE_NAME,
                            mask_address(address),
                            self.config.poll_interval * 2
                        );
                    }
                    last_error = Some(err);
                }
            }
        }

        if resolved == 0 {
            return Some(SessionEnd::Failed(
                last_error.unwrap_or_else(|| FetchError::Other("no balances resolved".to_string())),
            ));
        }

        debug!(
            "{}: {}/{} balances resolved, {} known",
            BALANCE_SERVICE_NAME,
            resolved,
            addresses.len(),
            self.book.known()
        );
        self.emitter.record_success(&mut self.retry);
        if changed {
            self.emitter.publish(&self.book.snapshot(Utc::now()));
        } else {
            self.emitter.touch();
        }
        None
    }
}

#[async_trait]
impl DataSource for BalanceService {
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
