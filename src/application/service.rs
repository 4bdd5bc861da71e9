//! Data Source Service contract
//!
//! The lifecycle shared by the price poller and the balance streamer. A
//! `ServiceCore` owns the dispatcher, the published status and at most one
//! worker task. The worker gets an [`Emitter`] for events and a [`Shutdown`]
//! handle it races against every await.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::dispatch::{Dispatcher, ServiceListener};
use crate::domain::{
    Backoff, BreakerTransition, CircuitBreaker, ConnectionState, RateLimiter, RetryController, RetryCounters,
    ServiceStatus,
};
use crate::domain::backoff::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
use crate::domain::circuit_breaker::{DEFAULT_COOLDOWN_SECS, DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_COOLDOWN_SECS};
use crate::domain::rate_limiter::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS};
use crate::ports::FetchError;
use crate::security::{generate_request_id, sanitize_error, Categorize, ErrorCategory};

/// Upper bound on how long `stop()` waits for the worker before aborting it
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Default timeout of a single network call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned by service lifecycle operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Untrusted endpoint: {0}")]
    UntrustedEndpoint(String),

    #[error("No endpoints configured")]
    NoEndpoints,

    #[error("No wallet addresses configured")]
    NoAddresses,
}

impl Categorize for ServiceError {
    fn category(&self) -> ErrorCategory {
        match self {
            ServiceError::UntrustedEndpoint(_) | ServiceError::NoEndpoints => ErrorCategory::UntrustedEndpoint,
            ServiceError::NoAddresses => ErrorCategory::Other,
        }
    }
}

/// A long-lived data source with an independent failure domain
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Begin the service loop. Idempotent while running.
    async fn start(&self) -> Result<(), ServiceError>;

    /// Clear listeners, then tear the loop down. No callback fires after this returns.
    async fn stop(&self);

    /// Stop and start again, keeping the installed listeners
    async fn restart(&self) -> Result<(), ServiceError>;

    fn status(&self) -> ServiceStatus;

    fn is_running(&self) -> bool;
}

/// Rate limit, breaker, backoff and timeout settings of one service
#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceConfig {
    pub max_requests_per_window: usize,
    pub rate_window: Duration,
    pub failure_threshold: u32,
    pub breaker_cooldown: Duration,
    pub max_breaker_cooldown: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub request_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: DEFAULT_MAX_REQUESTS,
            rate_window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            breaker_cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            max_breaker_cooldown: Duration::from_secs(DEFAULT_MAX_COOLDOWN_SECS),
            backoff_base: DEFAULT_BASE_DELAY,
            backoff_max: DEFAULT_MAX_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ResilienceConfig {
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.max_requests_per_window, self.rate_window)
    }

    pub fn retry_controller(&self) -> RetryController {
        RetryController::new(
            Backoff::new(self.backoff_base, self.backoff_max),
            CircuitBreaker::with_config(self.failure_threshold, self.breaker_cooldown, self.max_breaker_cooldown),
        )
    }
}

type StatusCell = Arc<RwLock<ServiceStatus>>;

/// Event side of a running worker
pub struct Emitter<T> {
    name: &'static str,
    dispatcher: Arc<Dispatcher<T>>,
    status: StatusCell,
}

impl<T> Emitter<T> {
    pub fn current(&self) -> ServiceStatus {
        self.status.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the status and deliver it
    pub fn set_status(&self, state: ConnectionState, last_error: Option<&str>, counters: RetryCounters) {
        let next = self.current().transition(state, last_error, counters);
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = next.clone();
        self.dispatcher.emit_status(&next);
    }

    /// Record a successful exchange; announces `Connected` on a state change
    pub fn record_success(&self, retry: &mut RetryController) {
        let transition = retry.record_success();
        if transition == Some(BreakerTransition::Closed) {
            info!("{}: circuit closed", self.name);
        }
        if self.current().state() != ConnectionState::Connected {
            info!("{}: connected", self.name);
            self.set_status(ConnectionState::Connected, None, retry.counters());
        }
    }

    /// Record a failed exchange and return how long to back off
    ///
    /// The raw error goes to the debug log under `request_id`; the status only
    /// ever carries the sanitized phrase.
    pub fn record_failure(&self, retry: &mut RetryController, error: &FetchError, request_id: &str) -> Duration {
        let phrase = sanitize_error(error, request_id);
        let outcome = retry.record_failure_at(Instant::now());
        let state = if outcome.transition == Some(BreakerTransition::Opened) {
            ConnectionState::Failed
        } else {
            ConnectionState::Reconnecting
        };

        warn!(
            request_id = %request_id,
            "{}: {} (retry in {:?})",
            self.name,
            phrase,
            outcome.delay
        );
        self.set_status(state, Some(phrase), retry.counters());
        outcome.delay
    }

    /// Report an error that retrying cannot fix; the worker exits after this
    pub fn record_fatal(&self, retry: &RetryController, error: &FetchError, request_id: &str) {
        let phrase = sanitize_error(error, request_id);
        error!(request_id = %request_id, "{}: {}, giving up", self.name, phrase);
        self.set_status(ConnectionState::Failed, Some(phrase), retry.counters());
    }

    /// Announce that the breaker let a probe through
    pub fn note_transition(&self, transition: Option<BreakerTransition>, retry: &RetryController) {
        if transition == Some(BreakerTransition::HalfOpened) {
            let last_error = self.current().last_error().map(str::to_string);
            self.set_status(ConnectionState::Reconnecting, last_error.as_deref(), retry.counters());
        }
    }

    /// Record that data was confirmed fresh without delivering anything
    pub fn touch(&self) {
        let next = self.current().touched(Utc::now());
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Deliver a fresh snapshot
    pub fn publish(&self, data: &T) {
        self.touch();
        self.dispatcher.emit_update(data);
    }
}

/// Cancellation side of a running worker
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolves once shutdown was requested or the service handle is gone
    pub async fn requested(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Run `fut` unless shutdown wins the race
    pub async fn run<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.requested() => None,
            output = fut => Some(output),
        }
    }

    /// Sleep unless shutdown wins; returns false when cancelled
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        self.run(tokio::time::sleep(duration)).await.is_some()
    }
}

struct Worker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Lifecycle machinery shared by every [`DataSource`]
pub struct ServiceCore<T> {
    name: &'static str,
    dispatcher: Arc<Dispatcher<T>>,
    status: StatusCell,
    worker: Mutex<Option<Worker>>,
}

impl<T: Send + Sync + 'static> ServiceCore<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            dispatcher: Arc::new(Dispatcher::new()),
            status: Arc::new(RwLock::new(ServiceStatus::initial(name))),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn set_listener(&self, listener: Arc<dyn ServiceListener<T>>) {
        self.dispatcher.set_listener(listener);
    }

    pub fn status(&self) -> ServiceStatus {
        self.status.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |w| !w.handle.is_finished())
    }

    fn emitter(&self) -> Emitter<T> {
        Emitter {
            name: self.name,
            dispatcher: Arc::clone(&self.dispatcher),
            status: Arc::clone(&self.status),
        }
    }

    fn replace_status(&self, status: ServiceStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Spawn the worker built by `prepare` unless one is already running
    ///
    /// `prepare` validates static configuration; its error is fatal and is
    /// reported as a `Failed` status carrying the sanitized phrase.
    pub async fn start<F, Fut>(&self, prepare: F) -> Result<(), ServiceError>
    where
        F: FnOnce(Emitter<T>, Shutdown) -> Result<Fut, ServiceError>,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().map_or(false, |w| !w.handle.is_finished()) {
            debug!("{}: already running", self.name);
            return Ok(());
        }

        let (tx, rx) = watch::channel(false);
        let initial = ServiceStatus::initial(self.name);

        let body = match prepare(self.emitter(), Shutdown { rx }) {
            Ok(body) => body,
            Err(err) => {
                let phrase = sanitize_error(&err, &generate_request_id());
                error!("{}: refusing to start: {}", self.name, phrase);
                let failed = initial.transition(ConnectionState::Failed, Some(phrase), RetryCounters::default());
                self.replace_status(failed.clone());
                self.dispatcher.emit_status(&failed);
                return Err(err);
            }
        };

        info!("{}: starting", self.name);
        self.replace_status(initial);
        self.emitter()
            .set_status(ConnectionState::Reconnecting, None, RetryCounters::default());

        *worker = Some(Worker {
            handle: tokio::spawn(body),
            shutdown: tx,
        });
        Ok(())
    }

    /// Clear listeners, then stop the worker within [`STOP_GRACE`]
    pub async fn stop(&self) {
        self.dispatcher.clear();
        self.halt().await;
    }

    /// Stop and start again with the same listeners
    pub async fn restart<F, Fut>(&self, prepare: F) -> Result<(), ServiceError>
    where
        F: FnOnce(Emitter<T>, Shutdown) -> Result<Fut, ServiceError>,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listeners = self.dispatcher.take();
        self.halt().await;
        self.dispatcher.restore(listeners);
        self.start(prepare).await
    }

    async fn halt(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(Worker { mut handle, shutdown }) = worker {
            let _ = shutdown.send(true);
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                warn!("{}: worker did not stop within {:?}, aborting", self.name, STOP_GRACE);
                handle.abort();
            }
            info!("{}: stopped", self.name);
        }

        let current = self.status();
        self.replace_status(current.transition(ConnectionState::Disconnected, None, RetryCounters::default()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatch::{ChannelListener, ServiceEvent};

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let core: ServiceCore<u32> = ServiceCore::new("test");
        let mut spawned = 0;

        core.start(|_, mut shutdown| {
            spawned += 1;
            Ok(async move { shutdown.requested().await })
        })
        .await
        .unwrap();
        core.start(|_, mut shutdown| {
            spawned += 1;
            Ok(async move { shutdown.requested().await })
        })
        .await
        .unwrap();

        assert_eq!(spawned, 1);
        assert!(core.is_running());
        assert_eq!(core.status().state(), ConnectionState::Reconnecting);

        core.stop().await;
        assert!(!core.is_running());
        assert_eq!(core.status().state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_prepare_reports_failed() {
        let core: ServiceCore<u32> = ServiceCore::new("test");
        let (listener, mut rx) = ChannelListener::channel();
        core.set_listener(listener);

        let result = core
            .start(|_, _| Err::<std::future::Ready<()>, _>(ServiceError::UntrustedEndpoint("wss://evil.com".into())))
            .await;

        assert!(matches!(result, Err(ServiceError::UntrustedEndpoint(_))));
        assert!(!core.is_running());
        match rx.try_recv() {
            Some(ServiceEvent::Status(status)) => {
                assert_eq!(status.state(), ConnectionState::Failed);
                assert_eq!(status.last_error(), Some("Endpoint not trusted"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_unresponsive_worker() {
        let core: ServiceCore<u32> = ServiceCore::new("test");
        core.start(|_, _| Ok(std::future::pending::<()>())).await.unwrap();

        let started = Instant::now();
        core.stop().await;

        assert!(started.elapsed() >= STOP_GRACE);
        assert!(!core.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_listener() {
        let core: ServiceCore<u32> = ServiceCore::new("test");
        let (listener, mut rx) = ChannelListener::channel();
        core.set_listener(listener);

        core.start(|_, mut shutdown| Ok(async move { shutdown.requested().await }))
            .await
            .unwrap();
        core.restart(|emitter, mut shutdown| {
            Ok(async move {
                emitter.publish(&42);
                shutdown.requested().await
            })
        })
        .await
        .unwrap();
        tokio::task::yield_now().await;

        let events = rx.drain();
        assert!(events.contains(&ServiceEvent::Update(42)));
        core.stop().await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_sleep_is_cancellable() {
        let (tx, rx) = watch::channel(false);
        let mut shutdown = Shutdown { rx };

        let sleeper = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(3600)).await });
        tx.send(true).unwrap();

        assert!(!sleeper.await.unwrap());
    }
}
