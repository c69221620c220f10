//! Connection Manager - broker session lifecycle
//!
//! Owns the single broker session of the process and keeps it alive with an
//! unbounded reconnect loop running as its own tokio task. The loop is a
//! statum typestate machine:
//!
//! ```text
//!            ┌──── handshake ok ────► Established ── transport error ──┐
//!  Dialing ──┤                                                         ▼
//!            └── refused / timeout ─────────────────────────────────► Backoff
//!     ▲                                                                 │
//!     └──────────────────── reconnect interval elapsed ─────────────────┘
//! ```
//!
//! Every await point also listens on a cancellation token, so `stop()` ends the
//! loop at once, including a pending reconnect timer.
//!
//! The observable [`ConnectionState`] is derived from these phases and written
//! together with the session handle under one lock, which means nobody ever
//! sees `Connected` without a usable session or a session while `Connecting`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use statum::{machine, state};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{BrokerUrl, ConnectionOptions};
use super::error::{CommandError, ConnectionError, TransportError};
use super::transport::{Dialer, Link, LinkEvent, LinkEvents};
use crate::device_state::{ConnectionState, DeviceStateTracker};

#[derive(Debug, Default)]
struct SlotInner {
    state: ConnectionState,
    link: Option<Box<dyn Link>>,
}

/// Holder of the session handle and the connection state.
///
/// Only the connection manager and its reconnect loop mutate it. Commands get
/// a borrow of the link for the duration of a single closure call.
#[derive(Debug)]
pub struct SessionSlot {
    inner: Mutex<SlotInner>,
    tracker: DeviceStateTracker,
}

impl SessionSlot {
    fn new(tracker: DeviceStateTracker) -> Self {
        Self {
            inner: Mutex::new(SlotInner::default()),
            tracker,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    fn set_state(&self, state: ConnectionState) {
        let mut inner = self.lock();
        inner.state = state;
        self.tracker.set_connection(state, None);
    }

    fn establish(&self, link: Box<dyn Link>) {
        let mut inner = self.lock();
        inner.link = Some(link);
        inner.state = ConnectionState::Connected;
        self.tracker.set_connection(ConnectionState::Connected, None);
    }

    /// Drops the session handle (if any) and moves to `next`
    fn tear_down(&self, next: ConnectionState, error: Option<String>) {
        let mut inner = self.lock();
        if inner.link.take().is_some() {
            debug!("Released broker session");
        }
        inner.state = next;
        self.tracker.set_connection(next, error);
    }

    fn with_link<R>(
        &self,
        f: impl FnOnce(&dyn Link) -> Result<R, CommandError>,
    ) -> Result<R, CommandError> {
        let inner = self.lock();
        match (&inner.state, inner.link.as_deref()) {
            (ConnectionState::Connected, Some(link)) => f(link),
            _ => Err(CommandError::NoActiveSession),
        }
    }
}

// Phases of the reconnect loop
#[state]
#[derive(Debug, Clone)]
pub enum SessionPhase {
    Dialing,
    Established,
    Backoff,
}

#[machine]
#[derive(Debug)]
pub struct SessionDriver<S: SessionPhase> {
    dialer: Arc<dyn Dialer>,
    endpoint: BrokerUrl,
    options: ConnectionOptions,
    slot: Arc<SessionSlot>,
    cancel: CancellationToken,

    // Network half of the established session
    events: Option<Box<dyn LinkEvents>>,

    // Attempts since the last successful handshake
    attempts: u64,
}

pub enum DialOutcome {
    Established(SessionDriver<Established>),
    Failed(SessionDriver<Backoff>),
    Cancelled,
}

async fn await_handshake(events: &mut dyn LinkEvents) -> Result<(), TransportError> {
    loop {
        match events.next_event().await? {
            LinkEvent::Connected => return Ok(()),
            LinkEvent::Activity => continue,
        }
    }
}

impl SessionDriver<Dialing> {
    pub fn create(
        dialer: Arc<dyn Dialer>,
        endpoint: BrokerUrl,
        options: ConnectionOptions,
        slot: Arc<SessionSlot>,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(dialer, endpoint, options, slot, cancel, None, 0)
    }

    /// Opens a fresh session and waits for the handshake, bounded by the
    /// connect timeout.
    pub async fn dial(mut self) -> DialOutcome {
        self.attempts += 1;
        let client_id = self.options.generate_client_id();
        info!(
            "Connecting to {} as {} (attempt {})",
            self.endpoint, client_id, self.attempts
        );

        let timeout = self.options.connect_timeout;
        let cancel = self.cancel.clone();

        let handshake = match self.dialer.dial(&self.endpoint, &client_id, &self.options) {
            Ok((link, mut events)) => {
                let result = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Connection attempt cancelled");
                        return DialOutcome::Cancelled;
                    }
                    result = tokio::time::timeout(timeout, await_handshake(&mut *events)) => {
                        result.unwrap_or(Err(TransportError::Timeout(timeout)))
                    }
                };
                result.map(|()| (link, events))
            }
            Err(e) => Err(e),
        };

        match handshake {
            Ok((link, events)) => {
                info!("Connected to {} as {}", self.endpoint, client_id);
                self.attempts = 0;
                self.events = Some(events);
                self.slot.establish(link);
                DialOutcome::Established(self.transition())
            }
            Err(e) => {
                warn!("Connection attempt {} failed: {}", self.attempts, e);
                self.slot
                    .tear_down(ConnectionState::Failed, Some(e.to_string()));
                DialOutcome::Failed(self.transition())
            }
        }
    }
}

impl SessionDriver<Established> {
    /// Drives network I/O until the session breaks. Returns `None` when
    /// cancelled.
    pub async fn supervise(mut self) -> Option<SessionDriver<Backoff>> {
        let cancel = self.cancel.clone();
        let Some(mut events) = self.events.take() else {
            error!("Established session without event stream");
            self.slot.tear_down(
                ConnectionState::Connecting,
                Some("missing event stream".to_string()),
            );
            return Some(self.transition());
        };

        let failure = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Session supervision cancelled");
                    return None;
                }
                event = events.next_event() => match event {
                    Ok(LinkEvent::Activity) => {}
                    Ok(LinkEvent::Connected) => debug!("Broker re-acknowledged session"),
                    Err(e) => break e,
                },
            }
        };

        drop(events);
        warn!("Broker session lost: {}", failure);
        // No partially connected state: the handle goes before anything else
        self.slot
            .tear_down(ConnectionState::Connecting, Some(failure.to_string()));
        Some(self.transition())
    }
}

impl SessionDriver<Backoff> {
    /// Sleeps for the reconnect interval. Returns `None` when cancelled.
    pub async fn wait(self) -> Option<SessionDriver<Dialing>> {
        let interval = self.options.reconnect_interval;
        let cancel = self.cancel.clone();
        debug!("Next connection attempt in {:?}", interval);

        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(interval) => false,
        };
        if cancelled {
            debug!("Reconnect timer cancelled");
            return None;
        }

        self.slot.set_state(ConnectionState::Connecting);
        Some(self.transition())
    }
}

async fn run_session_loop(mut driver: SessionDriver<Dialing>) {
    info!("Reconnect loop started");
    loop {
        let backoff = match driver.dial().await {
            DialOutcome::Established(established) => match established.supervise().await {
                Some(backoff) => backoff,
                None => break,
            },
            DialOutcome::Failed(backoff) => backoff,
            DialOutcome::Cancelled => break,
        };

        driver = match backoff.wait().await {
            Some(dialing) => dialing,
            None => break,
        };
    }
    info!("Reconnect loop stopped");
}

#[derive(Debug)]
struct SessionWorker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Public handle of the connection lifecycle.
///
/// Network I/O runs on a spawned task, so `start` returns immediately and a
/// stalled connect attempt never blocks command issuance.
#[derive(Debug)]
pub struct ConnectionManager {
    dialer: Arc<dyn Dialer>,
    slot: Arc<SessionSlot>,
    worker: Option<SessionWorker>,
}

impl ConnectionManager {
    pub fn new(dialer: Arc<dyn Dialer>, tracker: DeviceStateTracker) -> Self {
        Self {
            dialer,
            slot: Arc::new(SessionSlot::new(tracker)),
            worker: None,
        }
    }

    /// Moves to `Connecting` and spawns the reconnect loop.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// * [`ConnectionError::AlreadyStarted`] - the loop is still running
    /// * [`ConnectionError::NoRuntime`] - called outside a tokio runtime
    pub fn start(
        &mut self,
        endpoint: BrokerUrl,
        options: ConnectionOptions,
    ) -> Result<(), ConnectionError> {
        if let Some(worker) = &self.worker {
            if !worker.handle.is_finished() {
                return Err(ConnectionError::AlreadyStarted);
            }
        }
        let runtime = Handle::try_current().map_err(|_| ConnectionError::NoRuntime)?;

        info!(
            "Starting connection to {} (reconnect every {:?}, timeout {:?})",
            endpoint, options.reconnect_interval, options.connect_timeout
        );
        self.slot.tear_down(ConnectionState::Connecting, None);

        let cancel = CancellationToken::new();
        let driver = SessionDriver::create(
            self.dialer.clone(),
            endpoint,
            options,
            self.slot.clone(),
            cancel.clone(),
        );
        let handle = runtime.spawn(run_session_loop(driver));

        self.worker = Some(SessionWorker { cancel, handle });
        Ok(())
    }

    /// Cancels the reconnect loop, waits for it to finish and releases the
    /// session. Safe to call any number of times.
    pub async fn stop(&mut self) {
        match self.worker.take() {
            Some(worker) => {
                info!("Stopping broker connection");
                worker.cancel.cancel();
                if let Err(e) = worker.handle.await {
                    error!("Reconnect loop ended abnormally: {}", e);
                }
            }
            None => debug!("Connection already stopped"),
        }
        self.slot.tear_down(ConnectionState::Disconnected, None);
    }

    pub fn state(&self) -> ConnectionState {
        self.slot.state()
    }

    /// Borrows the live session for one call.
    ///
    /// Fails with [`CommandError::NoActiveSession`] unless the state is
    /// `Connected` at the moment of the call.
    pub fn with_session<R>(
        &self,
        f: impl FnOnce(&dyn Link) -> Result<R, CommandError>,
    ) -> Result<R, CommandError> {
        self.slot.with_link(f)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
            worker.handle.abort();
        }
        self.slot.tear_down(ConnectionState::Disconnected, None);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::watch;
    use tokio::time::Instant;

    use super::*;
    use crate::device_state::DeviceSnapshot;
    use crate::mqtt::message::OutboundMessage;
    use crate::mqtt::transport::fake::{DialBehavior, FakeBroker};

    const RECONNECT: Duration = Duration::from_millis(1000);
    const CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

    fn endpoint() -> BrokerUrl {
        BrokerUrl::parse("mqtt://localhost").unwrap()
    }

    fn options() -> ConnectionOptions {
        ConnectionOptions {
            reconnect_interval: RECONNECT,
            connect_timeout: CONNECT_TIMEOUT,
            ..Default::default()
        }
    }

    fn new_manager(broker: &FakeBroker) -> (ConnectionManager, DeviceStateTracker) {
        let tracker = DeviceStateTracker::new();
        (
            ConnectionManager::new(broker.dialer(), tracker.clone()),
            tracker,
        )
    }

    async fn wait_for_state(rx: &mut watch::Receiver<DeviceSnapshot>, state: ConnectionState) {
        rx.wait_for(|snapshot| snapshot.connection == state)
            .await
            .unwrap();
    }

    async fn wait_for_dials(broker: &FakeBroker, count: usize) {
        while broker.dials() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn connects_and_reports_connected() {
        let broker = FakeBroker::new(DialBehavior::Accept);
        let (mut manager, tracker) = new_manager(&broker);
        let mut rx = tracker.subscribe();

        manager.start(endpoint(), options()).unwrap();
        assert_eq!(manager.state(), ConnectionState::Connecting);

        wait_for_state(&mut rx, ConnectionState::Connected).await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(broker.dials(), 1);
        assert!(broker.client_ids()[0].starts_with("rn_led_"));

        manager.stop().await;
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let broker = FakeBroker::new(DialBehavior::Accept);
        let (mut manager, _tracker) = new_manager(&broker);

        manager.start(endpoint(), options()).unwrap();
        assert_eq!(
            manager.start(endpoint(), options()),
            Err(ConnectionError::AlreadyStarted)
        );

        manager.stop().await;
        manager.start(endpoint(), options()).unwrap();
        manager.stop().await;
    }

    #[test]
    fn start_requires_a_runtime() {
        let broker = FakeBroker::new(DialBehavior::Accept);
        let (mut manager, _tracker) = new_manager(&broker);
        assert_eq!(
            manager.start(endpoint(), options()),
            Err(ConnectionError::NoRuntime)
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let broker = FakeBroker::new(DialBehavior::Accept);
        let (mut manager, tracker) = new_manager(&broker);

        manager.stop().await;
        manager.stop().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let mut rx = tracker.subscribe();
        manager.start(endpoint(), options()).unwrap();
        wait_for_state(&mut rx, ConnectionState::Connected).await;

        manager.stop().await;
        manager.stop().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(tracker.snapshot().connection, ConnectionState::Disconnected);
        assert!(matches!(
            manager.with_session(|_| Ok(())),
            Err(CommandError::NoActiveSession)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_falls_back_to_connecting_and_redials() {
        let broker = FakeBroker::new(DialBehavior::Accept);
        let (mut manager, tracker) = new_manager(&broker);
        let mut rx = tracker.subscribe();

        manager.start(endpoint(), options()).unwrap();
        wait_for_state(&mut rx, ConnectionState::Connected).await;

        let lost_at = Instant::now();
        assert!(broker.drop_connection(TransportError::Network("reset by peer".into())));

        wait_for_state(&mut rx, ConnectionState::Connecting).await;
        assert_eq!(broker.dials(), 1);
        assert!(matches!(
            manager.with_session(|_| Ok(())),
            Err(CommandError::NoActiveSession)
        ));
        assert!(tracker
            .snapshot()
            .last_error
            .unwrap()
            .contains("reset by peer"));

        wait_for_dials(&broker, 2).await;
        let elapsed = lost_at.elapsed();
        assert!(elapsed >= RECONNECT, "redialed after {elapsed:?}");
        assert!(elapsed < RECONNECT + Duration::from_millis(100));

        wait_for_state(&mut rx, ConnectionState::Connected).await;
        assert_ne!(broker.client_ids()[0], broker.client_ids()[1]);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_marks_failed_then_retries() {
        let broker = FakeBroker::new(DialBehavior::Silent);
        let (mut manager, tracker) = new_manager(&broker);
        let mut rx = tracker.subscribe();
        let started = Instant::now();

        manager.start(endpoint(), options()).unwrap();
        wait_for_state(&mut rx, ConnectionState::Failed).await;
        assert!(started.elapsed() >= CONNECT_TIMEOUT);
        assert!(tracker.snapshot().last_error.unwrap().contains("timed out"));

        wait_for_state(&mut rx, ConnectionState::Connecting).await;
        wait_for_dials(&broker, 2).await;

        broker.set_behavior(DialBehavior::Accept);
        wait_for_state(&mut rx, ConnectionState::Connected).await;
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn refused_dials_are_retried_without_limit() {
        let broker = FakeBroker::new(DialBehavior::Refuse);
        let (mut manager, tracker) = new_manager(&broker);
        let mut rx = tracker.subscribe();

        manager.start(endpoint(), options()).unwrap();
        wait_for_dials(&broker, 10).await;
        assert_ne!(manager.state(), ConnectionState::Disconnected);
        assert_ne!(manager.state(), ConnectionState::Connected);

        broker.set_behavior(DialBehavior::Accept);
        wait_for_state(&mut rx, ConnectionState::Connected).await;
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_reconnect() {
        let broker = FakeBroker::new(DialBehavior::Accept);
        let (mut manager, tracker) = new_manager(&broker);
        let mut rx = tracker.subscribe();

        manager.start(endpoint(), options()).unwrap();
        wait_for_state(&mut rx, ConnectionState::Connected).await;
        broker.drop_connection(TransportError::Closed("gone".into()));
        wait_for_state(&mut rx, ConnectionState::Connecting).await;

        manager.stop().await;
        tokio::time::sleep(RECONNECT * 5).await;

        assert_eq!(broker.dials(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn session_is_lent_only_while_connected() {
        let broker = FakeBroker::new(DialBehavior::Accept);
        let (mut manager, tracker) = new_manager(&broker);
        let mut rx = tracker.subscribe();

        manager.start(endpoint(), options()).unwrap();
        wait_for_state(&mut rx, ConnectionState::Connected).await;

        manager
            .with_session(|link| Ok(link.publish(&OutboundMessage::new("t", "p"))?))
            .unwrap();
        assert_eq!(broker.published().len(), 1);

        manager.stop().await;
    }

    #[tokio::test]
    async fn dropping_the_manager_releases_the_session() {
        let broker = FakeBroker::new(DialBehavior::Accept);
        let (mut manager, tracker) = new_manager(&broker);
        let mut rx = tracker.subscribe();

        manager.start(endpoint(), options()).unwrap();
        wait_for_state(&mut rx, ConnectionState::Connected).await;

        drop(manager);
        assert_eq!(tracker.snapshot().connection, ConnectionState::Disconnected);
    }
}
