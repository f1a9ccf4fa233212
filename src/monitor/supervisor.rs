use std::future::{Future, pending};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::backoff::ReconnectState;
use super::config::MonitorConfig;
use super::state::{ConnectionState, ConnectionStateTracker, StateEvent};
use crate::error::HeartRateError;
use crate::hw::{
    Backend, ConnectionSession, DeviceHandle, DeviceId, DeviceScanner, SessionEvent, platform,
};
use crate::measurement::HeartRateReading;

/// Requests sent by the facade; each carries its reply channel.
#[derive(Debug)]
pub(crate) enum Command {
    Initialize {
        reply: oneshot::Sender<Result<(), HeartRateError>>,
    },
    ScanAndConnect {
        timeout: Duration,
        reply: oneshot::Sender<Result<DeviceHandle, HeartRateError>>,
    },
    ConnectToDevice {
        device_id: DeviceId,
        timeout: Duration,
        reply: oneshot::Sender<Result<DeviceHandle, HeartRateError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    ResetReconnect {
        reply: oneshot::Sender<()>,
    },
    ReconnectState {
        reply: oneshot::Sender<ReconnectState>,
    },
}

/// Everything the supervisor reacts to arrives through this queue.
#[derive(Debug)]
pub(crate) enum SupervisorEvent {
    Command(Command),
    HealthTick,
    ReconnectDue { generation: u64 },
}

/// Cancellation handle for the scan currently in flight, shared with the facade.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScanControl {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl ScanControl {
    fn lock(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        *self.lock() = Some(token.clone());
        token
    }

    fn finish(&self) {
        self.lock().take();
    }

    /// Cancels the in-flight scan, returning whether there was one.
    pub(crate) fn cancel(&self) -> bool {
        match self.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

enum Step {
    Shutdown,
    Event(Option<SupervisorEvent>),
    Session(SessionEvent),
}

/// Single owner of the session, the reconnect bookkeeping and the published state.
pub(crate) struct Supervisor {
    backend: Backend,
    scanner: DeviceScanner,
    config: MonitorConfig,
    tracker: ConnectionStateTracker,
    reconnect: ReconnectState,
    session: Option<ConnectionSession>,
    device: Option<DeviceHandle>,
    rng: StdRng,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
    events: mpsc::UnboundedReceiver<SupervisorEvent>,
    readings: broadcast::Sender<HeartRateReading>,
    shutdown: CancellationToken,
    scan_control: ScanControl,
    reconnect_timer: Option<JoinHandle<()>>,
    timer_generation: u64,
}

pub(crate) struct SupervisorParts {
    pub(crate) backend: Backend,
    pub(crate) config: MonitorConfig,
    pub(crate) tracker: ConnectionStateTracker,
    pub(crate) events_tx: mpsc::UnboundedSender<SupervisorEvent>,
    pub(crate) events: mpsc::UnboundedReceiver<SupervisorEvent>,
    pub(crate) readings: broadcast::Sender<HeartRateReading>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) scan_control: ScanControl,
}

impl Supervisor {
    pub(crate) fn new(parts: SupervisorParts) -> Self {
        let SupervisorParts {
            backend,
            config,
            tracker,
            events_tx,
            events,
            readings,
            shutdown,
            scan_control,
        } = parts;
        let scanner = DeviceScanner::new(backend.transport().clone(), config.scan().clone());

        Self {
            backend,
            scanner,
            config,
            tracker,
            reconnect: ReconnectState::default(),
            session: None,
            device: None,
            rng: StdRng::from_entropy(),
            events_tx,
            events,
            readings,
            shutdown,
            scan_control,
            reconnect_timer: None,
            timer_generation: 0,
        }
    }

    /// Runs until the shutdown token fires, then releases every resource it owns.
    pub(crate) async fn run(mut self) {
        let health_ticker = self.spawn_health_ticker();
        info!(transport = self.backend.transport().name(), "supervisor started");

        loop {
            let step = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => Step::Shutdown,
                event = self.events.recv() => Step::Event(event),
                event = next_session_event(&mut self.session) => Step::Session(event),
            };

            match step {
                Step::Shutdown | Step::Event(None) => break,
                Step::Event(Some(event)) => self.handle_event(event).await,
                Step::Session(SessionEvent::Reading(reading)) => self.forward_reading(reading),
                Step::Session(SessionEvent::Disconnected) => self.handle_link_loss("link dropped").await,
            }
        }

        health_ticker.abort();
        self.cancel_reconnect_timer();
        if let Some(session) = self.session.take() {
            session.teardown().await;
        }
        self.tracker.apply(StateEvent::DisconnectRequested);
        info!("supervisor stopped");
    }

    fn spawn_health_ticker(&self) -> JoinHandle<()> {
        let events = self.events_tx.clone();
        let period = self.config.health().check_interval();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if events.send(SupervisorEvent::HealthTick).is_err() {
                    return;
                }
            }
        })
    }

    async fn handle_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Command(command) => self.handle_command(command).await,
            SupervisorEvent::HealthTick => self.check_health().await,
            SupervisorEvent::ReconnectDue { generation } => {
                if generation != self.timer_generation || !self.reconnect.is_reconnecting() {
                    debug!(generation, current = self.timer_generation, "ignoring stale reconnect timer");
                    return;
                }
                self.reconnect_timer = None;
                self.attempt_reconnect().await;
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Initialize { reply } => {
                let result = self.initialize().await;
                let _ = reply.send(result);
            }
            Command::ScanAndConnect { timeout, reply } => {
                let result = self.scan_and_connect(timeout).await;
                let _ = reply.send(result);
            }
            Command::ConnectToDevice {
                device_id,
                timeout,
                reply,
            } => {
                let result = self.connect_to_device(device_id, timeout).await;
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::ResetReconnect { reply } => {
                self.reset_reconnect();
                let _ = reply.send(());
            }
            Command::ReconnectState { reply } => {
                let _ = reply.send(self.reconnect);
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn initialize(&mut self) -> Result<(), HeartRateError> {
        let platform = self.backend.platform().as_ref();
        let result = until_shutdown(&self.shutdown, platform::ensure_ready(platform)).await;
        if let Err(error) = &result
            && !matches!(error, HeartRateError::Disposed)
        {
            self.tracker.fail(error);
        }
        result
    }

    #[instrument(skip(self), level = "debug")]
    async fn scan_and_connect(&mut self, timeout: Duration) -> Result<DeviceHandle, HeartRateError> {
        if let Some(session) = &self.session
            && self.tracker.current() == ConnectionState::Connected
        {
            debug!("already connected");
            return Ok(session.device().clone());
        }
        self.cancel_recovery();
        self.release_session().await;

        let scan_cancel = self.scan_control.begin(&self.shutdown);
        let backend = &self.backend;
        let scanner = &self.scanner;
        let tracker = &self.tracker;
        let connect_timeout = self.config.connect_timeout();
        let result = until_shutdown(&self.shutdown, async move {
            platform::ensure_ready(backend.platform().as_ref()).await?;
            tracker.apply(StateEvent::ScanStarted);
            let device = scanner
                .scan_for_heart_rate_device(timeout, &scan_cancel)
                .await?;
            ConnectionSession::connect(
                backend.transport().as_ref(),
                device,
                connect_timeout,
                tracker,
            )
            .await
        })
        .await;
        self.scan_control.finish();

        self.finish_initial_connect(result)
    }

    #[instrument(skip(self), level = "debug", fields(%device_id))]
    async fn connect_to_device(
        &mut self,
        device_id: DeviceId,
        timeout: Duration,
    ) -> Result<DeviceHandle, HeartRateError> {
        let transport = self.backend.transport().clone();
        if !transport.supports_connect_by_id() {
            return Err(HeartRateError::Unsupported {
                transport: transport.name(),
            });
        }
        if let Some(session) = &self.session
            && session.device().id() == &device_id
            && self.tracker.current() == ConnectionState::Connected
        {
            return Ok(session.device().clone());
        }
        self.cancel_recovery();
        self.release_session().await;

        let backend = &self.backend;
        let tracker = &self.tracker;
        let known = self
            .device
            .as_ref()
            .filter(|device| device.id() == &device_id)
            .cloned();
        let device = known.unwrap_or_else(|| DeviceHandle::new(device_id, None, None));
        let result = until_shutdown(&self.shutdown, async move {
            platform::ensure_ready(backend.platform().as_ref()).await?;
            ConnectionSession::connect(transport.as_ref(), device, timeout, tracker).await
        })
        .await;

        self.finish_initial_connect(result)
    }

    fn finish_initial_connect(
        &mut self,
        result: Result<ConnectionSession, HeartRateError>,
    ) -> Result<DeviceHandle, HeartRateError> {
        match result {
            Ok(session) => {
                let device = session.device().clone();
                self.adopt_session(session);
                Ok(device)
            }
            Err(HeartRateError::ScanCancelled) => {
                info!("scan stopped by request");
                self.tracker.apply(StateEvent::ScanStopped);
                Err(HeartRateError::ScanCancelled)
            }
            Err(HeartRateError::Disposed) => Err(HeartRateError::Disposed),
            Err(error) => {
                warn!(%error, "initial connection failed");
                self.tracker.fail(&error);
                Err(error)
            }
        }
    }

    fn adopt_session(&mut self, session: ConnectionSession) {
        self.device = Some(session.device().clone());
        self.session = Some(session);
        self.reconnect.record_success();
        self.tracker.set_reconnecting(false, 0);
    }

    async fn disconnect(&mut self) {
        self.cancel_recovery();
        self.scan_control.cancel();
        self.release_session().await;
        self.tracker.apply(StateEvent::DisconnectRequested);
    }

    fn reset_reconnect(&mut self) {
        info!("reconnect state reset");
        self.cancel_recovery();
        self.tracker.clear_error();
        self.tracker.apply(StateEvent::Reset);
    }

    fn forward_reading(&self, reading: HeartRateReading) {
        if self.tracker.current() != ConnectionState::Connected {
            debug!("dropping reading received outside the connected state");
            return;
        }
        // No subscribers is fine.
        let _ = self.readings.send(reading);
    }

    async fn check_health(&mut self) {
        if self.tracker.current() != ConnectionState::Connected {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let idle = session.last_activity_at().elapsed();
        let stale_threshold = self.config.health().stale_threshold();
        if idle > stale_threshold {
            warn!(
                idle = %humantime::format_duration(idle),
                "no readings within the stale threshold"
            );
            self.handle_link_loss("stale data").await;
        } else if !session.is_link_connected().await {
            warn!("transport reports the link as disconnected");
            self.handle_link_loss("transport disconnected").await;
        } else {
            debug!(idle = %humantime::format_duration(idle), "health check passed");
        }
    }

    #[instrument(skip(self), level = "info")]
    async fn handle_link_loss(&mut self, reason: &'static str) {
        self.release_session().await;
        self.tracker.apply(StateEvent::LinkLost);

        if self.reconnect.is_reconnecting() {
            debug!("recovery already in progress");
            return;
        }
        if self.device.is_none() {
            return;
        }
        self.reconnect.begin_recovery();
        self.tracker
            .set_reconnecting(true, self.reconnect.attempt_count());
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_reconnect_timer();
        let attempt = self.reconnect.attempt_count();
        let delay = self
            .config
            .reconnect()
            .jittered_delay(attempt, &mut self.rng);
        let generation = self.timer_generation;
        let events = self.events_tx.clone();
        info!(
            next_attempt = attempt + 1,
            delay = %humantime::format_duration(delay),
            "scheduling reconnect"
        );

        self.reconnect_timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(SupervisorEvent::ReconnectDue { generation });
        }));
    }

    #[instrument(skip(self), level = "info", fields(attempt = tracing::field::Empty))]
    async fn attempt_reconnect(&mut self) {
        let Some(device) = self.device.clone() else {
            self.reconnect.end_recovery();
            return;
        };
        let attempt = self.reconnect.begin_attempt();
        tracing::Span::current().record("attempt", attempt);
        self.tracker.set_reconnecting(true, attempt);

        let backend = &self.backend;
        let scanner = &self.scanner;
        let tracker = &self.tracker;
        let rediscovery_timeout = self.config.scan().rediscovery_timeout();
        let connect_timeout = self.config.connect_timeout();
        let cancel = self.shutdown.child_token();
        let result = until_shutdown(&self.shutdown, async move {
            platform::ensure_ready(backend.platform().as_ref()).await?;
            tracker.apply(StateEvent::ScanStarted);
            let found = scanner
                .find_device(device.id(), rediscovery_timeout, &cancel)
                .await?;
            ConnectionSession::connect(
                backend.transport().as_ref(),
                found,
                connect_timeout,
                tracker,
            )
            .await
        })
        .await;

        match result {
            Ok(session) => {
                info!(attempt, "reconnected");
                self.adopt_session(session);
            }
            Err(HeartRateError::Disposed) => {}
            Err(error) => self.record_reconnect_failure(error),
        }
    }

    fn record_reconnect_failure(&mut self, error: HeartRateError) {
        self.reconnect.record_failure();
        self.tracker.apply(StateEvent::LinkLost);

        let policy = self.config.reconnect();
        if !error.is_recoverable() || policy.is_exhausted(&self.reconnect) {
            warn!(
                %error,
                attempts = self.reconnect.attempt_count(),
                consecutive_errors = self.reconnect.consecutive_error_count(),
                "giving up on reconnection"
            );
            self.reconnect.end_recovery();
            let terminal = match (error.is_recoverable(), &self.device) {
                (true, Some(device)) => HeartRateError::ConnectionLost {
                    device_id: device.id().clone(),
                },
                _ => error,
            };
            self.tracker.fail(&terminal);
            return;
        }

        info!(%error, attempt = self.reconnect.attempt_count(), "reconnect attempt failed");
        self.schedule_reconnect();
    }

    /// Stops any automatic recovery and clears its counters.
    fn cancel_recovery(&mut self) {
        self.cancel_reconnect_timer();
        self.reconnect.reset();
        self.tracker.set_reconnecting(false, 0);
    }

    fn cancel_reconnect_timer(&mut self) {
        self.timer_generation += 1;
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    async fn release_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.teardown().await;
        }
    }
}

async fn next_session_event(session: &mut Option<ConnectionSession>) -> SessionEvent {
    match session {
        Some(session) => session.next_event().await,
        None => pending().await,
    }
}

async fn until_shutdown<T>(
    shutdown: &CancellationToken,
    operation: impl Future<Output = Result<T, HeartRateError>>,
) -> Result<T, HeartRateError> {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => Err(HeartRateError::Disposed),
        result = operation => result,
    }
}
