mod backoff;
mod config;
mod state;
mod supervisor;

use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

pub use self::backoff::{ReconnectPolicy, ReconnectState};
pub use self::config::{HealthCheckPolicy, MonitorConfig};
pub use self::state::{ConnectionState, ConnectionStatus, StateEvent};
pub(crate) use self::state::ConnectionStateTracker;
use self::supervisor::{Command, ScanControl, Supervisor, SupervisorEvent, SupervisorParts};
use crate::error::HeartRateError;
use crate::hw::{Backend, DeviceHandle, DeviceId};
use crate::measurement::HeartRateReading;

/// Supervised connection to one heart-rate sensor.
///
/// All work happens on a background task owned by the monitor; the methods here
/// post requests to it and wait for the answer. Must be created inside a Tokio
/// runtime.
#[derive(Debug)]
pub struct HeartRateMonitor {
    events: mpsc::UnboundedSender<SupervisorEvent>,
    shutdown: CancellationToken,
    scan_control: ScanControl,
    states: watch::Receiver<ConnectionState>,
    status: watch::Receiver<ConnectionStatus>,
    readings: broadcast::Sender<HeartRateReading>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl HeartRateMonitor {
    /// Starts the supervisor for `backend`.
    #[must_use]
    pub fn new(backend: Backend, config: MonitorConfig) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (readings, _) = broadcast::channel(config.reading_buffer().max(1));
        let tracker = ConnectionStateTracker::new();
        let states = tracker.subscribe_states();
        let status = tracker.subscribe_status();
        let shutdown = CancellationToken::new();
        let scan_control = ScanControl::default();

        let supervisor = Supervisor::new(SupervisorParts {
            backend,
            config,
            tracker,
            events_tx: events_tx.clone(),
            events,
            readings: readings.clone(),
            shutdown: shutdown.clone(),
            scan_control: scan_control.clone(),
        });
        let actor = tokio::spawn(supervisor.run().instrument(info_span!("supervisor")));

        Self {
            events: events_tx,
            shutdown,
            scan_control,
            states,
            status,
            readings,
            actor: Mutex::new(Some(actor)),
        }
    }

    /// Connection states, starting with the current one.
    pub fn states(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.states.clone())
    }

    /// Full status snapshots, starting with the current one.
    pub fn status(&self) -> WatchStream<ConnectionStatus> {
        WatchStream::new(self.status.clone())
    }

    #[must_use]
    pub fn current_state(&self) -> ConnectionState {
        *self.states.borrow()
    }

    #[must_use]
    pub fn current_status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Decoded readings received from now on, in arrival order.
    ///
    /// A subscriber that falls more than the configured buffer behind skips the
    /// readings it missed.
    pub fn readings(&self) -> impl Stream<Item = HeartRateReading> + Send + 'static {
        BroadcastStream::new(self.readings.subscribe()).filter_map(|reading| match reading {
            Ok(reading) => Some(reading),
            Err(error) => {
                warn!(%error, "reading subscriber lagged");
                None
            }
        })
    }

    /// Beats per minute from [`Self::readings`].
    pub fn bpm(&self) -> impl Stream<Item = u16> + Send + 'static {
        self.readings().map(|reading| reading.bpm())
    }

    /// Verifies the adapter is usable and Bluetooth access is granted.
    ///
    /// # Errors
    ///
    /// Returns `NotSupported`, `NotEnabled` or `PermissionDenied`; the monitor moves
    /// to [`ConnectionState::Error`].
    pub async fn initialize(&self) -> Result<(), HeartRateError> {
        self.request(|reply| Command::Initialize { reply }).await?
    }

    /// Scans for the first heart-rate sensor and connects to it.
    ///
    /// Returns the connected device immediately when already connected.
    ///
    /// # Errors
    ///
    /// Returns the scan, platform or connection error; nothing is retried and the
    /// monitor moves to [`ConnectionState::Error`]. A scan aborted with
    /// [`Self::stop_scan`] returns `ScanCancelled` and leaves the monitor idle.
    pub async fn scan_and_connect(&self, timeout: Duration) -> Result<DeviceHandle, HeartRateError> {
        self.request(|reply| Command::ScanAndConnect { timeout, reply })
            .await?
    }

    /// Connects to a known device without scanning.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` when the transport cannot connect by id, otherwise the
    /// same errors as [`Self::scan_and_connect`].
    pub async fn connect_to_device(
        &self,
        device_id: impl Into<DeviceId>,
        timeout: Duration,
    ) -> Result<DeviceHandle, HeartRateError> {
        let device_id = device_id.into();
        self.request(|reply| Command::ConnectToDevice {
            device_id,
            timeout,
            reply,
        })
        .await?
    }

    /// Tears down the session and stops automatic reconnection.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` after [`Self::dispose`].
    pub async fn disconnect(&self) -> Result<(), HeartRateError> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Aborts an in-flight scan.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` after [`Self::dispose`].
    pub fn stop_scan(&self) -> Result<(), HeartRateError> {
        self.ensure_live()?;
        if !self.scan_control.cancel() {
            debug!("no scan in flight");
        }
        Ok(())
    }

    /// Clears reconnect counters and leaves the error state.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` after [`Self::dispose`].
    pub async fn reset_reconnect(&self) -> Result<(), HeartRateError> {
        self.request(|reply| Command::ResetReconnect { reply }).await
    }

    /// Current reconnect bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` after [`Self::dispose`].
    pub async fn reconnect_state(&self) -> Result<ReconnectState, HeartRateError> {
        self.request(|reply| Command::ReconnectState { reply }).await
    }

    /// Stops the supervisor, cancelling timers and tearing down the session.
    ///
    /// Later calls are no-ops; every other operation fails with `Disposed`.
    pub async fn dispose(&self) {
        self.shutdown.cancel();
        let Some(actor) = self.actor.lock().await.take() else {
            return;
        };
        if let Err(error) = actor.await {
            warn!(?error, "supervisor task ended abnormally");
        }
    }

    fn ensure_live(&self) -> Result<(), HeartRateError> {
        if self.shutdown.is_cancelled() {
            return Err(HeartRateError::Disposed);
        }
        Ok(())
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HeartRateError> {
        self.ensure_live()?;
        let (reply, response) = oneshot::channel();
        self.events
            .send(SupervisorEvent::Command(command(reply)))
            .map_err(|_| HeartRateError::Disposed)?;

        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(HeartRateError::Disposed),
            response = response => response.map_err(|_| HeartRateError::Disposed),
        }
    }
}

impl Drop for HeartRateMonitor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
