use serde::Serialize;
use strum_macros::{Display, EnumIter};
use tokio::sync::watch;
use tracing::info;

use crate::error::{ErrorReport, HeartRateError};
use crate::hw::DeviceHandle;

/// Observable connection lifecycle of a monitor.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Inputs driving [`ConnectionState`] transitions.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StateEvent {
    ScanStarted,
    /// The user stopped an in-flight scan.
    ScanStopped,
    ConnectStarted,
    LinkEstablished,
    /// The physical link dropped or went stale.
    LinkLost,
    /// The user asked to disconnect.
    DisconnectRequested,
    Failed,
    Reset,
}

impl ConnectionState {
    /// Returns the state reached from `self` on `event`. Defined for every pair.
    #[must_use]
    pub fn on(self, event: StateEvent) -> Self {
        use ConnectionState as S;
        use StateEvent as E;

        match (self, event) {
            (S::Connected | S::Connecting, E::ScanStarted) => self,
            (_, E::ScanStarted) => S::Scanning,
            (S::Scanning, E::ScanStopped) => S::Idle,
            (_, E::ScanStopped) => self,
            (S::Connected, E::ConnectStarted) => self,
            (_, E::ConnectStarted) => S::Connecting,
            (S::Connecting, E::LinkEstablished) => S::Connected,
            (_, E::LinkEstablished) => self,
            (S::Scanning | S::Connecting | S::Connected, E::LinkLost) => S::Disconnected,
            (_, E::LinkLost) => self,
            (S::Idle | S::Error, E::DisconnectRequested) => self,
            (_, E::DisconnectRequested) => S::Disconnected,
            (_, E::Failed) => S::Error,
            (S::Error | S::Disconnected, E::Reset) => S::Idle,
            (_, E::Reset) => self,
        }
    }
}

/// Snapshot published whenever any part of the connection status changes.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct ConnectionStatus {
    state: ConnectionState,
    device: Option<DeviceHandle>,
    reconnecting: bool,
    attempt: u32,
    error: Option<ErrorReport>,
}

impl ConnectionStatus {
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Sensor attached or last attached.
    #[must_use]
    pub fn device(&self) -> Option<&DeviceHandle> {
        self.device.as_ref()
    }

    /// True while an automatic reconnect is scheduled or running.
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Report for the error that put the monitor into [`ConnectionState::Error`].
    #[must_use]
    pub fn error(&self) -> Option<&ErrorReport> {
        self.error.as_ref()
    }
}

/// Single writer for the state and status channels.
#[derive(Debug)]
pub(crate) struct ConnectionStateTracker {
    state: watch::Sender<ConnectionState>,
    status: watch::Sender<ConnectionStatus>,
}

impl Default for ConnectionStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateTracker {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self { state, status }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn subscribe_states(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Applies `event` and publishes the result when the state changed.
    pub(crate) fn apply(&self, event: StateEvent) -> ConnectionState {
        let from = self.current();
        let to = from.on(event);
        if from == to {
            return to;
        }

        info!(%from, %to, %event, "connection state changed");
        self.state.send_replace(to);
        self.status.send_modify(|status| {
            status.state = to;
            if to == ConnectionState::Connected {
                status.error = None;
            }
        });
        to
    }

    pub(crate) fn set_device(&self, device: Option<DeviceHandle>) {
        self.status.send_if_modified(|status| {
            if status.device == device {
                return false;
            }
            status.device = device;
            true
        });
    }

    pub(crate) fn set_reconnecting(&self, reconnecting: bool, attempt: u32) {
        self.status.send_if_modified(|status| {
            if status.reconnecting == reconnecting && status.attempt == attempt {
                return false;
            }
            status.reconnecting = reconnecting;
            status.attempt = attempt;
            true
        });
    }

    /// Enters the terminal error state with a report for `error`.
    pub(crate) fn fail(&self, error: &HeartRateError) {
        let report = error.report();
        self.status.send_modify(|status| {
            status.reconnecting = false;
            status.error = Some(report);
        });
        self.apply(StateEvent::Failed);
    }

    pub(crate) fn clear_error(&self) {
        self.status.send_if_modified(|status| status.error.take().is_some());
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use strum::IntoEnumIterator as _;

    use super::*;

    #[rstest]
    #[case(ConnectionState::Idle, StateEvent::ScanStarted, ConnectionState::Scanning)]
    #[case(ConnectionState::Scanning, StateEvent::ConnectStarted, ConnectionState::Connecting)]
    #[case(ConnectionState::Connecting, StateEvent::LinkEstablished, ConnectionState::Connected)]
    #[case(ConnectionState::Connected, StateEvent::LinkLost, ConnectionState::Disconnected)]
    #[case(ConnectionState::Disconnected, StateEvent::ScanStarted, ConnectionState::Scanning)]
    #[case(ConnectionState::Connected, StateEvent::DisconnectRequested, ConnectionState::Disconnected)]
    #[case(ConnectionState::Scanning, StateEvent::ScanStopped, ConnectionState::Idle)]
    #[case(ConnectionState::Disconnected, StateEvent::Failed, ConnectionState::Error)]
    #[case(ConnectionState::Error, StateEvent::Reset, ConnectionState::Idle)]
    #[case(ConnectionState::Connected, StateEvent::Reset, ConnectionState::Connected)]
    #[case(ConnectionState::Connected, StateEvent::ScanStarted, ConnectionState::Connected)]
    #[case(ConnectionState::Idle, StateEvent::LinkEstablished, ConnectionState::Idle)]
    fn transitions(
        #[case] from: ConnectionState,
        #[case] event: StateEvent,
        #[case] expected: ConnectionState,
    ) {
        assert_eq!(expected, from.on(event));
    }

    #[test]
    fn failure_is_reachable_from_every_state() {
        for state in ConnectionState::iter() {
            assert_eq!(ConnectionState::Error, state.on(StateEvent::Failed));
        }
    }

    #[test]
    fn only_link_establishment_enters_connected() {
        for state in ConnectionState::iter() {
            for event in [
                StateEvent::ScanStarted,
                StateEvent::ScanStopped,
                StateEvent::ConnectStarted,
                StateEvent::LinkLost,
                StateEvent::DisconnectRequested,
                StateEvent::Failed,
                StateEvent::Reset,
            ] {
                let next = state.on(event);
                assert!(
                    next != ConnectionState::Connected || state == ConnectionState::Connected,
                    "{state} --{event}--> {next}"
                );
            }
        }
    }

    #[test]
    fn tracker_publishes_only_changes() {
        let tracker = ConnectionStateTracker::new();
        let mut states = tracker.subscribe_states();
        states.borrow_and_update();

        tracker.apply(StateEvent::LinkEstablished);
        assert!(!states.has_changed().unwrap_or(true));

        tracker.apply(StateEvent::ScanStarted);
        assert!(states.has_changed().unwrap_or(false));
        assert_eq!(ConnectionState::Scanning, *states.borrow_and_update());
        assert_eq!(ConnectionState::Scanning, tracker.status().state());
    }

    #[test]
    fn failure_records_report_until_reconnected() {
        let tracker = ConnectionStateTracker::new();
        tracker.set_reconnecting(true, 3);

        tracker.fail(&HeartRateError::NotEnabled);
        let status = tracker.status();
        assert_eq!(ConnectionState::Error, status.state());
        assert!(!status.is_reconnecting());
        assert!(status.error().is_some());

        tracker.apply(StateEvent::ConnectStarted);
        tracker.apply(StateEvent::LinkEstablished);
        assert_eq!(None, tracker.status().error());
    }
}
