use std::fmt;
use std::time::Duration;

use tokio::time::{Instant, timeout as with_timeout};
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, warn};

use super::model::{DeviceHandle, ServiceInfo};
use super::transport::{Link, LinkEvent, LinkEventStream, Transport};
use crate::error::{ErrorKind, HeartRateError};
use crate::measurement::{HeartRateReading, MeasurementDecoder};
use crate::monitor::{ConnectionStateTracker, StateEvent};
use crate::protocol::{
    HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID, endpoint_for_uuid, endpoint_metadata,
};

const TEARDOWN_STEP_TIMEOUT: Duration = Duration::from_secs(5);
const LINK_STATE_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// What an established session produced next.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SessionEvent {
    Reading(HeartRateReading),
    /// The transport lost the link. The session does not recover by itself.
    Disconnected,
}

/// One physical link subscribed to heart-rate measurements.
pub struct ConnectionSession {
    device: DeviceHandle,
    link: Box<dyn Link>,
    events: LinkEventStream,
    connected_at: Instant,
    last_reading_at: Option<Instant>,
    decode_failures: u64,
    closed: bool,
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("device", &self.device)
            .field("last_reading_at", &self.last_reading_at)
            .field("decode_failures", &self.decode_failures)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ConnectionSession {
    /// Attaches to `device`, locates the measurement characteristic and subscribes to it.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` when attaching fails or exceeds `timeout`,
    /// `ServiceNotFound` or `CharacteristicNotFound` when the GATT table lacks the
    /// heart-rate endpoints, or the transport error raised while subscribing.
    #[instrument(skip_all, level = "info", fields(device_id = %device.id()))]
    pub(crate) async fn connect(
        transport: &dyn Transport,
        device: DeviceHandle,
        timeout: Duration,
        tracker: &ConnectionStateTracker,
    ) -> Result<Self, HeartRateError> {
        tracker.apply(StateEvent::ConnectStarted);

        let link = match with_timeout(timeout, transport.connect(device.id())).await {
            Ok(Ok(link)) => link,
            Ok(Err(error)) => return Err(connection_failed(&device, error)),
            Err(_elapsed) => {
                return Err(HeartRateError::ConnectionFailed {
                    device_id: device.id().clone(),
                    reason: format!("timed out after {}", humantime::format_duration(timeout)),
                });
            }
        };

        let events = match subscribe_to_measurements(link.as_ref(), &device, timeout).await {
            Ok(events) => events,
            Err(error) => {
                if let Err(disconnect_error) = link.disconnect().await {
                    warn!(
                        error = ?disconnect_error,
                        "failed to disconnect after session setup error"
                    );
                }
                return Err(error);
            }
        };

        tracker.set_device(Some(device.clone()));
        tracker.apply(StateEvent::LinkEstablished);
        info!(name = device.display_name(), "subscribed to heart-rate measurements");

        Ok(Self {
            device,
            link,
            events,
            connected_at: Instant::now(),
            last_reading_at: None,
            decode_failures: 0,
            closed: false,
        })
    }

    #[must_use]
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Time of the last decoded reading, falling back to the connect time.
    #[must_use]
    pub fn last_activity_at(&self) -> Instant {
        self.last_reading_at.unwrap_or(self.connected_at)
    }

    /// Number of payloads dropped because they failed to decode.
    #[must_use]
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    /// Waits for the next decoded reading or for the link to drop.
    ///
    /// Payloads that fail to decode are logged, counted and skipped.
    pub async fn next_event(&mut self) -> SessionEvent {
        if self.closed {
            return SessionEvent::Disconnected;
        }

        loop {
            match self.events.next().await {
                Some(LinkEvent::Notification(payload)) => {
                    match MeasurementDecoder::decode(&payload) {
                        Ok(reading) => {
                            self.last_reading_at = Some(Instant::now());
                            return SessionEvent::Reading(reading);
                        }
                        Err(error) => {
                            self.decode_failures += 1;
                            debug!(
                                %error,
                                kind = %error.kind(),
                                payload = %hex::encode(&payload),
                                failures = self.decode_failures,
                                "dropping undecodable measurement"
                            );
                        }
                    }
                }
                Some(LinkEvent::Disconnected) | None => {
                    self.closed = true;
                    info!(device_id = %self.device.id(), "link lost");
                    return SessionEvent::Disconnected;
                }
            }
        }
    }

    /// Physical link state as reported by the transport.
    pub async fn is_link_connected(&mut self) -> bool {
        if self.closed {
            return false;
        }
        match with_timeout(LINK_STATE_QUERY_TIMEOUT, self.link.is_connected()).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(error)) => {
                debug!(?error, "failed to query link state");
                false
            }
            Err(_elapsed) => false,
        }
    }

    /// Unsubscribes and disconnects. Failures are logged, never returned.
    #[instrument(skip_all, level = "debug", fields(device_id = %self.device.id()))]
    pub async fn teardown(self) {
        let Self { link, events, .. } = self;
        drop(events);

        match with_timeout(TEARDOWN_STEP_TIMEOUT, link.unsubscribe(HEART_RATE_MEASUREMENT_UUID)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(?error, "failed to unsubscribe from measurements"),
            Err(_elapsed) => warn!("timed out unsubscribing from measurements"),
        }
        match with_timeout(TEARDOWN_STEP_TIMEOUT, link.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(?error, "failed to disconnect"),
            Err(_elapsed) => warn!("timed out disconnecting"),
        }
        debug!("session torn down");
    }
}

async fn subscribe_to_measurements(
    link: &dyn Link,
    device: &DeviceHandle,
    timeout: Duration,
) -> Result<LinkEventStream, HeartRateError> {
    let services = with_timeout(timeout, link.discover_services())
        .await
        .map_err(|_elapsed| HeartRateError::ConnectionFailed {
            device_id: device.id().clone(),
            reason: "service discovery timed out".to_string(),
        })??;
    log_known_endpoints(&services);
    locate_measurement(&services, device)?;
    link.subscribe(HEART_RATE_MEASUREMENT_UUID).await
}

fn log_known_endpoints(services: &[ServiceInfo]) {
    let uuids = services.iter().flat_map(|service| {
        std::iter::once(service.uuid()).chain(
            service
                .characteristics()
                .iter()
                .map(|characteristic| characteristic.uuid()),
        )
    });
    for endpoint in uuids.filter_map(endpoint_for_uuid) {
        let metadata = endpoint_metadata(endpoint);
        debug!(
            %endpoint,
            kind = %metadata.kind(),
            assigned_number = format_args!("{:#06x}", metadata.assigned_number()),
            "discovered endpoint"
        );
    }
}

fn locate_measurement(services: &[ServiceInfo], device: &DeviceHandle) -> Result<(), HeartRateError> {
    let Some(service) = services
        .iter()
        .find(|service| service.uuid() == HEART_RATE_SERVICE_UUID)
    else {
        return Err(HeartRateError::ServiceNotFound {
            device_id: device.id().clone(),
        });
    };

    match service
        .characteristics()
        .iter()
        .find(|characteristic| characteristic.uuid() == HEART_RATE_MEASUREMENT_UUID)
    {
        Some(characteristic) if characteristic.is_notifiable() => Ok(()),
        Some(_) => {
            warn!("measurement characteristic does not support notifications");
            Err(HeartRateError::CharacteristicNotFound {
                device_id: device.id().clone(),
            })
        }
        None => Err(HeartRateError::CharacteristicNotFound {
            device_id: device.id().clone(),
        }),
    }
}

fn connection_failed(device: &DeviceHandle, error: HeartRateError) -> HeartRateError {
    match error.kind() {
        ErrorKind::NotSupported | ErrorKind::NotEnabled | ErrorKind::PermissionDenied => error,
        _ => HeartRateError::ConnectionFailed {
            device_id: device.id().clone(),
            reason: error.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hw::fake_backend::{FakeBackend, FakeBackendConfig, FakeDevice};
    use crate::hw::model::{Advertisement, CharacteristicInfo, DeviceId};
    use crate::monitor::ConnectionState;

    fn sensor() -> FakeDevice {
        FakeDevice::heart_rate_sensor("AA:BB", "Polar H10")
    }

    fn handle() -> DeviceHandle {
        DeviceHandle::new(DeviceId::new("AA:BB"), Some("Polar H10".to_string()), None)
    }

    fn backend(device: FakeDevice) -> FakeBackend {
        FakeBackend::new(FakeBackendConfig::builder().devices(vec![device]).build())
    }

    #[tokio::test]
    async fn connect_visits_connecting_then_connected() -> anyhow::Result<()> {
        let backend = backend(sensor());
        let tracker = ConnectionStateTracker::new();
        let mut states = tracker.subscribe_states();

        let session =
            ConnectionSession::connect(&backend.transport(), handle(), Duration::from_secs(5), &tracker)
                .await?;

        assert_eq!(ConnectionState::Connected, *states.borrow_and_update());
        assert_eq!(Some(&handle()), tracker.status().device());
        assert_eq!(1, backend.controller().counters().active_subscriptions);

        session.teardown().await;
        assert_eq!(0, backend.controller().counters().active_subscriptions);
        Ok(())
    }

    #[tokio::test]
    async fn missing_service_disconnects_and_fails() {
        let advertisement = Advertisement::new(handle(), vec![HEART_RATE_SERVICE_UUID]);
        let backend = backend(FakeDevice::new(advertisement).with_services(Vec::new()));
        let tracker = ConnectionStateTracker::new();

        let result =
            ConnectionSession::connect(&backend.transport(), handle(), Duration::from_secs(5), &tracker)
                .await;

        assert_matches!(result, Err(HeartRateError::ServiceNotFound { .. }));
        assert_eq!(1, backend.controller().counters().disconnect_calls);
        assert_eq!(ConnectionState::Connecting, tracker.current());
    }

    #[tokio::test]
    async fn missing_characteristic_fails() {
        let advertisement = Advertisement::new(handle(), vec![HEART_RATE_SERVICE_UUID]);
        let services = vec![ServiceInfo::new(
            HEART_RATE_SERVICE_UUID,
            vec![CharacteristicInfo::new(
                btleplug::api::bleuuid::uuid_from_u16(0x2A38),
                false,
            )],
        )];
        let backend = backend(FakeDevice::new(advertisement).with_services(services));

        let result = ConnectionSession::connect(
            &backend.transport(),
            handle(),
            Duration::from_secs(5),
            &ConnectionStateTracker::new(),
        )
        .await;

        assert_matches!(result, Err(HeartRateError::CharacteristicNotFound { .. }));
    }

    #[tokio::test]
    async fn refused_attach_is_a_connection_failure() {
        let backend = backend(sensor());
        backend.controller().fail_next_connects(1);

        let result = ConnectionSession::connect(
            &backend.transport(),
            handle(),
            Duration::from_secs(5),
            &ConnectionStateTracker::new(),
        )
        .await;

        assert_matches!(result, Err(HeartRateError::ConnectionFailed { .. }));
    }

    #[tokio::test]
    async fn undecodable_payloads_are_dropped_and_counted() -> anyhow::Result<()> {
        let backend = backend(sensor());
        let controller = backend.controller();
        let mut session = ConnectionSession::connect(
            &backend.transport(),
            handle(),
            Duration::from_secs(5),
            &ConnectionStateTracker::new(),
        )
        .await?;

        controller.push_notification(&[0x00]);
        controller.push_notification(&[0x00, 0x05]);
        controller.push_notification(&[0x00, 0x48]);

        assert_matches!(session.next_event().await, SessionEvent::Reading(reading) if reading.bpm() == 72);
        assert_eq!(2, session.decode_failures());

        controller.drop_link();
        assert_eq!(SessionEvent::Disconnected, session.next_event().await);
        assert!(!session.is_link_connected().await);
        session.teardown().await;
        Ok(())
    }
}
