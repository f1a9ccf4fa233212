use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use super::model::{Advertisement, CharacteristicInfo, DeviceHandle, DeviceId, ServiceInfo};
use super::platform::PlatformManager;
use super::transport::{Backend, Link, LinkEvent, LinkEventStream, Transport};
use crate::error::{FixtureError, HeartRateError};
use crate::protocol::{
    self, EndpointId, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
};

const DEFAULT_NOTIFICATION_INTERVAL: Duration = Duration::from_secs(1);

/// Adapter condition reported by the fake platform manager.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum FakeAdapterState {
    #[default]
    PoweredOn,
    PoweredOff,
    Unsupported,
}

/// One simulated peripheral: what it advertises and what it exposes once attached.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FakeDevice {
    advertisement: Advertisement,
    services: Vec<ServiceInfo>,
}

impl FakeDevice {
    /// A standard sensor advertising and exposing the heart-rate service.
    #[must_use]
    pub fn heart_rate_sensor(id: &str, local_name: &str) -> Self {
        let device = DeviceHandle::new(DeviceId::new(id), Some(local_name.to_string()), Some(-60));
        Self {
            advertisement: Advertisement::new(device, vec![HEART_RATE_SERVICE_UUID]),
            services: standard_services(),
        }
    }

    /// A device with an explicit advertisement and the standard GATT table.
    #[must_use]
    pub fn new(advertisement: Advertisement) -> Self {
        Self {
            advertisement,
            services: standard_services(),
        }
    }

    /// Replaces the GATT table exposed after connecting.
    #[must_use]
    pub fn with_services(mut self, services: Vec<ServiceInfo>) -> Self {
        self.services = services;
        self
    }

    fn id(&self) -> &DeviceId {
        self.advertisement.device().id()
    }
}

/// Parsed fake scan fixture records.
#[derive(Debug, Clone, derive_more::Into)]
pub struct ScanFixture {
    devices: Vec<FakeDevice>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Err(FixtureError::EmptyFixture);
        }
        let devices = value
            .split(';')
            .map(parse_scan_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { devices })
    }
}

/// Parsed fake notification payload fixtures.
#[derive(Debug, Clone, derive_more::Into)]
pub struct NotificationPayloads {
    payloads: Vec<Vec<u8>>,
}

impl FromStr for NotificationPayloads {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Ok(Self {
                payloads: Vec::new(),
            });
        }
        let payloads = value
            .split(',')
            .map(parse_hex)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { payloads })
    }
}

/// Settings for constructing a fake backend.
#[derive(Debug, Clone, Builder)]
pub struct FakeBackendConfig {
    #[builder(default, into)]
    devices: Vec<FakeDevice>,
    /// Payloads replayed in a loop after each subscription.
    #[builder(default, into)]
    notifications: Vec<Vec<u8>>,
    #[builder(default = DEFAULT_NOTIFICATION_INTERVAL)]
    notification_interval: Duration,
    /// Time after a scan starts before devices become visible.
    #[builder(default)]
    discovery_delay: Duration,
    #[builder(default = true)]
    connect_by_id: bool,
    #[builder(default)]
    adapter_state: FakeAdapterState,
    #[builder(default = true)]
    permission_granted: bool,
}

/// Call counters recorded by the fake transport.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct FakeCounters {
    pub start_scan_calls: usize,
    pub stop_scan_calls: usize,
    pub connect_calls: usize,
    pub subscribe_calls: usize,
    pub unsubscribe_calls: usize,
    pub disconnect_calls: usize,
    /// Subscriptions currently alive.
    pub active_subscriptions: usize,
    /// Highest number of simultaneously alive subscriptions.
    pub peak_subscriptions: usize,
}

/// Fixture-driven backend used in tests and non-hardware environments.
#[derive(Debug, Clone)]
pub struct FakeBackend {
    shared: Arc<Shared>,
}

impl FakeBackend {
    #[must_use]
    pub fn new(config: FakeBackendConfig) -> Self {
        let FakeBackendConfig {
            devices,
            notifications,
            notification_interval,
            discovery_delay,
            connect_by_id,
            adapter_state,
            permission_granted,
        } = config;

        Self {
            shared: Arc::new(Shared {
                notifications,
                notification_interval,
                discovery_delay,
                connect_by_id,
                permission_granted,
                state: Mutex::new(FakeState {
                    devices,
                    adapter_state,
                    ..FakeState::default()
                }),
            }),
        }
    }

    pub(crate) fn transport(&self) -> FakeTransport {
        FakeTransport {
            shared: self.shared.clone(),
        }
    }

    pub(crate) fn platform(&self) -> FakePlatform {
        FakePlatform {
            shared: self.shared.clone(),
        }
    }

    /// Returns a handle for steering the simulation from tests.
    #[must_use]
    pub fn controller(&self) -> FakeController {
        FakeController {
            shared: self.shared.clone(),
        }
    }

    /// Wraps this fake as an injectable backend.
    #[must_use]
    pub fn backend(&self) -> Backend {
        Backend::new(Arc::new(self.transport()), Arc::new(self.platform()))
    }
}

#[derive(Debug)]
struct Shared {
    notifications: Vec<Vec<u8>>,
    notification_interval: Duration,
    discovery_delay: Duration,
    connect_by_id: bool,
    permission_granted: bool,
    state: Mutex<FakeState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct FakeState {
    devices: Vec<FakeDevice>,
    adapter_state: FakeAdapterState,
    hidden: HashSet<DeviceId>,
    scan_started_at: Option<Instant>,
    pending_connect_failures: usize,
    reports_disconnected: bool,
    next_link_id: u64,
    links: Vec<ActiveLink>,
    counters: FakeCounters,
}

impl FakeState {
    fn visible_device(&self, device_id: &DeviceId) -> Option<&FakeDevice> {
        self.devices
            .iter()
            .find(|device| device.id() == device_id && !self.hidden.contains(device_id))
    }

    fn attached_link(&self, link_id: u64) -> Option<&ActiveLink> {
        self.links
            .iter()
            .find(|link| link.id == link_id && link.attached)
    }

    /// Releases the subscription held by one link; other links keep theirs.
    fn release_subscription(&mut self, link_id: u64) {
        let Some(link) = self.links.iter_mut().find(|link| link.id == link_id) else {
            return;
        };
        if link.release() {
            self.counters.active_subscriptions = self.counters.active_subscriptions.saturating_sub(1);
        }
    }
}

#[derive(Debug)]
struct ActiveLink {
    id: u64,
    device_id: DeviceId,
    attached: bool,
    subscribed: bool,
    sender: Option<mpsc::UnboundedSender<LinkEvent>>,
    feeder: Option<JoinHandle<()>>,
}

impl ActiveLink {
    fn release(&mut self) -> bool {
        if !self.subscribed {
            return false;
        }
        self.subscribed = false;
        self.sender = None;
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        true
    }
}

/// Transport half of the fake backend.
#[derive(Debug)]
pub(crate) struct FakeTransport {
    shared: Arc<Shared>,
}

#[async_trait]
impl Transport for FakeTransport {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn start_scan(&self, service_filter: Option<Uuid>) -> Result<(), HeartRateError> {
        let mut state = self.shared.lock();
        state.counters.start_scan_calls += 1;
        state.scan_started_at = Some(Instant::now());
        trace!(?service_filter, "fake scan started");
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), HeartRateError> {
        let mut state = self.shared.lock();
        state.counters.stop_scan_calls += 1;
        state.scan_started_at = None;
        Ok(())
    }

    async fn advertisements(&self) -> Result<Vec<Advertisement>, HeartRateError> {
        let state = self.shared.lock();
        let Some(started_at) = state.scan_started_at else {
            return Ok(Vec::new());
        };
        if started_at.elapsed() < self.shared.discovery_delay {
            return Ok(Vec::new());
        }

        Ok(state
            .devices
            .iter()
            .filter(|device| !state.hidden.contains(device.id()))
            .map(|device| device.advertisement.clone())
            .collect())
    }

    fn supports_connect_by_id(&self) -> bool {
        self.shared.connect_by_id
    }

    #[instrument(skip(self), level = "debug", fields(%device_id))]
    async fn connect(&self, device_id: &DeviceId) -> Result<Box<dyn Link>, HeartRateError> {
        let mut state = self.shared.lock();
        state.counters.connect_calls += 1;

        if state.pending_connect_failures > 0 {
            state.pending_connect_failures -= 1;
            return Err(HeartRateError::ConnectionFailed {
                device_id: device_id.clone(),
                reason: "simulated connection failure".to_string(),
            });
        }
        let Some(device) = state.visible_device(device_id) else {
            return Err(HeartRateError::DeviceUnavailable {
                device_id: device_id.clone(),
            });
        };
        let services = device.services.clone();

        state.links.retain(|link| link.attached);
        for previous in &state.links {
            debug!(
                previous = %previous.device_id,
                subscribed = previous.subscribed,
                "fake link still attached"
            );
        }
        state.next_link_id += 1;
        let link_id = state.next_link_id;
        state.links.push(ActiveLink {
            id: link_id,
            device_id: device_id.clone(),
            attached: true,
            subscribed: false,
            sender: None,
            feeder: None,
        });

        Ok(Box::new(FakeLink {
            shared: self.shared.clone(),
            link_id,
            device_id: device_id.clone(),
            services,
        }))
    }
}

/// An attached fake peripheral.
#[derive(Debug)]
struct FakeLink {
    shared: Arc<Shared>,
    link_id: u64,
    device_id: DeviceId,
    services: Vec<ServiceInfo>,
}

impl FakeLink {
    fn ensure_attached(&self, state: &FakeState) -> Result<(), HeartRateError> {
        match state.attached_link(self.link_id) {
            Some(_) => Ok(()),
            None => Err(HeartRateError::ConnectionLost {
                device_id: self.device_id.clone(),
            }),
        }
    }
}

#[async_trait]
impl Link for FakeLink {
    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, HeartRateError> {
        let state = self.shared.lock();
        self.ensure_attached(&state)?;
        Ok(self.services.clone())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<LinkEventStream, HeartRateError> {
        let mut state = self.shared.lock();
        self.ensure_attached(&state)?;
        let exposes = self.services.iter().any(|service| {
            service
                .characteristics()
                .iter()
                .any(|candidate| candidate.uuid() == characteristic)
        });
        if !exposes {
            return Err(HeartRateError::CharacteristicNotFound {
                device_id: self.device_id.clone(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let feeder = (!self.shared.notifications.is_empty()).then(|| {
            tokio::spawn(replay_notifications(
                sender.clone(),
                self.shared.notifications.clone(),
                self.shared.notification_interval,
            ))
        });

        state.release_subscription(self.link_id);
        if let Some(link) = state.links.iter_mut().find(|link| link.id == self.link_id) {
            link.subscribed = true;
            link.sender = Some(sender);
            link.feeder = feeder;
        }
        let counters = &mut state.counters;
        counters.subscribe_calls += 1;
        counters.active_subscriptions += 1;
        counters.peak_subscriptions = counters.peak_subscriptions.max(counters.active_subscriptions);

        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn unsubscribe(&self, _characteristic: Uuid) -> Result<(), HeartRateError> {
        let mut state = self.shared.lock();
        state.counters.unsubscribe_calls += 1;
        self.ensure_attached(&state)?;
        state.release_subscription(self.link_id);
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, HeartRateError> {
        let state = self.shared.lock();
        Ok(self.ensure_attached(&state).is_ok() && !state.reports_disconnected)
    }

    async fn disconnect(&self) -> Result<(), HeartRateError> {
        let mut state = self.shared.lock();
        state.counters.disconnect_calls += 1;
        self.ensure_attached(&state)?;
        state.release_subscription(self.link_id);
        state.links.retain(|link| link.id != self.link_id);
        Ok(())
    }
}

async fn replay_notifications(
    sender: mpsc::UnboundedSender<LinkEvent>,
    payloads: Vec<Vec<u8>>,
    interval: Duration,
) {
    for payload in payloads.iter().cycle() {
        sleep(interval).await;
        if sender.send(LinkEvent::Notification(payload.clone())).is_err() {
            return;
        }
    }
}

/// Platform half of the fake backend.
#[derive(Debug)]
pub(crate) struct FakePlatform {
    shared: Arc<Shared>,
}

#[async_trait]
impl PlatformManager for FakePlatform {
    async fn validate_adapter_state(&self) -> Result<(), HeartRateError> {
        match self.shared.lock().adapter_state {
            FakeAdapterState::PoweredOn => Ok(()),
            FakeAdapterState::PoweredOff => Err(HeartRateError::NotEnabled),
            FakeAdapterState::Unsupported => Err(HeartRateError::NotSupported),
        }
    }

    async fn check_and_request_permissions(&self) -> Result<(), HeartRateError> {
        if self.shared.permission_granted {
            Ok(())
        } else {
            Err(HeartRateError::PermissionDenied)
        }
    }
}

/// Steers a running fake backend.
#[derive(Debug, Clone)]
pub struct FakeController {
    shared: Arc<Shared>,
}

impl FakeController {
    /// Delivers one notification payload to the newest subscription.
    pub fn push_notification(&self, payload: &[u8]) -> bool {
        let state = self.shared.lock();
        state
            .links
            .iter()
            .rev()
            .find_map(|link| link.sender.as_ref())
            .is_some_and(|sender| sender.send(LinkEvent::Notification(payload.to_vec())).is_ok())
    }

    /// Simulates the sensor dropping off the air, detaching every link.
    pub fn drop_link(&self) {
        let mut state = self.shared.lock();
        let mut released = 0;
        for link in state.links.iter_mut().filter(|link| link.attached) {
            if let Some(sender) = link.sender.as_ref() {
                let _ = sender.send(LinkEvent::Disconnected);
            }
            if link.release() {
                released += 1;
            }
            link.attached = false;
        }
        state.counters.active_subscriptions = state.counters.active_subscriptions.saturating_sub(released);
    }

    /// Hides or reveals a device from scans and connects.
    pub fn set_discoverable(&self, device_id: &str, discoverable: bool) {
        let mut state = self.shared.lock();
        let device_id = DeviceId::new(device_id);
        if discoverable {
            state.hidden.remove(&device_id);
        } else {
            state.hidden.insert(device_id);
        }
    }

    /// Makes the attached link report itself as disconnected without ending the stream.
    pub fn set_reports_disconnected(&self, reports_disconnected: bool) {
        self.shared.lock().reports_disconnected = reports_disconnected;
    }

    /// Changes what the platform manager reports from now on.
    pub fn set_adapter_state(&self, adapter_state: FakeAdapterState) {
        self.shared.lock().adapter_state = adapter_state;
    }

    /// Fails the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.shared.lock().pending_connect_failures = count;
    }

    #[must_use]
    pub fn counters(&self) -> FakeCounters {
        self.shared.lock().counters
    }

    /// Whether a scan is currently running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.shared.lock().scan_started_at.is_some()
    }
}

fn standard_services() -> Vec<ServiceInfo> {
    let service = protocol::endpoint_metadata(EndpointId::HeartRateService);
    vec![ServiceInfo::new(
        service.uuid(),
        vec![CharacteristicInfo::new(HEART_RATE_MEASUREMENT_UUID, true)],
    )]
}

fn parse_scan_record(raw_record: &str) -> Result<FakeDevice, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    let [id, name, rssi, services] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if id.is_empty() {
        return Err(FixtureError::EmptyDeviceId);
    }

    let local_name = optional_field(name).map(str::to_string);
    let rssi = optional_field(rssi)
        .map(str::parse::<i16>)
        .transpose()?;
    let services = match optional_field(services) {
        Some(raw) => raw
            .split(',')
            .map(parse_service_id)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let device = DeviceHandle::new(DeviceId::new(*id), local_name, rssi);
    Ok(FakeDevice::new(Advertisement::new(device, services)))
}

fn optional_field(value: &str) -> Option<&str> {
    (!value.is_empty() && value != "-").then_some(value)
}

fn parse_service_id(raw: &str) -> Result<Uuid, FixtureError> {
    let trimmed = raw.trim().trim_start_matches("0x");
    u16::from_str_radix(trimmed, 16)
        .map(btleplug::api::bleuuid::uuid_from_u16)
        .map_err(|_| FixtureError::InvalidServiceId {
            value: raw.to_string(),
        })
}

fn parse_hex(raw: &str) -> Result<Vec<u8>, FixtureError> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&cleaned).map_err(|source| FixtureError::InvalidHex {
        value: cleaned,
        source,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tokio_stream::StreamExt;

    use super::*;

    #[rstest]
    #[case("AA:BB|Polar H10|-43|180d", 1)]
    #[case("AA:BB|Polar H10|-43|180d;CC:DD|Speaker|-|-", 2)]
    fn scan_fixture_parses_records(#[case] fixture: &str, #[case] expected_count: usize) {
        let fixture: ScanFixture = fixture.parse().expect("fixture should parse");
        let devices: Vec<FakeDevice> = fixture.into();
        assert_eq!(expected_count, devices.len());
    }

    #[test]
    fn scan_fixture_keeps_optional_fields() {
        let fixture: ScanFixture = "AA:BB|-|-|180d,180f".parse().expect("fixture should parse");
        let devices: Vec<FakeDevice> = fixture.into();
        let advertisement = &devices[0].advertisement;

        assert_eq!(None, advertisement.device().local_name());
        assert_eq!(None, advertisement.device().rssi());
        assert_eq!(2, advertisement.services().len());
        assert!(advertisement.advertises(HEART_RATE_SERVICE_UUID));
    }

    #[rstest]
    #[case("AA:BB|Polar H10|-43")]
    #[case("AA:BB|Polar H10|-43|180d|extra")]
    fn scan_fixture_rejects_invalid_field_count(#[case] fixture: &str) {
        assert_matches!(
            fixture.parse::<ScanFixture>(),
            Err(FixtureError::InvalidRecordFieldCount)
        );
    }

    #[test]
    fn scan_fixture_rejects_bad_service_id() {
        assert_matches!(
            "AA:BB|Polar|-43|zz".parse::<ScanFixture>(),
            Err(FixtureError::InvalidServiceId { .. })
        );
    }

    #[test]
    fn notification_payloads_parse_comma_separated_hex() {
        let payloads: NotificationPayloads = "0046, 16 48 00".parse().expect("hex should parse");
        let payloads: Vec<Vec<u8>> = payloads.into();
        assert_eq!(vec![vec![0x00, 0x46], vec![0x16, 0x48, 0x00]], payloads);
    }

    #[test]
    fn notification_payloads_reject_odd_length() {
        assert_matches!(
            "004".parse::<NotificationPayloads>(),
            Err(FixtureError::InvalidHex { .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_replays_scripted_notifications() -> anyhow::Result<()> {
        let backend = FakeBackend::new(
            FakeBackendConfig::builder()
                .devices(vec![FakeDevice::heart_rate_sensor("AA:BB", "Polar H10")])
                .notifications(vec![vec![0x00, 0x48], vec![0x00, 0x49]])
                .build(),
        );
        let transport = backend.transport();
        let link = transport.connect(&DeviceId::new("AA:BB")).await?;
        let mut events = link.subscribe(HEART_RATE_MEASUREMENT_UUID).await?;

        assert_eq!(
            Some(LinkEvent::Notification(vec![0x00, 0x48])),
            events.next().await
        );
        assert_eq!(
            Some(LinkEvent::Notification(vec![0x00, 0x49])),
            events.next().await
        );
        assert_eq!(1, backend.controller().counters().active_subscriptions);

        link.disconnect().await?;
        assert_eq!(0, backend.controller().counters().active_subscriptions);
        Ok(())
    }

    #[tokio::test]
    async fn second_link_without_teardown_keeps_both_subscriptions() -> anyhow::Result<()> {
        let backend = FakeBackend::new(
            FakeBackendConfig::builder()
                .devices(vec![FakeDevice::heart_rate_sensor("AA:BB", "Polar H10")])
                .build(),
        );
        let transport = backend.transport();
        let first = transport.connect(&DeviceId::new("AA:BB")).await?;
        let _first_events = first.subscribe(HEART_RATE_MEASUREMENT_UUID).await?;
        let second = transport.connect(&DeviceId::new("AA:BB")).await?;
        let _second_events = second.subscribe(HEART_RATE_MEASUREMENT_UUID).await?;

        let counters = backend.controller().counters();
        assert_eq!(2, counters.active_subscriptions);
        assert_eq!(2, counters.peak_subscriptions);

        first.unsubscribe(HEART_RATE_MEASUREMENT_UUID).await?;
        first.disconnect().await?;
        assert_eq!(1, backend.controller().counters().active_subscriptions);
        assert!(second.is_connected().await?);
        Ok(())
    }

    #[tokio::test]
    async fn drop_link_releases_every_subscription() -> anyhow::Result<()> {
        let backend = FakeBackend::new(
            FakeBackendConfig::builder()
                .devices(vec![FakeDevice::heart_rate_sensor("AA:BB", "Polar H10")])
                .build(),
        );
        let transport = backend.transport();
        let link = transport.connect(&DeviceId::new("AA:BB")).await?;
        let mut events = link.subscribe(HEART_RATE_MEASUREMENT_UUID).await?;

        backend.controller().drop_link();

        assert_eq!(Some(LinkEvent::Disconnected), events.next().await);
        assert_eq!(0, backend.controller().counters().active_subscriptions);
        assert!(!link.is_connected().await?);
        assert_matches!(
            link.unsubscribe(HEART_RATE_MEASUREMENT_UUID).await,
            Err(HeartRateError::ConnectionLost { .. })
        );
        Ok(())
    }

    #[tokio::test]
    async fn drop_link_ends_subscription_with_disconnect_event() -> anyhow::Result<()> {
        let backend = FakeBackend::new(
            FakeBackendConfig::builder()
                .devices(vec![FakeDevice::heart_rate_sensor("AA:BB", "Polar H10")])
                .build(),
        );
        let link = backend.transport().connect(&DeviceId::new("AA:BB")).await?;
        let mut events = link.subscribe(HEART_RATE_MEASUREMENT_UUID).await?;

        backend.controller().drop_link();

        assert_eq!(Some(LinkEvent::Disconnected), events.next().await);
        assert_eq!(None, events.next().await);
        assert!(!link.is_connected().await?);
        Ok(())
    }

    #[tokio::test]
    async fn platform_reports_configured_adapter_state() {
        let backend = FakeBackend::new(
            FakeBackendConfig::builder()
                .adapter_state(FakeAdapterState::PoweredOff)
                .permission_granted(false)
                .build(),
        );
        let platform = backend.platform();

        assert_matches!(
            platform.validate_adapter_state().await,
            Err(HeartRateError::NotEnabled)
        );
        assert_matches!(
            platform.check_and_request_permissions().await,
            Err(HeartRateError::PermissionDenied)
        );
    }
}
