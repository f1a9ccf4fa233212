use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use tokio::time::{sleep, timeout as with_timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::model::{Advertisement, DeviceHandle, DeviceId};
use super::transport::Transport;
use crate::error::HeartRateError;
use crate::protocol::{DEFAULT_VENDOR_NAME_HINTS, HEART_RATE_SERVICE_UUID};

const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REDISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Scanning behaviour shared by initial discovery and reconnect re-scans.
#[derive(Debug, Clone, Builder)]
pub struct ScanPolicy {
    #[builder(default = DEFAULT_SCAN_TIMEOUT)]
    timeout: Duration,
    /// Bound for the "still discoverable?" scan before a reconnect attempt.
    #[builder(default = DEFAULT_REDISCOVERY_TIMEOUT)]
    rediscovery_timeout: Duration,
    #[builder(default = DEFAULT_POLL_INTERVAL)]
    poll_interval: Duration,
    /// Case-insensitive fragments of advertised names accepted without the service UUID.
    #[builder(default = default_vendor_name_hints(), into)]
    vendor_name_hints: Vec<String>,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ScanPolicy {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn rediscovery_timeout(&self) -> Duration {
        self.rediscovery_timeout
    }

    #[must_use]
    pub fn vendor_name_hints(&self) -> &[String] {
        &self.vendor_name_hints
    }
}

fn default_vendor_name_hints() -> Vec<String> {
    DEFAULT_VENDOR_NAME_HINTS
        .iter()
        .map(|hint| (*hint).to_string())
        .collect()
}

/// Finds heart-rate sensors through a transport.
#[derive(Debug, Clone)]
pub struct DeviceScanner {
    transport: Arc<dyn Transport>,
    policy: ScanPolicy,
    name_hints: Vec<String>,
}

impl DeviceScanner {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, policy: ScanPolicy) -> Self {
        let name_hints = policy
            .vendor_name_hints
            .iter()
            .map(|hint| hint.to_lowercase())
            .filter(|hint| !hint.is_empty())
            .collect();
        Self {
            transport,
            policy,
            name_hints,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &ScanPolicy {
        &self.policy
    }

    /// Scans until a device advertising the heart-rate service or matching a vendor
    /// name hint appears.
    ///
    /// Within one poll, devices advertising the service win over name matches.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` after `timeout`, `ScanCancelled` when `cancel` fires, or the
    /// transport error that interrupted the scan.
    #[instrument(name = "scan", skip(self, cancel), level = "info", fields(timeout = %humantime::format_duration(timeout)))]
    pub async fn scan_for_heart_rate_device(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DeviceHandle, HeartRateError> {
        let device = self
            .scan_until(timeout, cancel, |advertisements| self.pick_candidate(advertisements))
            .await?;
        info!(device_id = %device.id(), name = device.display_name(), "found heart-rate sensor");
        Ok(device)
    }

    /// Bounded re-scan confirming that a known device is still advertising.
    ///
    /// # Errors
    ///
    /// Same as [`Self::scan_for_heart_rate_device`].
    #[instrument(skip(self, cancel), level = "debug", fields(%device_id))]
    pub async fn find_device(
        &self,
        device_id: &DeviceId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DeviceHandle, HeartRateError> {
        self.scan_until(timeout, cancel, |advertisements| {
            advertisements
                .into_iter()
                .find(|advertisement| advertisement.device().id() == device_id)
        })
        .await
    }

    fn service_filter(&self) -> Option<Uuid> {
        self.name_hints
            .is_empty()
            .then_some(HEART_RATE_SERVICE_UUID)
    }

    fn matches_name_hint(&self, advertisement: &Advertisement) -> bool {
        let Some(name) = advertisement.device().local_name() else {
            return false;
        };
        let name = name.to_lowercase();
        self.name_hints.iter().any(|hint| name.contains(hint.as_str()))
    }

    /// Name hints are only a fallback for sensors that do not advertise the service.
    fn pick_candidate(&self, mut advertisements: Vec<Advertisement>) -> Option<Advertisement> {
        let index = match advertisements
            .iter()
            .position(|advertisement| advertisement.advertises(HEART_RATE_SERVICE_UUID))
        {
            Some(index) => index,
            None => {
                let index = advertisements
                    .iter()
                    .position(|advertisement| self.matches_name_hint(advertisement))?;
                debug!(
                    device_id = %advertisements[index].device().id(),
                    "accepting sensor by name without the heart-rate service"
                );
                index
            }
        };
        Some(advertisements.swap_remove(index))
    }

    async fn scan_until(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
        select: impl Fn(Vec<Advertisement>) -> Option<Advertisement> + Sync,
    ) -> Result<DeviceHandle, HeartRateError> {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(HeartRateError::ScanCancelled),
            result = with_timeout(timeout, self.start_and_poll(&select)) => match result {
                Ok(result) => result,
                Err(_elapsed) => Err(HeartRateError::NotFound { timeout }),
            },
        };

        if let Err(error) = self.transport.stop_scan().await {
            warn!(?error, "failed to stop scan cleanly");
        }
        outcome
    }

    async fn start_and_poll(
        &self,
        select: &(impl Fn(Vec<Advertisement>) -> Option<Advertisement> + Sync),
    ) -> Result<DeviceHandle, HeartRateError> {
        self.transport.start_scan(self.service_filter()).await?;

        loop {
            let advertisements = self.transport.advertisements().await?;
            debug!(seen = advertisements.len(), "polled advertisements");
            if let Some(advertisement) = select(advertisements) {
                return Ok(advertisement.into_device());
            }
            sleep(self.policy.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::hw::fake_backend::{FakeBackend, FakeBackendConfig, FakeDevice};

    fn advertisement(name: Option<&str>, services: Vec<Uuid>) -> Advertisement {
        Advertisement::new(
            DeviceHandle::new(DeviceId::new("AA:BB"), name.map(str::to_string), Some(-70)),
            services,
        )
    }

    fn advertisement_for(id: &str, name: &str, services: Vec<Uuid>) -> Advertisement {
        Advertisement::new(
            DeviceHandle::new(DeviceId::new(id), Some(name.to_string()), Some(-70)),
            services,
        )
    }

    fn backend(devices: Vec<FakeDevice>) -> FakeBackend {
        FakeBackend::new(
            FakeBackendConfig::builder()
                .devices(devices)
                .discovery_delay(Duration::from_millis(600))
                .build(),
        )
    }

    fn scanner(backend: &FakeBackend, policy: ScanPolicy) -> DeviceScanner {
        DeviceScanner::new(Arc::new(backend.transport()), policy)
    }

    #[rstest]
    #[case(None, vec![HEART_RATE_SERVICE_UUID], true)]
    #[case(Some("Polar H10 7A1B2C"), vec![], true)]
    #[case(Some("TICKR X"), vec![], true)]
    #[case(Some("Garmin HRM-Dual"), vec![], true)]
    #[case(Some("Kitchen Speaker"), vec![], false)]
    #[case(Some("Motorola Edge"), vec![], false)]
    #[case(Some("Heartbeat Speaker"), vec![], false)]
    #[case(None, vec![], false)]
    fn default_hints_match_known_vendors(
        #[case] name: Option<&str>,
        #[case] services: Vec<Uuid>,
        #[case] expected: bool,
    ) {
        let backend = backend(Vec::new());
        let scanner = scanner(&backend, ScanPolicy::default());

        let picked = scanner.pick_candidate(vec![advertisement(name, services)]);

        assert_eq!(expected, picked.is_some());
    }

    #[test]
    fn service_filter_only_applies_without_name_hints() {
        let backend = backend(Vec::new());
        let with_hints = scanner(&backend, ScanPolicy::default());
        let without_hints = scanner(
            &backend,
            ScanPolicy::builder().vendor_name_hints(Vec::<String>::new()).build(),
        );

        assert_eq!(None, with_hints.service_filter());
        assert_eq!(Some(HEART_RATE_SERVICE_UUID), without_hints.service_filter());
        assert_eq!(
            None,
            without_hints.pick_candidate(vec![advertisement(Some("Polar H10"), vec![])])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scan_returns_first_sensor_and_stops_scanning() -> anyhow::Result<()> {
        let backend = backend(vec![FakeDevice::heart_rate_sensor("AA:BB", "Polar H10")]);
        let scanner = scanner(&backend, ScanPolicy::default());

        let device = scanner
            .scan_for_heart_rate_device(Duration::from_secs(5), &CancellationToken::new())
            .await?;

        assert_eq!("AA:BB", device.id().as_str());
        assert_eq!(Some("Polar H10"), device.local_name());
        assert!(!backend.controller().is_scanning());
        assert_eq!(1, backend.controller().counters().stop_scan_calls);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn advertised_service_wins_over_earlier_name_match() -> anyhow::Result<()> {
        let name_only = FakeDevice::new(advertisement_for("11:22", "Polar Loop", Vec::new()));
        let backend = backend(vec![
            name_only,
            FakeDevice::new(advertisement_for("33:44", "Speaker", Vec::new())),
            FakeDevice::heart_rate_sensor("AA:BB", "HR Strap 42"),
        ]);
        let scanner = scanner(&backend, ScanPolicy::default());

        let device = scanner
            .scan_for_heart_rate_device(Duration::from_secs(5), &CancellationToken::new())
            .await?;

        assert_eq!("AA:BB", device.id().as_str());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn name_match_is_used_when_no_device_advertises_the_service() -> anyhow::Result<()> {
        let backend = backend(vec![
            FakeDevice::new(advertisement_for("33:44", "Motorola Edge", Vec::new())),
            FakeDevice::new(advertisement_for("11:22", "Wahoo TICKR", Vec::new())),
        ]);
        let scanner = scanner(&backend, ScanPolicy::default());

        let device = scanner
            .scan_for_heart_rate_device(Duration::from_secs(5), &CancellationToken::new())
            .await?;

        assert_eq!("11:22", device.id().as_str());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn scan_times_out_with_not_found_and_stops_scanning() {
        let backend = backend(Vec::new());
        let scanner = scanner(&backend, ScanPolicy::default());

        let result = scanner
            .scan_for_heart_rate_device(Duration::from_secs(2), &CancellationToken::new())
            .await;

        assert_matches!(result, Err(HeartRateError::NotFound { timeout }) if timeout == Duration::from_secs(2));
        assert!(!backend.controller().is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_scan_stops_scanning() {
        let backend = backend(Vec::new());
        let scanner = scanner(&backend, ScanPolicy::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = scanner
            .scan_for_heart_rate_device(Duration::from_secs(2), &cancel)
            .await;

        assert_matches!(result, Err(HeartRateError::ScanCancelled));
        assert_eq!(1, backend.controller().counters().stop_scan_calls);
    }

    #[tokio::test(start_paused = true)]
    async fn find_device_ignores_other_sensors() {
        let backend = backend(vec![FakeDevice::heart_rate_sensor("CC:DD", "Polar H9")]);
        let scanner = scanner(&backend, ScanPolicy::default());

        let result = scanner
            .find_device(
                &DeviceId::new("AA:BB"),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await;

        assert_matches!(result, Err(HeartRateError::NotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn scanner_can_be_reused_after_completion() -> anyhow::Result<()> {
        let backend = backend(vec![FakeDevice::heart_rate_sensor("AA:BB", "Polar H10")]);
        let scanner = scanner(&backend, ScanPolicy::default());
        let cancel = CancellationToken::new();

        scanner.scan_for_heart_rate_device(Duration::from_secs(5), &cancel).await?;
        scanner.scan_for_heart_rate_device(Duration::from_secs(5), &cancel).await?;

        assert_eq!(2, backend.controller().counters().start_scan_calls);
        assert_eq!(2, backend.controller().counters().stop_scan_calls);
        Ok(())
    }
}
