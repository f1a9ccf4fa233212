use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::Stream;
use tracing::info;
use uuid::Uuid;

use super::btleplug_backend::BtleplugBackend;
use super::fake_backend::{FakeBackend, FakeBackendConfig};
use super::model::{Advertisement, DeviceId, ServiceInfo};
use super::platform::PlatformManager;
use crate::error::HeartRateError;

/// Events delivered by a subscribed link.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LinkEvent {
    /// Raw characteristic payload.
    Notification(Vec<u8>),
    /// The transport reported a physical disconnect.
    Disconnected,
}

/// Stream of link events; ends when the transport drops the link.
pub type LinkEventStream = Pin<Box<dyn Stream<Item = LinkEvent> + Send>>;

/// Scanning and connection primitives of a BLE stack.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Starts a background scan, optionally filtered to one service.
    async fn start_scan(&self, service_filter: Option<Uuid>) -> Result<(), HeartRateError>;

    /// Stops the background scan.
    async fn stop_scan(&self) -> Result<(), HeartRateError>;

    /// Returns advertisements observed since the scan started.
    async fn advertisements(&self) -> Result<Vec<Advertisement>, HeartRateError>;

    /// Whether `connect` accepts ids that were not found by the current scan.
    fn supports_connect_by_id(&self) -> bool;

    /// Attaches to a peripheral.
    async fn connect(&self, device_id: &DeviceId) -> Result<Box<dyn Link>, HeartRateError>;
}

/// An attached peripheral.
#[async_trait]
pub trait Link: Send + Sync + Debug {
    /// Enumerates services and characteristics.
    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, HeartRateError>;

    /// Subscribes to notifications on one characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<LinkEventStream, HeartRateError>;

    /// Cancels a notification subscription.
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), HeartRateError>;

    /// Physical connection state as reported by the transport.
    async fn is_connected(&self) -> Result<bool, HeartRateError>;

    /// Detaches from the peripheral.
    async fn disconnect(&self) -> Result<(), HeartRateError>;
}

/// Runtime BLE backend selection.
#[derive(Debug)]
pub enum BackendSelection {
    Real,
    Fake(FakeBackendConfig),
}

/// A transport paired with the platform manager that guards it.
#[derive(Debug, Clone)]
pub struct Backend {
    transport: Arc<dyn Transport>,
    platform: Arc<dyn PlatformManager>,
}

impl Backend {
    /// Pairs an explicit transport and platform manager.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, platform: Arc<dyn PlatformManager>) -> Self {
        Self {
            transport,
            platform,
        }
    }

    /// Builds the backend chosen at startup.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform BLE manager cannot be created.
    pub async fn from_selection(selection: BackendSelection) -> Result<Self, HeartRateError> {
        match selection {
            BackendSelection::Real => {
                let backend = Arc::new(BtleplugBackend::new().await?);
                Ok(Self::new(backend.clone(), backend))
            }
            BackendSelection::Fake(config) => {
                info!("using fake BLE backend");
                let backend = FakeBackend::new(config);
                Ok(Self::new(
                    Arc::new(backend.transport()),
                    Arc::new(backend.platform()),
                ))
            }
        }
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    #[must_use]
    pub fn platform(&self) -> &Arc<dyn PlatformManager> {
        &self.platform
    }
}
