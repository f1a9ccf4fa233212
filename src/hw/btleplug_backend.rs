use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, trace};
use uuid::Uuid;

use super::model::{Advertisement, CharacteristicInfo, DeviceHandle, DeviceId, ServiceInfo};
use super::platform::PlatformManager;
use super::transport::{Link, LinkEvent, LinkEventStream, Transport};
use crate::error::HeartRateError;

/// Transport backed by `btleplug`.
#[derive(Debug)]
pub(crate) struct BtleplugBackend {
    manager: Manager,
}

impl BtleplugBackend {
    /// Creates the real BLE backend.
    pub(crate) async fn new() -> Result<Self, HeartRateError> {
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<Adapter>, HeartRateError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(HeartRateError::NotSupported);
        }
        Ok(adapters)
    }

    #[instrument(skip(self), level = "debug", fields(%device_id))]
    async fn find_peripheral(
        &self,
        device_id: &DeviceId,
    ) -> Result<(Adapter, Peripheral), HeartRateError> {
        for adapter in self.adapters().await? {
            let peripherals = adapter.peripherals().await?;
            if let Some(peripheral) = peripherals
                .into_iter()
                .find(|peripheral| peripheral.id().to_string() == device_id.as_str())
            {
                return Ok((adapter, peripheral));
            }
        }

        Err(HeartRateError::DeviceUnavailable {
            device_id: device_id.clone(),
        })
    }
}

#[async_trait]
impl Transport for BtleplugBackend {
    fn name(&self) -> &'static str {
        "btleplug"
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self, service_filter: Option<Uuid>) -> Result<(), HeartRateError> {
        let adapters = self.adapters().await?;
        info!(adapter_count = adapters.len(), "starting BLE scan");
        let filter = scan_filter(service_filter);
        for adapter in &adapters {
            adapter.start_scan(filter.clone()).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_scan(&self) -> Result<(), HeartRateError> {
        for adapter in self.adapters().await? {
            adapter.stop_scan().await?;
        }
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    async fn advertisements(&self) -> Result<Vec<Advertisement>, HeartRateError> {
        let mut advertisements = Vec::new();
        for adapter in self.adapters().await? {
            for peripheral in adapter.peripherals().await? {
                let Some(properties) = peripheral.properties().await? else {
                    continue;
                };
                advertisements.push(advertisement_from_properties(
                    peripheral.id().to_string(),
                    properties,
                ));
            }
        }
        Ok(advertisements)
    }

    fn supports_connect_by_id(&self) -> bool {
        true
    }

    #[instrument(skip(self), level = "debug", fields(%device_id))]
    async fn connect(&self, device_id: &DeviceId) -> Result<Box<dyn Link>, HeartRateError> {
        let (adapter, peripheral) = self.find_peripheral(device_id).await?;
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        debug!("peripheral attached");

        Ok(Box::new(BtleplugLink {
            adapter,
            peripheral,
            device_id: device_id.clone(),
        }))
    }
}

#[async_trait]
impl PlatformManager for BtleplugBackend {
    #[instrument(skip(self), level = "debug")]
    async fn validate_adapter_state(&self) -> Result<(), HeartRateError> {
        let adapters = self.adapters().await?;
        let mut any_powered_off = false;
        for adapter in &adapters {
            match adapter.adapter_state().await? {
                CentralState::PoweredOn => return Ok(()),
                CentralState::PoweredOff => any_powered_off = true,
                CentralState::Unknown => {
                    trace!("adapter did not report its power state");
                }
            }
        }

        if any_powered_off {
            return Err(HeartRateError::NotEnabled);
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn check_and_request_permissions(&self) -> Result<(), HeartRateError> {
        // Desktop stacks prompt on first adapter access and fail that call when refused.
        match self.manager.adapters().await {
            Ok(_adapters) => Ok(()),
            Err(btleplug::Error::PermissionDenied) => Err(HeartRateError::PermissionDenied),
            Err(error) => Err(error.into()),
        }
    }
}

/// An attached `btleplug` peripheral.
#[derive(Debug)]
struct BtleplugLink {
    adapter: Adapter,
    peripheral: Peripheral,
    device_id: DeviceId,
}

impl BtleplugLink {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, HeartRateError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .ok_or_else(|| HeartRateError::CharacteristicNotFound {
                device_id: self.device_id.clone(),
            })
    }
}

#[async_trait]
impl Link for BtleplugLink {
    #[instrument(skip(self), level = "debug", fields(device_id = %self.device_id))]
    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, HeartRateError> {
        self.peripheral.discover_services().await?;
        Ok(collect_services(&self.peripheral))
    }

    #[instrument(skip(self), level = "debug", fields(device_id = %self.device_id, %characteristic))]
    async fn subscribe(&self, characteristic: Uuid) -> Result<LinkEventStream, HeartRateError> {
        let target = self.characteristic(characteristic)?;
        let notifications = self.peripheral.notifications().await?;
        let central_events = self.adapter.events().await?;
        self.peripheral.subscribe(&target).await?;

        let peripheral_id = self.peripheral.id();
        let notifications = notifications
            .filter(move |notification| notification.uuid == characteristic)
            .map(|notification| LinkEvent::Notification(notification.value));
        let disconnects = central_events.filter_map(move |event| match event {
            CentralEvent::DeviceDisconnected(id) if id == peripheral_id => {
                Some(LinkEvent::Disconnected)
            }
            _ => None,
        });

        Ok(Box::pin(notifications.merge(disconnects)))
    }

    #[instrument(skip(self), level = "debug", fields(device_id = %self.device_id, %characteristic))]
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), HeartRateError> {
        let target = self.characteristic(characteristic)?;
        self.peripheral.unsubscribe(&target).await?;
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, HeartRateError> {
        Ok(self.peripheral.is_connected().await?)
    }

    #[instrument(skip(self), level = "debug", fields(device_id = %self.device_id))]
    async fn disconnect(&self) -> Result<(), HeartRateError> {
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

fn scan_filter(service_filter: Option<Uuid>) -> ScanFilter {
    ScanFilter {
        services: service_filter.into_iter().collect(),
    }
}

fn advertisement_from_properties(
    device_id: String,
    properties: PeripheralProperties,
) -> Advertisement {
    let PeripheralProperties {
        local_name,
        rssi,
        services,
        ..
    } = properties;
    Advertisement::new(
        DeviceHandle::new(DeviceId::new(device_id), local_name, rssi),
        services,
    )
}

fn collect_services(peripheral: &Peripheral) -> Vec<ServiceInfo> {
    let mut services: Vec<ServiceInfo> = peripheral
        .services()
        .into_iter()
        .map(|service| {
            let characteristics = service
                .characteristics
                .iter()
                .map(|characteristic| {
                    CharacteristicInfo::new(
                        characteristic.uuid,
                        is_notifiable(characteristic.properties),
                    )
                })
                .collect();
            ServiceInfo::new(service.uuid, characteristics)
        })
        .collect();
    services.sort_by_key(ServiceInfo::uuid);
    services
}

fn is_notifiable(properties: CharPropFlags) -> bool {
    properties.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
}
