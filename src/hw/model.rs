use std::fmt::{self, Display, Formatter};

use serde::Serialize;
use uuid::Uuid;

/// Backend-specific identity of a peripheral.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wraps a backend identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A discovered sensor that matched the scan predicate.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DeviceHandle {
    id: DeviceId,
    local_name: Option<String>,
    rssi: Option<i16>,
}

impl DeviceHandle {
    /// Creates a device handle.
    #[must_use]
    pub fn new(id: DeviceId, local_name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            id,
            local_name,
            rssi,
        }
    }

    #[must_use]
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Returns the latest observed RSSI value, if present.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// Name for log lines and terminal output.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.local_name().unwrap_or(self.id.as_str())
    }
}

/// One advertisement observed while scanning.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Advertisement {
    device: DeviceHandle,
    services: Vec<Uuid>,
}

impl Advertisement {
    #[must_use]
    pub fn new(device: DeviceHandle, services: Vec<Uuid>) -> Self {
        Self { device, services }
    }

    #[must_use]
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Service UUIDs listed in the advertisement.
    #[must_use]
    pub fn services(&self) -> &[Uuid] {
        &self.services
    }

    pub(crate) fn advertises(&self, service: Uuid) -> bool {
        self.services.contains(&service)
    }

    pub(crate) fn into_device(self) -> DeviceHandle {
        self.device
    }
}

/// A characteristic discovered on a connected peripheral.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CharacteristicInfo {
    uuid: Uuid,
    notifiable: bool,
}

impl CharacteristicInfo {
    #[must_use]
    pub fn new(uuid: Uuid, notifiable: bool) -> Self {
        Self { uuid, notifiable }
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Whether the characteristic supports notify or indicate.
    #[must_use]
    pub fn is_notifiable(&self) -> bool {
        self.notifiable
    }
}

/// A GATT service with its discovered characteristics.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceInfo {
    uuid: Uuid,
    characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    #[must_use]
    pub fn new(uuid: Uuid, characteristics: Vec<CharacteristicInfo>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicInfo] {
        &self.characteristics
    }
}
