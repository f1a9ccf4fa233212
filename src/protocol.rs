use btleplug::api::bleuuid::uuid_from_u16;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use uuid::Uuid;

/// Bluetooth SIG assigned number of the Heart Rate service.
pub const HEART_RATE_SERVICE_ID: u16 = 0x180D;
/// Bluetooth SIG assigned number of the Heart Rate Measurement characteristic.
pub const HEART_RATE_MEASUREMENT_ID: u16 = 0x2A37;

/// Heart Rate service UUID in 128-bit form.
pub const HEART_RATE_SERVICE_UUID: Uuid = uuid_from_u16(HEART_RATE_SERVICE_ID);
/// Heart Rate Measurement characteristic UUID in 128-bit form.
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = uuid_from_u16(HEART_RATE_MEASUREMENT_ID);

/// Lower-case name fragments of sensors that do not advertise the service UUID.
pub(crate) const DEFAULT_VENDOR_NAME_HINTS: [&str; 8] = [
    "polar", "garmin", "wahoo", "tickr", "suunto", "coospo", "magene", "hrm",
];

/// Known heart-rate protocol endpoints.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum EndpointId {
    /// Heart Rate primary service.
    #[strum(to_string = "heart_rate_service")]
    HeartRateService,
    /// Notify-only measurement characteristic.
    #[strum(to_string = "heart_rate_measurement")]
    HeartRateMeasurement,
}

/// Endpoint category in GATT.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub(crate) enum EndpointKind {
    #[strum(to_string = "service")]
    Service,
    #[strum(to_string = "characteristic")]
    Characteristic,
}

/// Descriptive metadata for one protocol endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    assigned_number: u16,
    kind: EndpointKind,
}

impl EndpointMetadata {
    /// Human-readable endpoint name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    /// 16-bit SIG assigned number.
    pub(crate) fn assigned_number(self) -> u16 {
        self.assigned_number
    }

    /// Full 128-bit UUID.
    pub(crate) fn uuid(self) -> Uuid {
        uuid_from_u16(self.assigned_number)
    }

    pub(crate) fn kind(self) -> EndpointKind {
        self.kind
    }
}

/// Resolves a discovered UUID back to a known endpoint.
pub(crate) fn endpoint_for_uuid(uuid: Uuid) -> Option<EndpointId> {
    EndpointId::iter().find(|endpoint| endpoint_metadata(*endpoint).uuid() == uuid)
}

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    match endpoint {
        EndpointId::HeartRateService => EndpointMetadata {
            name: "Heart Rate",
            assigned_number: HEART_RATE_SERVICE_ID,
            kind: EndpointKind::Service,
        },
        EndpointId::HeartRateMeasurement => EndpointMetadata {
            name: "Heart Rate Measurement",
            assigned_number: HEART_RATE_MEASUREMENT_ID,
            kind: EndpointKind::Characteristic,
        },
    }
}
