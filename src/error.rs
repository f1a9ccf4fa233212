use std::time::Duration;

use serde::Serialize;
use strum_macros::Display;
use thiserror::Error;
use time::OffsetDateTime;

use crate::hw::DeviceId;
use crate::protocol::{EndpointId, endpoint_metadata};

/// Coarse error categories surfaced to UI layers.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotSupported,
    NotEnabled,
    PermissionDenied,
    NotFound,
    ConnectionFailed,
    ConnectionLost,
    ServiceNotFound,
    CharacteristicNotFound,
    DecodeError,
    Unknown,
}

impl ErrorKind {
    /// Suggested user action for this category.
    #[must_use]
    pub fn remedy(self) -> &'static str {
        match self {
            Self::NotSupported => "use a device with Bluetooth Low Energy support",
            Self::NotEnabled => "enable Bluetooth in your system settings",
            Self::PermissionDenied => "grant Bluetooth permission to this application",
            Self::NotFound => "wake the sensor, moisten the strap and move closer",
            Self::ConnectionFailed => "move closer to the sensor and try again",
            Self::ConnectionLost => "move closer to the sensor and check its battery",
            Self::ServiceNotFound | Self::CharacteristicNotFound => {
                "make sure the device is a standard heart-rate sensor"
            }
            Self::DecodeError => "check that the strap has good skin contact",
            Self::Unknown => "restart Bluetooth and try again",
        }
    }
}

/// Errors returned by scanning, connecting and supervising a heart-rate sensor.
#[derive(Debug, Error)]
pub enum HeartRateError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("Bluetooth Low Energy is not supported on this platform")]
    NotSupported,
    #[error("the Bluetooth adapter is powered off")]
    NotEnabled,
    #[error("Bluetooth permission was denied")]
    PermissionDenied,
    #[error("no heart-rate sensor was found within {}", humantime::format_duration(*timeout))]
    NotFound { timeout: Duration },
    #[error("device `{device_id}` is no longer discoverable")]
    DeviceUnavailable { device_id: DeviceId },
    #[error("failed to connect to `{device_id}`: {reason}")]
    ConnectionFailed { device_id: DeviceId, reason: String },
    #[error("connection to `{device_id}` was lost")]
    ConnectionLost { device_id: DeviceId },
    #[error(
        "device `{device_id}` does not expose the {name} service ({uuid})",
        name = endpoint_metadata(EndpointId::HeartRateService).name(),
        uuid = endpoint_metadata(EndpointId::HeartRateService).uuid()
    )]
    ServiceNotFound { device_id: DeviceId },
    #[error(
        "device `{device_id}` does not expose the {name} characteristic ({uuid})",
        name = endpoint_metadata(EndpointId::HeartRateMeasurement).name(),
        uuid = endpoint_metadata(EndpointId::HeartRateMeasurement).uuid()
    )]
    CharacteristicNotFound { device_id: DeviceId },
    #[error("the `{transport}` transport cannot connect to a device by id")]
    Unsupported { transport: &'static str },
    #[error("the scan was stopped before a sensor was found")]
    ScanCancelled,
    #[error("the heart-rate monitor has been disposed")]
    Disposed,
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}

impl HeartRateError {
    /// Maps this error onto the UI-facing taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Ble(error) => ble_error_kind(error),
            Self::NotSupported | Self::Unsupported { .. } => ErrorKind::NotSupported,
            Self::NotEnabled => ErrorKind::NotEnabled,
            Self::PermissionDenied => ErrorKind::PermissionDenied,
            Self::NotFound { .. } | Self::DeviceUnavailable { .. } => ErrorKind::NotFound,
            Self::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            Self::ConnectionLost { .. } => ErrorKind::ConnectionLost,
            Self::ServiceNotFound { .. } => ErrorKind::ServiceNotFound,
            Self::CharacteristicNotFound { .. } => ErrorKind::CharacteristicNotFound,
            Self::ScanCancelled | Self::Disposed | Self::Fixture(_) => ErrorKind::Unknown,
        }
    }

    /// Whether automatic reconnection may retry after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::NotSupported) && !matches!(self, Self::Disposed)
    }

    /// Builds a user-facing report for this error.
    #[must_use]
    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.kind(), self.to_string())
    }
}

fn ble_error_kind(error: &btleplug::Error) -> ErrorKind {
    match error {
        btleplug::Error::PermissionDenied => ErrorKind::PermissionDenied,
        btleplug::Error::DeviceNotFound => ErrorKind::NotFound,
        btleplug::Error::NotConnected => ErrorKind::ConnectionLost,
        btleplug::Error::TimedOut(_) => ErrorKind::ConnectionFailed,
        btleplug::Error::NotSupported(_) => ErrorKind::NotSupported,
        btleplug::Error::NoSuchCharacteristic => ErrorKind::CharacteristicNotFound,
        _ => ErrorKind::Unknown,
    }
}

/// Human-readable description of a terminal error, with a suggested remedy.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ErrorReport {
    kind: ErrorKind,
    message: String,
    remedy: &'static str,
    #[serde(serialize_with = "time::serde::rfc3339::serialize")]
    occurred_at: OffsetDateTime,
}

impl ErrorReport {
    pub(crate) fn new(kind: ErrorKind, message: String) -> Self {
        Self {
            kind,
            message,
            remedy: kind.remedy(),
            occurred_at: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn remedy(&self) -> &'static str {
        self.remedy
    }

    #[must_use]
    pub fn occurred_at(&self) -> OffsetDateTime {
        self.occurred_at
    }
}

/// Errors returned when parsing fake backend fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain four pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot have an empty device id")]
    EmptyDeviceId,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("invalid hexadecimal payload `{value}`")]
    InvalidHex {
        value: String,
        source: hex::FromHexError,
    },
    #[error("invalid 16-bit service id `{value}`")]
    InvalidServiceId { value: String },
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn device() -> DeviceId {
        DeviceId::new("AA:BB:CC")
    }

    #[rstest]
    #[case(HeartRateError::NotSupported, ErrorKind::NotSupported)]
    #[case(HeartRateError::NotEnabled, ErrorKind::NotEnabled)]
    #[case(HeartRateError::PermissionDenied, ErrorKind::PermissionDenied)]
    #[case(HeartRateError::NotFound { timeout: Duration::from_secs(1) }, ErrorKind::NotFound)]
    #[case(HeartRateError::ServiceNotFound { device_id: device() }, ErrorKind::ServiceNotFound)]
    #[case(
        HeartRateError::CharacteristicNotFound { device_id: device() },
        ErrorKind::CharacteristicNotFound
    )]
    #[case(HeartRateError::ConnectionLost { device_id: device() }, ErrorKind::ConnectionLost)]
    #[case(HeartRateError::Ble(btleplug::Error::NotConnected), ErrorKind::ConnectionLost)]
    #[case(HeartRateError::Disposed, ErrorKind::Unknown)]
    fn errors_map_to_taxonomy(#[case] error: HeartRateError, #[case] expected: ErrorKind) {
        assert_eq!(expected, error.kind());
    }

    #[rstest]
    #[case(ErrorKind::NotFound, "not_found")]
    #[case(ErrorKind::PermissionDenied, "permission_denied")]
    #[case(ErrorKind::CharacteristicNotFound, "characteristic_not_found")]
    #[case(ErrorKind::DecodeError, "decode_error")]
    fn kinds_display_in_snake_case(#[case] kind: ErrorKind, #[case] expected: &str) {
        assert_eq!(expected, kind.to_string());
    }

    #[test]
    fn not_supported_is_never_recoverable() {
        assert!(!HeartRateError::NotSupported.is_recoverable());
        assert!(!HeartRateError::Unsupported { transport: "fake" }.is_recoverable());
        assert!(HeartRateError::ConnectionLost { device_id: device() }.is_recoverable());
    }

    #[test]
    fn report_carries_message_and_remedy() {
        let report = HeartRateError::NotEnabled.report();

        assert_eq!(ErrorKind::NotEnabled, report.kind());
        assert_eq!("the Bluetooth adapter is powered off", report.message());
        assert_eq!("enable Bluetooth in your system settings", report.remedy());
    }

    #[test]
    fn service_not_found_message_names_the_service() {
        let error = HeartRateError::ServiceNotFound { device_id: device() };
        let message = error.to_string();

        assert!(message.contains("Heart Rate service"));
        assert!(message.contains("0000180d-0000-1000-8000-00805f9b34fb"));
    }

    #[test]
    fn report_serialises_kind_in_snake_case() {
        let report = HeartRateError::PermissionDenied.report();
        let json = serde_json::to_value(&report).expect("report should serialise");

        assert_matches!(json.get("kind").and_then(|kind| kind.as_str()), Some("permission_denied"));
        assert_matches!(json.get("occurred_at"), Some(serde_json::Value::String(_)));
    }
}
