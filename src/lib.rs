mod app;
mod cli;
mod error;
mod hw;
mod measurement;
mod monitor;
mod protocol;
mod telemetry;
mod terminal;
mod utils;

pub use app::{
    fake_backend, real_backend, run, run_with_clients, run_with_clients_and_log_level,
    run_with_log_level,
};
pub use cli::{Args, Command, FakeArgs, ListenArgs, LogLevel, OutputFormat, ScanArgs};
pub use error::{ErrorKind, ErrorReport, FixtureError, HeartRateError};
pub use hw::{
    Advertisement, Backend, BackendSelection, CharacteristicInfo, DeviceHandle, DeviceId,
    DeviceScanner, FakeAdapterState, FakeBackend, FakeBackendConfig, FakeController,
    FakeCounters, FakeDevice, Link, LinkEvent, LinkEventStream, NotificationPayloads,
    PlatformManager, ScanFixture, ScanPolicy, ServiceInfo, Transport,
};
pub use measurement::{
    DecodeError, HeartRateReading, MAX_VALID_BPM, MIN_VALID_BPM, MeasurementDecoder,
};
pub use monitor::{
    ConnectionState, ConnectionStatus, HealthCheckPolicy, HeartRateMonitor, MonitorConfig,
    ReconnectPolicy, ReconnectState, StateEvent,
};
pub use protocol::{
    EndpointId, HEART_RATE_MEASUREMENT_ID, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_ID,
    HEART_RATE_SERVICE_UUID,
};
pub use terminal::TerminalClient;
