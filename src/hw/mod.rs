mod btleplug_backend;
mod fake_backend;
mod model;
pub(crate) mod platform;
mod scanner;
mod session;
mod transport;

pub use self::fake_backend::{
    FakeAdapterState, FakeBackend, FakeBackendConfig, FakeController, FakeCounters, FakeDevice,
    NotificationPayloads, ScanFixture,
};
pub use self::model::{Advertisement, CharacteristicInfo, DeviceHandle, DeviceId, ServiceInfo};
pub use self::platform::PlatformManager;
pub use self::scanner::{DeviceScanner, ScanPolicy};
pub(crate) use self::session::{ConnectionSession, SessionEvent};
pub use self::transport::{Backend, BackendSelection, Link, LinkEvent, LinkEventStream, Transport};
