mod btleplug_backend;
mod fake_backend;
mod hardware;
mod model;
mod platform;

pub use self::fake_backend::{
    FAKE_NOTIFY_CHARACTERISTIC, FAKE_SERVICE, FAKE_WRITE_CHARACTERISTIC, FakeOperation,
    FakePlatform, FakePlatformConfig, HexPayload, NotificationPayloads, PlatformCall, ScanFixture,
    default_services,
};
pub use self::hardware::{PlatformBackend, platform_from_backend};
pub(crate) use self::model::find_service;
pub use self::model::{
    Advertisement, CharacteristicInfo, CharacteristicProperty, PeripheralAddress, ScanRecord,
    ServiceInfo,
};
pub use self::platform::{
    BlePlatform, CacheInvalidation, CharacteristicPath, LinkId, LinkState, PlatformEvent,
    PlatformEventSink, PlatformEventSource, ScanCallbackType, ScanMatchMode, ScanMode,
    ScanSettings, WriteMode, platform_event_channel,
};
