mod app;
mod central;
mod cli;
mod error;
mod hw;
mod protocol;
mod telemetry;
mod terminal;
mod utils;

pub use app::{
    ConnectedPeripheral, SessionHandler, fake_backend, real_backend, run, run_with_clients,
    run_with_clients_and_log_level, run_with_log_level,
};
pub use central::{
    BleCentral, CentralConfig, ConnectionEvent, ConnectionState, DEFAULT_SCAN_DURATION_MILLIS,
    DescriptorWriteOutcome, DeviceRegistry, DispatcherHandle, EventStream, GattRequest,
    NotificationEvent, NotificationSubscription, NotificationSuccessPolicy, PeripheralHandle,
    ScanEvent, ScanRequest, ScanState, ServiceBinding,
};
pub use cli::{
    Args, Command, FakeArgs, ListenArgs, LogLevel, OutputFormat, ReadArgs, ScanArgs, WriteArgs,
};
pub use error::{
    AddressError, ConnectionError, ConnectionFailure, DiscoveryFailure, FixtureError, GattError,
    InteractionError, NotificationFailure, NotifyError, PlatformError, ScanError, ScanFailure,
};
pub use hw::{
    Advertisement, BlePlatform, CacheInvalidation, CharacteristicInfo, CharacteristicPath,
    CharacteristicProperty, FAKE_NOTIFY_CHARACTERISTIC, FAKE_SERVICE, FAKE_WRITE_CHARACTERISTIC,
    FakeOperation, FakePlatform, FakePlatformConfig, HexPayload, LinkId, LinkState,
    NotificationPayloads, PeripheralAddress, PlatformBackend, PlatformCall, PlatformEvent,
    PlatformEventSink, PlatformEventSource, ScanCallbackType, ScanFixture, ScanMatchMode, ScanMode,
    ScanRecord, ScanSettings, ServiceInfo, WriteMode, default_services, platform_event_channel,
    platform_from_backend,
};
pub use protocol::{
    CLIENT_CHARACTERISTIC_CONFIGURATION, DISABLE_NOTIFICATION_VALUE, ENABLE_INDICATION_VALUE,
    ENABLE_NOTIFICATION_VALUE, bluetooth_base_uuid, scan_error, status,
};
pub use terminal::{SystemTerminalClient, TerminalClient};
