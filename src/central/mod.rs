mod config;
mod connection;
mod context;
mod dispatch;
mod negotiator;
mod registry;
mod scan;

pub use self::config::{CentralConfig, NotificationSuccessPolicy};
pub use self::connection::{ConnectionEvent, ConnectionState, PeripheralHandle};
pub use self::context::BleCentral;
pub use self::dispatch::{DispatcherHandle, EventStream, GattRequest};
pub use self::negotiator::{
    DescriptorWriteOutcome, NotificationEvent, NotificationSubscription, ServiceBinding,
};
pub use self::registry::DeviceRegistry;
pub use self::scan::{DEFAULT_SCAN_DURATION_MILLIS, ScanEvent, ScanRequest, ScanState};
