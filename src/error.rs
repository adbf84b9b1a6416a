use serde_with::SerializeDisplay;
use thiserror::Error;
use uuid::Uuid;

use crate::hw::PeripheralAddress;
use crate::protocol::{scan_error, status};

/// Errors returned by backend construction and CLI-level BLE interaction.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("failed while waiting for Ctrl+C")]
    CtrlC { source: std::io::Error },
    #[error("scan failed: {0}")]
    ScanFailed(ScanFailure),
    #[error("peripheral `{address}` advertising service {service} was not found")]
    PeripheralNotFound {
        address: PeripheralAddress,
        service: Uuid,
    },
    #[error("connection to `{address}` failed: {failure}")]
    ConnectFailed {
        address: PeripheralAddress,
        failure: ConnectionFailure,
    },
    #[error("connection to `{address}` ended before it was established")]
    ConnectionEnded { address: PeripheralAddress },
    #[error("enabling notifications failed: {0}")]
    NotificationFailed(NotificationFailure),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error(transparent)]
    Gatt(#[from] GattError),
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}

/// Errors returned when parsing fake platform fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("hex payload is invalid")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Errors returned when parsing a peripheral address.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum AddressError {
    #[error("peripheral address cannot be empty")]
    Empty,
}

/// Errors returned synchronously by a platform binding when it refuses a command.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum PlatformError {
    #[error("the BLE adapter is unavailable")]
    AdapterUnavailable,
    #[error("peripheral `{address}` is not known to the platform")]
    UnknownPeripheral { address: PeripheralAddress },
    #[error("the platform refused the request: {reason}")]
    Refused { reason: String },
}

/// Reasons a scan session could not start or had to stop early.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error, SerializeDisplay)]
pub enum ScanFailure {
    #[error("a scan with the same settings is already running")]
    AlreadyStarted,
    #[error("the application could not be registered for scanning")]
    ApplicationRegistrationFailed,
    #[error("the scanner reported an internal error")]
    InternalError,
    #[error("scanning with these settings is not supported")]
    FeatureUnsupported,
    #[error("the controller is out of scan resources")]
    OutOfHardwareResources,
    #[error("scans are being restarted too frequently")]
    ScanningTooFrequently,
    #[error("the BLE adapter is disabled")]
    AdapterDisabled,
    #[error("scan failed with platform code {0}")]
    Other(i32),
}

impl ScanFailure {
    /// Maps a platform scan error code onto the failure taxonomy.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            scan_error::ALREADY_STARTED => Self::AlreadyStarted,
            scan_error::APPLICATION_REGISTRATION_FAILED => Self::ApplicationRegistrationFailed,
            scan_error::INTERNAL_ERROR => Self::InternalError,
            scan_error::FEATURE_UNSUPPORTED => Self::FeatureUnsupported,
            scan_error::OUT_OF_HARDWARE_RESOURCES => Self::OutOfHardwareResources,
            scan_error::SCANNING_TOO_FREQUENTLY => Self::ScanningTooFrequently,
            other => Self::Other(other),
        }
    }

    /// Returns the platform code, when the failure came from one.
    #[must_use]
    pub fn code(self) -> Option<i32> {
        match self {
            Self::AlreadyStarted => Some(scan_error::ALREADY_STARTED),
            Self::ApplicationRegistrationFailed => Some(scan_error::APPLICATION_REGISTRATION_FAILED),
            Self::InternalError => Some(scan_error::INTERNAL_ERROR),
            Self::FeatureUnsupported => Some(scan_error::FEATURE_UNSUPPORTED),
            Self::OutOfHardwareResources => Some(scan_error::OUT_OF_HARDWARE_RESOURCES),
            Self::ScanningTooFrequently => Some(scan_error::SCANNING_TOO_FREQUENTLY),
            Self::AdapterDisabled => None,
            Self::Other(code) => Some(code),
        }
    }
}

/// Errors returned synchronously by `start_scan`.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("a timed scan needs a running tokio runtime to schedule its auto-stop")]
    NoRuntime,
}

/// Classified reason for an abnormal connection teardown.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error, SerializeDisplay)]
pub enum ConnectionFailure {
    #[error(
        "connection timed out or the device was not found (status {code})",
        code = status::CONN_TIMEOUT_OR_NOT_FOUND
    )]
    Timeout,
    #[error("device is out of range (status {code})", code = status::CONN_OUT_OF_RANGE)]
    OutOfRange,
    #[error(
        "local host terminated the connection (status {code})",
        code = status::CONN_TERMINATE_LOCAL_HOST
    )]
    LocalTerminate,
    #[error("connection failed with status {0}")]
    Other(i32),
}

impl ConnectionFailure {
    /// Classifies a non-success GATT status code.
    #[must_use]
    pub fn classify(code: i32) -> Self {
        match code {
            status::CONN_TIMEOUT_OR_NOT_FOUND => Self::Timeout,
            status::CONN_OUT_OF_RANGE => Self::OutOfRange,
            status::CONN_TERMINATE_LOCAL_HOST => Self::LocalTerminate,
            other => Self::Other(other),
        }
    }

    /// Returns the raw status code behind this failure.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Timeout => status::CONN_TIMEOUT_OR_NOT_FOUND,
            Self::OutOfRange => status::CONN_OUT_OF_RANGE,
            Self::LocalTerminate => status::CONN_TERMINATE_LOCAL_HOST,
            Self::Other(code) => code,
        }
    }
}

/// Errors returned synchronously by `connect`.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ConnectionError {
    #[error("a connection to `{address}` is already in progress or established")]
    AlreadyActive { address: PeripheralAddress },
}

/// Lookup failures after service discovery.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error, SerializeDisplay)]
pub enum DiscoveryFailure {
    #[error("service {service} was not found on the peripheral")]
    ServiceNotFound { service: Uuid },
    #[error("characteristic {characteristic} was not found in service {service}")]
    CharacteristicNotFound { service: Uuid, characteristic: Uuid },
    #[error("service discovery failed with status {status}")]
    DiscoveryFailed { status: i32 },
}

/// Terminal failure delivered on a notification event stream.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error, SerializeDisplay)]
pub enum NotificationFailure {
    #[error(transparent)]
    Discovery(#[from] DiscoveryFailure),
    #[error("the platform refused to register for notifications")]
    RegistrationRefused,
    #[error("the platform refused to write the configuration descriptor")]
    DescriptorWriteRefused,
    #[error("writing the configuration descriptor failed with status {status}")]
    DescriptorWriteFailed { status: i32 },
    #[error("the connection was lost before notifications were enabled")]
    ConnectionLost,
}

/// Errors returned synchronously by notification subscription requests.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum NotifyError {
    #[error("the peripheral handle is closed or belongs to an earlier session")]
    UnknownHandle,
    #[error("the peripheral is not connected")]
    NotConnected,
    #[error("notifications for characteristic {characteristic} are already subscribed")]
    AlreadySubscribed { characteristic: Uuid },
    #[error("notifications for characteristic {characteristic} are not subscribed")]
    NotSubscribed { characteristic: Uuid },
}

/// Outcome errors for pass-through GATT requests.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum GattError {
    #[error("the peripheral is not connected")]
    NotConnected,
    #[error("services have not been discovered on this connection")]
    ServicesNotDiscovered,
    #[error(transparent)]
    Discovery(#[from] DiscoveryFailure),
    #[error("characteristic write failed with status {status}")]
    WriteFailed { status: i32 },
    #[error("characteristic read failed with status {status}")]
    ReadFailed { status: i32 },
    #[error(transparent)]
    Refused(#[from] PlatformError),
    #[error("the connection was lost before the request completed")]
    ConnectionLost,
    #[error("the request was cancelled because its handle was closed")]
    Cancelled,
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
