use std::fmt;
use std::time::Duration;

use bon::Builder;
use serde::Serialize;
use serde_with::{hex::Hex, serde_as};
use strum_macros::Display;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use super::model::{PeripheralAddress, ScanRecord, ServiceInfo};
use crate::error::PlatformError;

/// Link state reported by connection-state callbacks.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Characteristic write type.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    WithResponse,
    WithoutResponse,
}

/// Radio duty cycle requested while scanning.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    LowPower,
    #[default]
    Balanced,
    LowLatency,
}

/// Which advertisement sightings the platform reports.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScanCallbackType {
    #[default]
    AllMatches,
    FirstMatch,
    MatchLost,
}

/// How aggressively the controller matches filtered advertisements.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScanMatchMode {
    Aggressive,
    #[default]
    Sticky,
}

/// Settings passed through to the platform scanner.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Builder, Serialize)]
pub struct ScanSettings {
    #[builder(default)]
    mode: ScanMode,
    #[builder(default)]
    callback_type: ScanCallbackType,
    #[builder(default)]
    match_mode: ScanMatchMode,
    /// Zero delivers each sighting immediately; anything else batches results.
    #[builder(default)]
    report_delay: Duration,
}

impl ScanSettings {
    #[must_use]
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    #[must_use]
    pub fn callback_type(&self) -> ScanCallbackType {
        self.callback_type
    }

    #[must_use]
    pub fn match_mode(&self) -> ScanMatchMode {
        self.match_mode
    }

    #[must_use]
    pub fn report_delay(&self) -> Duration {
        self.report_delay
    }
}

/// Identifies one connect attempt.
///
/// The central picks a fresh id for every connect and the platform tags each
/// callback of that link with it. Callbacks carrying a released link's id are
/// dropped even when a newer link to the same address exists.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display, Serialize)]
#[display("link#{_0}")]
pub struct LinkId(u64);

impl LinkId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Service and characteristic pair addressing one attribute.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
pub struct CharacteristicPath {
    service: Uuid,
    characteristic: Uuid,
}

impl CharacteristicPath {
    #[must_use]
    pub fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }

    #[must_use]
    pub fn service(&self) -> Uuid {
        self.service
    }

    #[must_use]
    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }
}

/// Asynchronous callbacks raised by a platform binding.
///
/// Connection-bound callbacks carry the [`LinkId`] given to the
/// [`BlePlatform::connect`] call that opened their link.
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlatformEvent {
    ScanResult(ScanRecord),
    BatchScanResults {
        records: Vec<ScanRecord>,
    },
    ScanFailed {
        error_code: i32,
    },
    ConnectionStateChanged {
        address: PeripheralAddress,
        link: LinkId,
        status: i32,
        new_state: LinkState,
    },
    ServicesDiscovered {
        address: PeripheralAddress,
        link: LinkId,
        status: i32,
        services: Vec<ServiceInfo>,
    },
    DescriptorWritten {
        address: PeripheralAddress,
        link: LinkId,
        characteristic: CharacteristicPath,
        descriptor: Uuid,
        status: i32,
    },
    CharacteristicWritten {
        address: PeripheralAddress,
        link: LinkId,
        characteristic: CharacteristicPath,
        status: i32,
    },
    CharacteristicRead {
        address: PeripheralAddress,
        link: LinkId,
        characteristic: CharacteristicPath,
        status: i32,
        #[serde_as(as = "Hex")]
        value: Vec<u8>,
    },
    CharacteristicChanged {
        address: PeripheralAddress,
        link: LinkId,
        characteristic: CharacteristicPath,
        #[serde_as(as = "Hex")]
        value: Vec<u8>,
    },
}

/// Cloneable handle platform bindings use to deliver callbacks.
#[derive(Debug, Clone)]
pub struct PlatformEventSink {
    sender: mpsc::UnboundedSender<PlatformEvent>,
}

impl PlatformEventSink {
    /// Queues a callback for the dispatcher. Returns `false` once the dispatcher has gone.
    pub fn deliver(&self, event: PlatformEvent) -> bool {
        match self.sender.send(event) {
            Ok(()) => true,
            Err(error) => {
                trace!(event = ?error.0, "dropping platform event after dispatcher shutdown");
                false
            }
        }
    }
}

/// Receiving side of the platform callback channel.
#[derive(Debug)]
pub struct PlatformEventSource {
    receiver: mpsc::UnboundedReceiver<PlatformEvent>,
}

impl PlatformEventSource {
    /// Waits for the next callback; `None` once every sink is dropped.
    pub async fn recv(&mut self) -> Option<PlatformEvent> {
        self.receiver.recv().await
    }

    /// Returns an already queued callback without waiting.
    pub fn try_recv(&mut self) -> Option<PlatformEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Creates the callback channel between a platform binding and the dispatcher.
#[must_use]
pub fn platform_event_channel() -> (PlatformEventSink, PlatformEventSource) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        PlatformEventSink { sender },
        PlatformEventSource { receiver },
    )
}

/// Outcome of asking the platform to drop its cached attribute table.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CacheInvalidation {
    Invalidated,
    Failed,
    Unsupported,
}

/// Commands the central core issues to the radio.
///
/// Every command is fire-and-forget: an `Err` means the platform refused the
/// request outright, while the eventual outcome of an accepted request arrives
/// later as a [`PlatformEvent`].
pub trait BlePlatform: Send + Sync + fmt::Debug {
    /// Returns whether the adapter is powered on.
    fn adapter_enabled(&self) -> bool;

    fn start_scan(&self, service_filter: Uuid, settings: &ScanSettings)
    -> Result<(), PlatformError>;

    fn stop_scan(&self) -> Result<(), PlatformError>;

    /// Opens a link tagged `link`. Later commands for `address` act on this
    /// link until the next `connect`.
    fn connect(
        &self,
        address: &PeripheralAddress,
        link: LinkId,
        auto_connect: bool,
    ) -> Result<(), PlatformError>;

    fn discover_services(&self, address: &PeripheralAddress) -> Result<(), PlatformError>;

    /// Registers or unregisters local delivery of change callbacks for a characteristic.
    fn set_characteristic_notification(
        &self,
        address: &PeripheralAddress,
        characteristic: &CharacteristicPath,
        enabled: bool,
    ) -> Result<(), PlatformError>;

    fn write_descriptor(
        &self,
        address: &PeripheralAddress,
        characteristic: &CharacteristicPath,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError>;

    fn write_characteristic(
        &self,
        address: &PeripheralAddress,
        characteristic: &CharacteristicPath,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), PlatformError>;

    fn read_characteristic(
        &self,
        address: &PeripheralAddress,
        characteristic: &CharacteristicPath,
    ) -> Result<(), PlatformError>;

    fn disconnect(&self, address: &PeripheralAddress) -> Result<(), PlatformError>;

    /// Releases the transport for an address. Never fails; closing twice is harmless.
    ///
    /// No callback for the released link is raised afterwards.
    fn close(&self, address: &PeripheralAddress);

    /// Drops any cached attribute table for the address.
    fn invalidate_cache(&self, _address: &PeripheralAddress) -> CacheInvalidation {
        CacheInvalidation::Unsupported
    }
}
