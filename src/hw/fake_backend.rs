use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bon::Builder;
use strum_macros::Display;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::model::{
    Advertisement, CharacteristicInfo, CharacteristicProperty, PeripheralAddress, ScanRecord,
    ServiceInfo,
};
use super::platform::{
    BlePlatform, CacheInvalidation, CharacteristicPath, LinkId, LinkState, PlatformEvent,
    PlatformEventSink, ScanSettings, WriteMode,
};
use crate::error::{FixtureError, PlatformError};
use crate::protocol::{CLIENT_CHARACTERISTIC_CONFIGURATION, bluetooth_base_uuid, status};

/// Service exposed by every scripted fake peripheral.
pub const FAKE_SERVICE: Uuid = bluetooth_base_uuid(0xfff0);
/// Notify/read characteristic of [`FAKE_SERVICE`].
pub const FAKE_NOTIFY_CHARACTERISTIC: Uuid = bluetooth_base_uuid(0xfff1);
/// Writable characteristic of [`FAKE_SERVICE`].
pub const FAKE_WRITE_CHARACTERISTIC: Uuid = bluetooth_base_uuid(0xfff2);

const DEFAULT_READ_VALUE: [u8; 2] = [0x01, 0x00];
const DEFAULT_ADVERTISEMENT_REPEATS: usize = 2;

/// Parsed fake scan fixture records.
#[derive(Debug, Clone, Default, derive_more::Into)]
pub struct ScanFixture {
    records: Vec<ScanRecord>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let records = parse_scan_fixture(value)?;
        Ok(Self { records })
    }
}

/// Parsed fake hex payload.
#[derive(Debug, Clone, derive_more::Into)]
pub struct HexPayload {
    payload: Vec<u8>,
}

impl FromStr for HexPayload {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payload = parse_hex(value)?;
        Ok(Self { payload })
    }
}

/// Parsed fake notification payload fixtures.
#[derive(Debug, Clone, Default, derive_more::Into)]
pub struct NotificationPayloads {
    payloads: Vec<Vec<u8>>,
}

impl FromStr for NotificationPayloads {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payloads = parse_notifications(value)?;
        Ok(Self { payloads })
    }
}

/// Script for a [`FakePlatform`] that answers commands with callbacks.
#[derive(Debug, Clone, Builder)]
pub struct FakePlatformConfig {
    /// Peripherals reported while scanning, in advertisement order.
    #[builder(default)]
    peripherals: ScanFixture,
    /// Times each peripheral is re-advertised per scan.
    #[builder(default = DEFAULT_ADVERTISEMENT_REPEATS)]
    advertisement_repeats: usize,
    #[builder(default = status::GATT_SUCCESS)]
    connect_status: i32,
    #[builder(default = status::GATT_SUCCESS)]
    discovery_status: i32,
    #[builder(default = status::GATT_SUCCESS)]
    descriptor_status: i32,
    /// Payloads pushed as change callbacks once notifications are registered.
    #[builder(default)]
    notifications: NotificationPayloads,
    read_value: Option<HexPayload>,
    #[builder(default = default_services())]
    services: Vec<ServiceInfo>,
    #[builder(default = CacheInvalidation::Invalidated)]
    cache_invalidation: CacheInvalidation,
}

/// Fake platform commands that can be made to fail synchronously.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FakeOperation {
    StartScan,
    StopScan,
    Connect,
    DiscoverServices,
    SetCharacteristicNotification,
    WriteDescriptor,
    WriteCharacteristic,
    ReadCharacteristic,
    Disconnect,
}

/// A command received by the fake platform, in call order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PlatformCall {
    StartScan {
        service_filter: Uuid,
        settings: ScanSettings,
    },
    StopScan,
    Connect {
        address: PeripheralAddress,
        link: LinkId,
        auto_connect: bool,
    },
    DiscoverServices {
        address: PeripheralAddress,
    },
    SetCharacteristicNotification {
        address: PeripheralAddress,
        characteristic: CharacteristicPath,
        enabled: bool,
    },
    WriteDescriptor {
        address: PeripheralAddress,
        characteristic: CharacteristicPath,
        descriptor: Uuid,
        value: Vec<u8>,
    },
    WriteCharacteristic {
        address: PeripheralAddress,
        characteristic: CharacteristicPath,
        value: Vec<u8>,
        mode: WriteMode,
    },
    ReadCharacteristic {
        address: PeripheralAddress,
        characteristic: CharacteristicPath,
    },
    Disconnect {
        address: PeripheralAddress,
    },
    Close {
        address: PeripheralAddress,
    },
    InvalidateCache {
        address: PeripheralAddress,
    },
}

#[derive(Debug)]
struct FakeState {
    adapter_enabled: bool,
    calls: Vec<PlatformCall>,
    refused: HashSet<FakeOperation>,
    links: HashMap<PeripheralAddress, LinkId>,
}

/// In-memory platform for tests and `--fake` runs.
///
/// A manual fake only records calls; tests feed callbacks through
/// [`crate::BleCentral::handle_platform_event`] themselves. A scripted fake
/// answers each accepted command by queueing callbacks on its sink.
#[derive(Debug)]
pub struct FakePlatform {
    script: Option<(FakePlatformConfig, PlatformEventSink)>,
    state: Mutex<FakeState>,
}

impl FakePlatform {
    /// Creates a fake that records calls and never raises callbacks.
    #[must_use]
    pub fn manual() -> Self {
        Self::with_script(None)
    }

    /// Creates a fake that answers commands according to `config`.
    #[must_use]
    pub fn scripted(config: FakePlatformConfig, sink: PlatformEventSink) -> Self {
        Self::with_script(Some((config, sink)))
    }

    fn with_script(script: Option<(FakePlatformConfig, PlatformEventSink)>) -> Self {
        Self {
            script,
            state: Mutex::new(FakeState {
                adapter_enabled: true,
                calls: Vec::new(),
                refused: HashSet::new(),
                links: HashMap::new(),
            }),
        }
    }

    /// Makes every later call of `operation` fail synchronously.
    pub fn refuse(&self, operation: FakeOperation) {
        self.state().refused.insert(operation);
    }

    pub fn set_adapter_enabled(&self, enabled: bool) {
        self.state().adapter_enabled = enabled;
    }

    /// Returns the link the last accepted `connect` opened for `address`, until it is closed.
    #[must_use]
    pub fn link(&self, address: &PeripheralAddress) -> Option<LinkId> {
        self.state().links.get(address).copied()
    }

    /// Returns every command received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state().calls.clone()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, operation: Option<FakeOperation>, call: PlatformCall) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.calls.push(call);
        match operation {
            Some(operation) if state.refused.contains(&operation) => {
                debug!(%operation, "fake platform refusing command");
                Err(PlatformError::Refused {
                    reason: format!("{operation} refused by fake platform"),
                })
            }
            _ => Ok(()),
        }
    }

    fn respond<F>(&self, events: F)
    where
        F: FnOnce(&FakePlatformConfig) -> Vec<PlatformEvent>,
    {
        let Some((config, sink)) = &self.script else {
            return;
        };
        for event in events(config) {
            if !sink.deliver(event) {
                break;
            }
        }
    }

    /// Answers a command on the link currently open for `address`, if any.
    fn respond_on_link<F>(&self, address: &PeripheralAddress, events: F)
    where
        F: FnOnce(&FakePlatformConfig, LinkId) -> Vec<PlatformEvent>,
    {
        let Some(link) = self.link(address) else {
            debug!(%address, "no open link; fake platform stays silent");
            return;
        };
        self.respond(|config| events(config, link));
    }
}

impl BlePlatform for FakePlatform {
    fn adapter_enabled(&self) -> bool {
        self.state().adapter_enabled
    }

    #[instrument(skip(self, settings), level = "trace")]
    fn start_scan(&self, service_filter: Uuid, settings: &ScanSettings) -> Result<(), PlatformError> {
        self.record(
            Some(FakeOperation::StartScan),
            PlatformCall::StartScan {
                service_filter,
                settings: *settings,
            },
        )?;
        let batched = !settings.report_delay().is_zero();
        self.respond(|config| {
            let records: Vec<ScanRecord> = config
                .peripherals
                .records
                .iter()
                .map(|record| advertise_service(record, service_filter))
                .collect();
            if batched {
                return vec![PlatformEvent::BatchScanResults { records }];
            }
            (0..config.advertisement_repeats)
                .flat_map(|_round| records.iter().cloned().map(PlatformEvent::ScanResult))
                .collect()
        });
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), PlatformError> {
        self.record(Some(FakeOperation::StopScan), PlatformCall::StopScan)
    }

    #[instrument(skip(self), level = "trace", fields(%address))]
    fn connect(
        &self,
        address: &PeripheralAddress,
        link: LinkId,
        auto_connect: bool,
    ) -> Result<(), PlatformError> {
        self.record(
            Some(FakeOperation::Connect),
            PlatformCall::Connect {
                address: address.clone(),
                link,
                auto_connect,
            },
        )?;
        self.state().links.insert(address.clone(), link);
        self.respond(|config| {
            let new_state = if config.connect_status == status::GATT_SUCCESS {
                LinkState::Connected
            } else {
                LinkState::Disconnected
            };
            vec![PlatformEvent::ConnectionStateChanged {
                address: address.clone(),
                link,
                status: config.connect_status,
                new_state,
            }]
        });
        Ok(())
    }

    fn discover_services(&self, address: &PeripheralAddress) -> Result<(), PlatformError> {
        self.record(
            Some(FakeOperation::DiscoverServices),
            PlatformCall::DiscoverServices {
                address: address.clone(),
            },
        )?;
        self.respond_on_link(address, |config, link| {
            vec![PlatformEvent::ServicesDiscovered {
                address: address.clone(),
                link,
                status: config.discovery_status,
                services: config.services.clone(),
            }]
        });
        Ok(())
    }

    fn set_characteristic_notification(
        &self,
        address: &PeripheralAddress,
        characteristic: &CharacteristicPath,
        enabled: bool,
    ) -> Result<(), PlatformError> {
        self.record(
            Some(FakeOperation::SetCharacteristicNotification),
            PlatformCall::SetCharacteristicNotification {
                address: address.clone(),
                characteristic: *characteristic,
                enabled,
            },
        )?;
        if enabled {
            self.respond_on_link(address, |config, link| {
                config
                    .notifications
                    .payloads
                    .iter()
                    .map(|value| PlatformEvent::CharacteristicChanged {
                        address: address.clone(),
                        link,
                        characteristic: *characteristic,
                        value: value.clone(),
                    })
                    .collect()
            });
        }
        Ok(())
    }

    fn write_descriptor(
        &self,
        address: &PeripheralAddress,
        characteristic: &CharacteristicPath,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError> {
        self.record(
            Some(FakeOperation::WriteDescriptor),
            PlatformCall::WriteDescriptor {
                address: address.clone(),
                characteristic: *characteristic,
                descriptor,
                value: value.to_vec(),
            },
        )?;
        self.respond_on_link(address, |config, link| {
            vec![PlatformEvent::DescriptorWritten {
                address: address.clone(),
                link,
                characteristic: *characteristic,
                descriptor,
                status: config.descriptor_status,
            }]
        });
        Ok(())
    }

    fn write_characteristic(
        &self,
        address: &PeripheralAddress,
        characteristic: &CharacteristicPath,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), PlatformError> {
        self.record(
            Some(FakeOperation::WriteCharacteristic),
            PlatformCall::WriteCharacteristic {
                address: address.clone(),
                characteristic: *characteristic,
                value: value.to_vec(),
                mode,
            },
        )?;
        self.respond_on_link(address, |_config, link| {
            vec![PlatformEvent::CharacteristicWritten {
                address: address.clone(),
                link,
                characteristic: *characteristic,
                status: status::GATT_SUCCESS,
            }]
        });
        Ok(())
    }

    fn read_characteristic(
        &self,
        address: &PeripheralAddress,
        characteristic: &CharacteristicPath,
    ) -> Result<(), PlatformError> {
        self.record(
            Some(FakeOperation::ReadCharacteristic),
            PlatformCall::ReadCharacteristic {
                address: address.clone(),
                characteristic: *characteristic,
            },
        )?;
        self.respond_on_link(address, |config, link| {
            let value = config
                .read_value
                .clone()
                .map_or_else(|| DEFAULT_READ_VALUE.to_vec(), Into::into);
            vec![PlatformEvent::CharacteristicRead {
                address: address.clone(),
                link,
                characteristic: *characteristic,
                status: status::GATT_SUCCESS,
                value,
            }]
        });
        Ok(())
    }

    fn disconnect(&self, address: &PeripheralAddress) -> Result<(), PlatformError> {
        self.record(
            Some(FakeOperation::Disconnect),
            PlatformCall::Disconnect {
                address: address.clone(),
            },
        )?;
        self.respond_on_link(address, |_config, link| {
            vec![PlatformEvent::ConnectionStateChanged {
                address: address.clone(),
                link,
                status: status::GATT_SUCCESS,
                new_state: LinkState::Disconnected,
            }]
        });
        Ok(())
    }

    fn close(&self, address: &PeripheralAddress) {
        let _accepted = self.record(
            None,
            PlatformCall::Close {
                address: address.clone(),
            },
        );
        self.state().links.remove(address);
    }

    fn invalidate_cache(&self, address: &PeripheralAddress) -> CacheInvalidation {
        let _accepted = self.record(
            None,
            PlatformCall::InvalidateCache {
                address: address.clone(),
            },
        );
        self.script
            .as_ref()
            .map_or(CacheInvalidation::Invalidated, |(config, _sink)| {
                config.cache_invalidation
            })
    }
}

/// Returns the GATT table every scripted fake peripheral exposes.
#[must_use]
pub fn default_services() -> Vec<ServiceInfo> {
    vec![ServiceInfo::new(
        FAKE_SERVICE,
        true,
        vec![
            CharacteristicInfo::new(
                FAKE_NOTIFY_CHARACTERISTIC,
                vec![CharacteristicProperty::Read, CharacteristicProperty::Notify],
                vec![CLIENT_CHARACTERISTIC_CONFIGURATION],
            ),
            CharacteristicInfo::new(
                FAKE_WRITE_CHARACTERISTIC,
                vec![
                    CharacteristicProperty::Write,
                    CharacteristicProperty::WriteWithoutResponse,
                ],
                Vec::new(),
            ),
        ],
    )]
}

fn advertise_service(record: &ScanRecord, service: Uuid) -> ScanRecord {
    let advertisement = record.advertisement();
    ScanRecord::new(
        record.address().clone(),
        Advertisement::builder()
            .maybe_local_name(advertisement.local_name().map(str::to_string))
            .maybe_rssi(advertisement.rssi())
            .service_uuids(vec![service])
            .build(),
    )
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<ScanRecord>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .map(parse_scan_record)
        .collect::<Result<Vec<_>, _>>()
}

fn parse_scan_record(raw_record: &str) -> Result<ScanRecord, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    let [address, local_name, rssi] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if address.is_empty() || local_name.is_empty() || rssi.is_empty() {
        return Err(FixtureError::EmptyRecordField);
    }

    let local_name = (*local_name != "-").then(|| (*local_name).to_string());
    let rssi = if *rssi == "-" {
        None
    } else {
        Some(rssi.parse::<i16>()?)
    };

    Ok(ScanRecord::new(
        PeripheralAddress::new(address),
        Advertisement::builder()
            .maybe_local_name(local_name)
            .maybe_rssi(rssi)
            .build(),
    ))
}

/// Comma-separated payloads; an empty segment is an empty payload.
fn parse_notifications(raw_value: &str) -> Result<Vec<Vec<u8>>, FixtureError> {
    if raw_value.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw_value.split(',').map(parse_hex).collect()
}

fn parse_hex(raw_value: &str) -> Result<Vec<u8>, FixtureError> {
    let cleaned: String = raw_value.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
        .unwrap_or(&cleaned);
    Ok(hex::decode(digits)?)
}
