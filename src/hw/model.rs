use std::collections::BTreeMap;
use std::str::FromStr;

use bon::Builder;
use serde::Serialize;
use serde_with::{hex::Hex, serde_as};
use strum_macros::Display;
use uuid::Uuid;

use crate::error::AddressError;

/// Normalised hardware address identifying one physical peripheral.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, derive_more::Display, Serialize)]
#[serde(transparent)]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    /// Creates an address, trimming whitespace and upper-casing hex digits.
    #[must_use]
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_ascii_uppercase())
    }

    /// Returns the normalised address text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeripheralAddress {
    type Err = AddressError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Err(AddressError::Empty);
        }
        Ok(Self::new(value))
    }
}

impl From<&str> for PeripheralAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Advertisement data observed for a peripheral during a scan.
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Default, Serialize, Builder)]
pub struct Advertisement {
    local_name: Option<String>,
    rssi: Option<i16>,
    #[builder(default)]
    service_uuids: Vec<Uuid>,
    #[serde_as(as = "BTreeMap<_, Hex>")]
    #[builder(default)]
    manufacturer_data: BTreeMap<u16, Vec<u8>>,
    #[serde_as(as = "BTreeMap<_, Hex>")]
    #[builder(default)]
    service_data: BTreeMap<Uuid, Vec<u8>>,
}

impl Advertisement {
    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Returns the received signal strength, if reported.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// Returns advertised service UUIDs.
    #[must_use]
    pub fn service_uuids(&self) -> &[Uuid] {
        &self.service_uuids
    }

    /// Returns manufacturer-specific data keyed by company identifier.
    #[must_use]
    pub fn manufacturer_data(&self) -> &BTreeMap<u16, Vec<u8>> {
        &self.manufacturer_data
    }

    /// Returns service data keyed by service UUID.
    #[must_use]
    pub fn service_data(&self) -> &BTreeMap<Uuid, Vec<u8>> {
        &self.service_data
    }

    /// Returns whether the advertisement lists a service, either as a UUID or as service data.
    #[must_use]
    pub fn advertises_service(&self, service: Uuid) -> bool {
        self.service_uuids.contains(&service) || self.service_data.contains_key(&service)
    }
}

/// One advertisement sighting keyed by peripheral address.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ScanRecord {
    address: PeripheralAddress,
    advertisement: Advertisement,
}

impl ScanRecord {
    /// Creates a scan record.
    #[must_use]
    pub fn new(address: PeripheralAddress, advertisement: Advertisement) -> Self {
        Self {
            address,
            advertisement,
        }
    }

    /// Returns the peripheral address.
    #[must_use]
    pub fn address(&self) -> &PeripheralAddress {
        &self.address
    }

    /// Returns the raw advertisement.
    #[must_use]
    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }
}

/// GATT characteristic property flags.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CharacteristicProperty {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrites,
}

/// A characteristic description discovered on a connected peripheral.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct CharacteristicInfo {
    uuid: Uuid,
    properties: Vec<CharacteristicProperty>,
    descriptors: Vec<Uuid>,
}

impl CharacteristicInfo {
    /// Creates a characteristic description.
    #[must_use]
    pub fn new(uuid: Uuid, properties: Vec<CharacteristicProperty>, descriptors: Vec<Uuid>) -> Self {
        Self {
            uuid,
            properties,
            descriptors,
        }
    }

    /// Returns the characteristic UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns property flags for this characteristic.
    #[must_use]
    pub fn properties(&self) -> &[CharacteristicProperty] {
        &self.properties
    }

    /// Returns descriptor UUIDs attached to this characteristic.
    #[must_use]
    pub fn descriptors(&self) -> &[Uuid] {
        &self.descriptors
    }

    /// Returns whether a property flag is set.
    #[must_use]
    pub fn has_property(&self, property: CharacteristicProperty) -> bool {
        self.properties.contains(&property)
    }

    /// Returns whether the characteristic accepts either write type.
    #[must_use]
    pub fn supports_write(&self) -> bool {
        self.has_property(CharacteristicProperty::Write)
            || self.has_property(CharacteristicProperty::WriteWithoutResponse)
    }
}

/// A GATT service with discovered characteristics.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ServiceInfo {
    uuid: Uuid,
    primary: bool,
    characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    /// Creates a service description.
    #[must_use]
    pub fn new(uuid: Uuid, primary: bool, characteristics: Vec<CharacteristicInfo>) -> Self {
        Self {
            uuid,
            primary,
            characteristics,
        }
    }

    /// Returns the service UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns whether this is a primary service.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Returns all characteristics in this service.
    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicInfo] {
        &self.characteristics
    }

    /// Looks up one characteristic by UUID.
    #[must_use]
    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicInfo> {
        self.characteristics
            .iter()
            .find(|characteristic| characteristic.uuid == uuid)
    }
}

pub(crate) fn find_service(services: &[ServiceInfo], uuid: Uuid) -> Option<&ServiceInfo> {
    services.iter().find(|service| service.uuid == uuid)
}
