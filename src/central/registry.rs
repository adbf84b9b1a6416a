use std::collections::HashSet;

use crate::hw::{PeripheralAddress, ScanRecord};

/// Deduplicated, insertion-ordered record of peripherals seen by one scan session.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<ScanRecord>,
    seen: HashSet<PeripheralAddress>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sighting and returns `true` only for the first sighting of its address.
    pub fn insert(&mut self, record: &ScanRecord) -> bool {
        if !self.seen.insert(record.address().clone()) {
            return false;
        }

        self.devices.push(record.clone());
        true
    }

    /// Returns first sightings in discovery order.
    #[must_use]
    pub fn devices(&self) -> &[ScanRecord] {
        &self.devices
    }

    #[must_use]
    pub fn contains(&self, address: &PeripheralAddress) -> bool {
        self.seen.contains(address)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn reset(&mut self) {
        self.devices.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::hw::Advertisement;

    fn record(address: &str, rssi: i16) -> ScanRecord {
        ScanRecord::new(
            PeripheralAddress::new(address),
            Advertisement::builder().rssi(rssi).build(),
        )
    }

    #[rstest]
    #[case(&["AA:AA", "BB:BB", "AA:AA"], &["AA:AA", "BB:BB"])]
    #[case(&["CC:CC", "CC:CC", "CC:CC"], &["CC:CC"])]
    #[case(&["BB:BB", "aa:aa", "AA:AA", "BB:BB", "DD:DD"], &["BB:BB", "AA:AA", "DD:DD"])]
    fn registry_keeps_first_sighting_order(#[case] sightings: &[&str], #[case] expected: &[&str]) {
        let mut registry = DeviceRegistry::new();
        for address in sightings {
            registry.insert(&record(address, -60));
        }

        let addresses: Vec<&str> = registry
            .devices()
            .iter()
            .map(|record| record.address().as_str())
            .collect();
        assert_eq!(expected, addresses.as_slice());
    }

    #[test]
    fn repeat_sighting_keeps_first_advertisement() {
        let mut registry = DeviceRegistry::new();

        assert!(registry.insert(&record("AA:AA", -40)));
        assert!(!registry.insert(&record("AA:AA", -90)));
        assert_eq!(Some(-40), registry.devices()[0].advertisement().rssi());
    }

    #[test]
    fn reset_forgets_previous_session() {
        let mut registry = DeviceRegistry::new();
        registry.insert(&record("AA:AA", -40));

        registry.reset();

        assert!(registry.is_empty());
        assert!(!registry.contains(&PeripheralAddress::new("AA:AA")));
        assert!(registry.insert(&record("AA:AA", -40)));
    }
}
