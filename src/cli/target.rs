use std::time::Duration;

use clap::Args;
use uuid::Uuid;

use crate::hw::PeripheralAddress;
use crate::utils::parse_uuid;

use super::command::parse_duration;

const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Peripheral and characteristic addressed by `listen`, `write`, and `read`.
#[derive(Debug, Args)]
pub(crate) struct TargetArgs {
    /// Peripheral address as printed by `scan`.
    #[arg(long)]
    address: PeripheralAddress,
    /// Service UUID; 16-bit forms such as `fff0` are accepted.
    #[arg(long, value_parser = parse_uuid)]
    service: Uuid,
    /// Characteristic UUID within the service.
    #[arg(long, value_parser = parse_uuid)]
    characteristic: Uuid,
    /// How long to scan for the peripheral before connecting.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    scan_timeout: Duration,
}

impl TargetArgs {
    pub(crate) fn new(address: PeripheralAddress, service: Uuid, characteristic: Uuid) -> Self {
        Self {
            address,
            service,
            characteristic,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }

    pub(crate) fn address(&self) -> &PeripheralAddress {
        &self.address
    }

    pub(crate) fn service(&self) -> Uuid {
        self.service
    }

    pub(crate) fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    pub(crate) fn scan_timeout(&self) -> Duration {
        self.scan_timeout
    }
}
