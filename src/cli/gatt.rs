use std::io;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use serde_with::{hex::Hex, serde_as};
use tracing::instrument;
use uuid::Uuid;

use crate::app::{ConnectedPeripheral, SessionHandler};
use crate::central::BleCentral;
use crate::hw::{HexPayload, PeripheralAddress, WriteMode};

use super::output::Output;
use super::target::TargetArgs;
use super::ui::{GattOutcomeView, Painter};

/// Arguments for the `write` command.
#[derive(Debug, Args)]
pub struct WriteArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Bytes to write as hexadecimal, for example `0x0102`.
    #[arg(long)]
    value: HexPayload,
    /// Write without waiting for the peripheral to acknowledge.
    #[arg(long)]
    without_response: bool,
}

impl WriteArgs {
    #[must_use]
    pub fn new(
        address: PeripheralAddress,
        service: Uuid,
        characteristic: Uuid,
        value: HexPayload,
    ) -> Self {
        Self {
            target: TargetArgs::new(address, service, characteristic),
            value,
            without_response: false,
        }
    }

    #[must_use]
    pub fn without_response(mut self) -> Self {
        self.without_response = true;
        self
    }

    fn mode(&self) -> WriteMode {
        if self.without_response {
            WriteMode::WithoutResponse
        } else {
            WriteMode::WithResponse
        }
    }
}

/// Arguments for the `read` command.
#[derive(Debug, Args)]
pub struct ReadArgs {
    #[command(flatten)]
    target: TargetArgs,
}

impl ReadArgs {
    #[must_use]
    pub fn new(address: PeripheralAddress, service: Uuid, characteristic: Uuid) -> Self {
        Self {
            target: TargetArgs::new(address, service, characteristic),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum GattOperation {
    Write,
    Read,
}

/// Result record of a one-shot characteristic write or read.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub(crate) struct GattOutcome {
    operation: GattOperation,
    address: PeripheralAddress,
    service: Uuid,
    characteristic: Uuid,
    #[serde_as(as = "Hex")]
    value: Vec<u8>,
}

impl GattOutcome {
    pub(crate) fn new(
        operation: GattOperation,
        address: PeripheralAddress,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    ) -> Self {
        Self {
            operation,
            address,
            service,
            characteristic,
            value,
        }
    }

    pub(crate) fn operation(&self) -> GattOperation {
        self.operation
    }

    pub(crate) fn address(&self) -> &PeripheralAddress {
        &self.address
    }

    pub(crate) fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    pub(crate) fn value(&self) -> &[u8] {
        &self.value
    }
}

/// Executes the `write` command.
#[instrument(skip_all, level = "info", fields(address = %args.target.address()))]
pub(crate) async fn run_write<W>(
    central: &BleCentral,
    args: &WriteArgs,
    output: &mut Output<'_, W>,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    let peripheral = connect(central, &args.target).await?;
    let write_result = write(&peripheral, args).await;
    peripheral.close();

    let outcome = write_result?;
    output.record(&outcome, GattOutcomeView::new(&outcome, painter))
}

/// Executes the `read` command.
#[instrument(skip_all, level = "info", fields(address = %args.target.address()))]
pub(crate) async fn run_read<W>(
    central: &BleCentral,
    args: &ReadArgs,
    output: &mut Output<'_, W>,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    let peripheral = connect(central, &args.target).await?;
    let read_result = read(&peripheral, &args.target).await;
    peripheral.close();

    let outcome = read_result?;
    output.record(&outcome, GattOutcomeView::new(&outcome, painter))
}

async fn connect(central: &BleCentral, target: &TargetArgs) -> Result<ConnectedPeripheral> {
    let peripheral = SessionHandler::new(central.clone())
        .with_scan_timeout(target.scan_timeout())
        .connect(target.address(), target.service())
        .await?;
    Ok(peripheral)
}

async fn write(peripheral: &ConnectedPeripheral, args: &WriteArgs) -> Result<GattOutcome> {
    let target = &args.target;
    let central = peripheral.central();
    central.discover_services(peripheral.handle()).await?;

    let value: Vec<u8> = args.value.clone().into();
    central
        .write_characteristic(
            peripheral.handle(),
            target.service(),
            target.characteristic(),
            &value,
            args.mode(),
        )
        .await?;

    Ok(GattOutcome::new(
        GattOperation::Write,
        target.address().clone(),
        target.service(),
        target.characteristic(),
        value,
    ))
}

async fn read(peripheral: &ConnectedPeripheral, target: &TargetArgs) -> Result<GattOutcome> {
    let central = peripheral.central();
    central.discover_services(peripheral.handle()).await?;

    let value = central
        .read_characteristic(peripheral.handle(), target.service(), target.characteristic())
        .await?;

    Ok(GattOutcome::new(
        GattOperation::Read,
        target.address().clone(),
        target.service(),
        target.characteristic(),
        value,
    ))
}
