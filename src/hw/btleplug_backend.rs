use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::model::{
    Advertisement, CharacteristicInfo, CharacteristicProperty, PeripheralAddress, ScanRecord,
    ServiceInfo,
};
use super::platform::{
    BlePlatform, CharacteristicPath, LinkId, LinkState, PlatformEvent, PlatformEventSink,
    ScanSettings, WriteMode,
};
use crate::error::{InteractionError, PlatformError};
use crate::protocol::{CLIENT_CHARACTERISTIC_CONFIGURATION, scan_error, status};

const MIN_BATCH_INTERVAL: Duration = Duration::from_millis(10);

type PeripheralMap = Arc<Mutex<HashMap<PeripheralAddress, Peripheral>>>;
/// Links the command worker currently holds open, by address.
type LinkMap = Arc<Mutex<HashMap<PeripheralAddress, LinkId>>>;

/// Platform binding backed by the first `btleplug` adapter.
///
/// Commands are queued to a single worker task so GATT operations reach the
/// radio one at a time and in call order. Outcomes come back as
/// [`PlatformEvent`]s on the sink.
#[derive(Debug)]
pub(crate) struct BtleplugPlatform {
    adapter: Adapter,
    runtime: Handle,
    sink: PlatformEventSink,
    peripherals: PeripheralMap,
    commands: mpsc::UnboundedSender<GattCommand>,
    scan: Mutex<Option<ScanTask>>,
    powered: Arc<AtomicBool>,
}

#[derive(Debug)]
struct ScanTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Debug)]
enum GattCommand {
    Connect {
        address: PeripheralAddress,
        link: LinkId,
        peripheral: Peripheral,
    },
    DiscoverServices {
        address: PeripheralAddress,
        peripheral: Peripheral,
    },
    SetNotification {
        address: PeripheralAddress,
        peripheral: Peripheral,
        path: CharacteristicPath,
        enabled: bool,
    },
    WriteDescriptor {
        address: PeripheralAddress,
        peripheral: Peripheral,
        path: CharacteristicPath,
        descriptor: Uuid,
        value: Vec<u8>,
    },
    WriteCharacteristic {
        address: PeripheralAddress,
        peripheral: Peripheral,
        path: CharacteristicPath,
        value: Vec<u8>,
        mode: WriteMode,
    },
    ReadCharacteristic {
        address: PeripheralAddress,
        peripheral: Peripheral,
        path: CharacteristicPath,
    },
    Disconnect {
        address: PeripheralAddress,
        peripheral: Peripheral,
    },
    Close {
        address: PeripheralAddress,
    },
}

impl BtleplugPlatform {
    /// Opens the first adapter and starts the command worker and adapter watcher.
    ///
    /// Must be called inside a tokio runtime.
    #[instrument(skip(sink), level = "debug")]
    pub(crate) async fn new(sink: PlatformEventSink) -> Result<Self, InteractionError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(InteractionError::NoAdapters)?;
        info!(adapter = %adapter.adapter_info().await?, "using BLE adapter");

        let powered = match adapter.adapter_state().await {
            Ok(state) => state != CentralState::PoweredOff,
            Err(error) => {
                debug!(?error, "adapter state unavailable, assuming powered");
                true
            }
        };
        let powered = Arc::new(AtomicBool::new(powered));
        let peripherals = PeripheralMap::default();
        let links = LinkMap::default();

        let (commands, queue) = mpsc::unbounded_channel();
        let worker = GattWorker {
            sink: sink.clone(),
            links: Arc::clone(&links),
            pumps: HashMap::new(),
            deferred_configuration: HashMap::new(),
        };
        tokio::spawn(worker.run(queue));
        tokio::spawn(watch_adapter(
            adapter.clone(),
            sink.clone(),
            links,
            Arc::clone(&powered),
        ));

        Ok(Self {
            adapter,
            runtime: Handle::current(),
            sink,
            peripherals,
            commands,
            scan: Mutex::new(None),
            powered,
        })
    }

    fn scan_task(&self) -> MutexGuard<'_, Option<ScanTask>> {
        self.scan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peripheral(&self, address: &PeripheralAddress) -> Result<Peripheral, PlatformError> {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
            .ok_or_else(|| PlatformError::UnknownPeripheral {
                address: address.clone(),
            })
    }

    fn enqueue(&self, command: GattCommand) -> Result<(), PlatformError> {
        self.commands
            .send(command)
            .map_err(|_error| PlatformError::AdapterUnavailable)
    }
}

impl BlePlatform for BtleplugPlatform {
    fn adapter_enabled(&self) -> bool {
        self.powered.load(Ordering::Relaxed) && !self.commands.is_closed()
    }

    #[instrument(skip(self, settings), level = "debug", fields(%service_filter))]
    fn start_scan(&self, service_filter: Uuid, settings: &ScanSettings) -> Result<(), PlatformError> {
        if settings.mode() != ScanSettings::default().mode()
            || settings.match_mode() != ScanSettings::default().match_mode()
        {
            debug!(mode = %settings.mode(), match_mode = %settings.match_mode(), "scan tuning is not supported by this adapter");
        }

        let cancel = CancellationToken::new();
        let mut current = self.scan_task();
        let previous = current.take().map(|previous| {
            previous.cancel.cancel();
            previous.task
        });
        let task = self.runtime.spawn(run_scan(
            ScanContext {
                adapter: self.adapter.clone(),
                sink: self.sink.clone(),
                peripherals: Arc::clone(&self.peripherals),
                service_filter,
                report_delay: settings.report_delay(),
            },
            previous,
            cancel.clone(),
        ));
        *current = Some(ScanTask { cancel, task });
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), PlatformError> {
        if let Some(scan) = self.scan_task().as_ref() {
            scan.cancel.cancel();
        }
        Ok(())
    }

    fn connect(
        &self,
        address: &PeripheralAddress,
        link: LinkId,
        auto_connect: bool,
    ) -> Result<(), PlatformError> {
        if auto_connect {
            debug!(%address, "auto-connect is not supported by this adapter; connecting directly");
        }
        let peripheral = self.peripheral(address)?;
        self.enqueue(GattCommand::Connect {
            address: address.clone(),
            link,
            peripheral,
        })
    }

    fn discover_services(&self, address: &PeripheralAddress) -> Result<(), PlatformError> {
        let peripheral = self.peripheral(address)?;
        self.enqueue(GattCommand::DiscoverServices {
            address: address.clone(),
            peripheral,
        })
    }

    fn set_characteristic_notification(
        &self,
        address: &PeripheralAddress,
        characteristic: &CharacteristicPath,
        enabled: bool,
    ) -> Result<(), PlatformError> {
        let peripheral = self.peripheral(address)?;
        self.enqueue(GattCommand::SetNotification {
            address: address.clone(),
            peripheral,
            path: *characteristic,
            enabled,
        })
    }

    fn write_descriptor(
        &self,
        address: &PeripheralAddress,
        characteristic: &CharacteristicPath,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), PlatformError> {
        let peripheral = self.peripheral(address)?;
        self.enqueue(GattCommand::WriteDescriptor {
            address: address.clone(),
            peripheral,
            path: *characteristic,
            descriptor,
            value: value.to_vec(),
        })
    }

    fn write_characteristic(
        &self,
        address: &PeripheralAddress,
        characteristic: &CharacteristicPath,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), PlatformError> {
        let peripheral = self.peripheral(address)?;
        self.enqueue(GattCommand::WriteCharacteristic {
            address: address.clone(),
            peripheral,
            path: *characteristic,
            value: value.to_vec(),
            mode,
        })
    }

    fn read_characteristic(
        &self,
        address: &PeripheralAddress,
        characteristic: &CharacteristicPath,
    ) -> Result<(), PlatformError> {
        let peripheral = self.peripheral(address)?;
        self.enqueue(GattCommand::ReadCharacteristic {
            address: address.clone(),
            peripheral,
            path: *characteristic,
        })
    }

    fn disconnect(&self, address: &PeripheralAddress) -> Result<(), PlatformError> {
        let peripheral = self.peripheral(address)?;
        self.enqueue(GattCommand::Disconnect {
            address: address.clone(),
            peripheral,
        })
    }

    fn close(&self, address: &PeripheralAddress) {
        if self
            .enqueue(GattCommand::Close {
                address: address.clone(),
            })
            .is_err()
        {
            trace!(%address, "command worker gone; nothing to close");
        }
    }
}

#[derive(Debug)]
struct ScanContext {
    adapter: Adapter,
    sink: PlatformEventSink,
    peripherals: PeripheralMap,
    service_filter: Uuid,
    report_delay: Duration,
}

#[instrument(skip_all, level = "debug", fields(service = %context.service_filter))]
async fn run_scan(
    context: ScanContext,
    previous: Option<JoinHandle<()>>,
    cancel: CancellationToken,
) {
    if let Some(previous) = previous
        && let Err(error) = previous.await
    {
        debug!(?error, "previous scan task ended abnormally");
    }

    let mut events = match context.adapter.events().await {
        Ok(events) => events,
        Err(error) => {
            warn!(?error, "failed to open adapter event stream");
            context.sink.deliver(PlatformEvent::ScanFailed {
                error_code: scan_error::INTERNAL_ERROR,
            });
            return;
        }
    };
    let filter = ScanFilter {
        services: vec![context.service_filter],
    };
    if let Err(error) = context.adapter.start_scan(filter).await {
        warn!(?error, "adapter refused to start scanning");
        context.sink.deliver(PlatformEvent::ScanFailed {
            error_code: scan_failure_code(&error),
        });
        return;
    }
    info!("scanning");

    let batching = !context.report_delay.is_zero();
    let mut flush = tokio::time::interval(context.report_delay.max(MIN_BATCH_INTERVAL));
    let mut batch: Vec<ScanRecord> = Vec::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = flush.tick(), if batching => {
                if !batch.is_empty() {
                    context.sink.deliver(PlatformEvent::BatchScanResults {
                        records: std::mem::take(&mut batch),
                    });
                }
            }
            event = events.next() => {
                let Some(event) = event else {
                    debug!("adapter event stream closed");
                    break;
                };
                let id = match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ServicesAdvertisement { id, .. }
                    | CentralEvent::ServiceDataAdvertisement { id, .. }
                    | CentralEvent::ManufacturerDataAdvertisement { id, .. } => id,
                    _ => continue,
                };
                let Some(record) = sighting(&context, &id).await else {
                    continue;
                };
                if batching {
                    batch.push(record);
                } else {
                    context.sink.deliver(PlatformEvent::ScanResult(record));
                }
            }
        }
    }

    if let Err(error) = context.adapter.stop_scan().await {
        debug!(?error, "failed to stop adapter scan cleanly");
    }
    info!("scan stopped");
}

async fn sighting(context: &ScanContext, id: &PeripheralId) -> Option<ScanRecord> {
    let peripheral = match context.adapter.peripheral(id).await {
        Ok(peripheral) => peripheral,
        Err(error) => {
            trace!(?error, "sighted peripheral vanished");
            return None;
        }
    };
    let properties = match peripheral.properties().await {
        Ok(Some(properties)) => properties,
        Ok(None) => return None,
        Err(error) => {
            trace!(?error, "failed to read advertisement properties");
            return None;
        }
    };

    let record = scan_record_from_properties(&peripheral.id(), properties);
    if !record
        .advertisement()
        .advertises_service(context.service_filter)
    {
        return None;
    }
    context
        .peripherals
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(record.address().clone(), peripheral);
    Some(record)
}

/// Reports link loss and adapter power changes for the lifetime of the binding.
///
/// Only links the worker still holds open are reported, so the disconnect a
/// close requested never surfaces as link loss.
async fn watch_adapter(
    adapter: Adapter,
    sink: PlatformEventSink,
    links: LinkMap,
    powered: Arc<AtomicBool>,
) {
    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(error) => {
            warn!(?error, "failed to watch adapter events");
            return;
        }
    };

    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDisconnected(id) => {
                let address = address_for_id(&id);
                if let Some(link) = release_link(&links, &address) {
                    debug!(%address, %link, "link lost");
                    let delivered = sink.deliver(PlatformEvent::ConnectionStateChanged {
                        address,
                        link,
                        status: status::GATT_SUCCESS,
                        new_state: LinkState::Disconnected,
                    });
                    if !delivered {
                        break;
                    }
                }
            }
            CentralEvent::StateUpdate(state) => {
                debug!(?state, "adapter state changed");
                powered.store(state != CentralState::PoweredOff, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

#[derive(Debug)]
struct GattWorker {
    sink: PlatformEventSink,
    links: LinkMap,
    pumps: HashMap<PeripheralAddress, CancellationToken>,
    /// Configuration descriptor writes folded into the following subscribe call.
    deferred_configuration: HashMap<(PeripheralAddress, CharacteristicPath), Uuid>,
}

impl GattWorker {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<GattCommand>) {
        while let Some(command) = queue.recv().await {
            self.execute(command).await;
        }
        for (_address, pump) in self.pumps.drain() {
            pump.cancel();
        }
        debug!("command worker stopped");
    }

    async fn execute(&mut self, command: GattCommand) {
        match command {
            GattCommand::Connect {
                address,
                link,
                peripheral,
            } => self.connect(address, link, peripheral).await,
            GattCommand::DiscoverServices {
                address,
                peripheral,
            } => {
                let (status, services) = match peripheral.discover_services().await {
                    Ok(()) => (status::GATT_SUCCESS, services_from_peripheral(&peripheral)),
                    Err(error) => {
                        warn!(%address, ?error, "service discovery failed");
                        (status::GATT_FAILURE, Vec::new())
                    }
                };
                self.report(address, |address, link| PlatformEvent::ServicesDiscovered {
                    address,
                    link,
                    status,
                    services,
                });
            }
            GattCommand::SetNotification {
                address,
                peripheral,
                path,
                enabled,
            } => self.set_notification(address, &peripheral, path, enabled).await,
            GattCommand::WriteDescriptor {
                address,
                peripheral,
                path,
                descriptor,
                value,
            } => {
                self.write_descriptor(address, &peripheral, path, descriptor, &value)
                    .await;
            }
            GattCommand::WriteCharacteristic {
                address,
                peripheral,
                path,
                value,
                mode,
            } => {
                let status = match find_characteristic(&peripheral, &path) {
                    Some(characteristic) => {
                        let write_type = match mode {
                            WriteMode::WithResponse => WriteType::WithResponse,
                            WriteMode::WithoutResponse => WriteType::WithoutResponse,
                        };
                        outcome_status(peripheral.write(&characteristic, &value, write_type).await)
                    }
                    None => status::GATT_FAILURE,
                };
                self.report(address, |address, link| PlatformEvent::CharacteristicWritten {
                    address,
                    link,
                    characteristic: path,
                    status,
                });
            }
            GattCommand::ReadCharacteristic {
                address,
                peripheral,
                path,
            } => {
                let (status, value) = match find_characteristic(&peripheral, &path) {
                    Some(characteristic) => match peripheral.read(&characteristic).await {
                        Ok(value) => (status::GATT_SUCCESS, value),
                        Err(error) => {
                            debug!(?error, "characteristic read failed");
                            (status::GATT_FAILURE, Vec::new())
                        }
                    },
                    None => (status::GATT_FAILURE, Vec::new()),
                };
                self.report(address, |address, link| PlatformEvent::CharacteristicRead {
                    address,
                    link,
                    characteristic: path,
                    status,
                    value,
                });
            }
            GattCommand::Disconnect {
                address,
                peripheral,
            } => {
                let released = release_link(&self.links, &address);
                self.stop_pump(&address);
                match peripheral.disconnect().await {
                    Ok(()) => debug!(%address, ?released, "disconnected on request"),
                    Err(error) => debug!(%address, ?error, "disconnect failed"),
                }
            }
            GattCommand::Close { address } => {
                release_link(&self.links, &address);
                self.stop_pump(&address);
                self.deferred_configuration
                    .retain(|(deferred, _path), _descriptor| *deferred != address);
            }
        }
    }

    /// Reports an outcome on the link currently open for `address`.
    fn report<F>(&self, address: PeripheralAddress, event: F)
    where
        F: FnOnce(PeripheralAddress, LinkId) -> PlatformEvent,
    {
        let Some(link) = current_link(&self.links, &address) else {
            trace!(%address, "dropping outcome for a released link");
            return;
        };
        self.sink.deliver(event(address, link));
    }

    #[instrument(skip(self, peripheral), level = "debug", fields(%address, %link))]
    async fn connect(
        &mut self,
        address: PeripheralAddress,
        link: LinkId,
        peripheral: Peripheral,
    ) {
        lock_links(&self.links).insert(address.clone(), link);
        if let Err(error) = peripheral.connect().await {
            warn!(?error, "connect failed");
            release_link(&self.links, &address);
            self.sink.deliver(PlatformEvent::ConnectionStateChanged {
                address,
                link,
                status: connect_failure_status(&error),
                new_state: LinkState::Disconnected,
            });
            return;
        }

        self.start_pump(address.clone(), link, peripheral).await;
        self.sink.deliver(PlatformEvent::ConnectionStateChanged {
            address,
            link,
            status: status::GATT_SUCCESS,
            new_state: LinkState::Connected,
        });
    }

    async fn start_pump(
        &mut self,
        address: PeripheralAddress,
        link: LinkId,
        peripheral: Peripheral,
    ) {
        self.stop_pump(&address);
        let mut notifications = match peripheral.notifications().await {
            Ok(notifications) => notifications,
            Err(error) => {
                warn!(%address, ?error, "failed to open notification stream");
                return;
            }
        };

        let cancel = CancellationToken::new();
        self.pumps.insert(address.clone(), cancel.clone());
        let sink = self.sink.clone();
        tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    () = cancel.cancelled() => break,
                    notification = notifications.next() => notification,
                };
                let Some(notification) = notification else {
                    break;
                };
                let Some(service) = service_of(&peripheral, notification.uuid) else {
                    trace!(characteristic = %notification.uuid, "notification for unknown characteristic");
                    continue;
                };
                let delivered = sink.deliver(PlatformEvent::CharacteristicChanged {
                    address: address.clone(),
                    link,
                    characteristic: CharacteristicPath::new(service, notification.uuid),
                    value: notification.value,
                });
                if !delivered {
                    break;
                }
            }
            trace!(%address, "notification pump stopped");
        });
    }

    fn stop_pump(&mut self, address: &PeripheralAddress) {
        if let Some(pump) = self.pumps.remove(address) {
            pump.cancel();
        }
    }

    /// Subscribing writes the configuration descriptor itself, so a deferred
    /// configuration write is acknowledged from the subscribe outcome.
    async fn set_notification(
        &mut self,
        address: PeripheralAddress,
        peripheral: &Peripheral,
        path: CharacteristicPath,
        enabled: bool,
    ) {
        let deferred = self
            .deferred_configuration
            .remove(&(address.clone(), path));
        let Some(characteristic) = find_characteristic(peripheral, &path) else {
            debug!(characteristic = %path.characteristic(), "cannot register unknown characteristic");
            return;
        };

        let result = if enabled {
            peripheral.subscribe(&characteristic).await
        } else {
            peripheral.unsubscribe(&characteristic).await
        };
        if let Err(error) = &result {
            warn!(?error, enabled, "notification registration failed");
        }
        if let Some(descriptor) = deferred {
            self.report(address, |address, link| PlatformEvent::DescriptorWritten {
                address,
                link,
                characteristic: path,
                descriptor,
                status: outcome_status(result),
            });
        }
    }

    async fn write_descriptor(
        &mut self,
        address: PeripheralAddress,
        peripheral: &Peripheral,
        path: CharacteristicPath,
        descriptor: Uuid,
        value: &[u8],
    ) {
        if descriptor == CLIENT_CHARACTERISTIC_CONFIGURATION {
            if value.iter().any(|byte| *byte != 0) {
                self.deferred_configuration
                    .insert((address, path), descriptor);
            } else {
                self.report(address, |address, link| PlatformEvent::DescriptorWritten {
                    address,
                    link,
                    characteristic: path,
                    descriptor,
                    status: status::GATT_SUCCESS,
                });
            }
            return;
        }

        let target = find_characteristic(peripheral, &path).and_then(|characteristic| {
            characteristic
                .descriptors
                .into_iter()
                .find(|candidate| candidate.uuid == descriptor)
        });
        let status = match target {
            Some(target) => outcome_status(peripheral.write_descriptor(&target, value).await),
            None => status::GATT_FAILURE,
        };
        self.report(address, |address, link| PlatformEvent::DescriptorWritten {
            address,
            link,
            characteristic: path,
            descriptor,
            status,
        });
    }
}

fn lock_links(links: &LinkMap) -> MutexGuard<'_, HashMap<PeripheralAddress, LinkId>> {
    links.lock().unwrap_or_else(PoisonError::into_inner)
}

fn current_link(links: &LinkMap, address: &PeripheralAddress) -> Option<LinkId> {
    lock_links(links).get(address).copied()
}

fn release_link(links: &LinkMap, address: &PeripheralAddress) -> Option<LinkId> {
    lock_links(links).remove(address)
}

fn address_for_id(id: &PeripheralId) -> PeripheralAddress {
    PeripheralAddress::new(id.to_string())
}

fn scan_record_from_properties(id: &PeripheralId, properties: PeripheralProperties) -> ScanRecord {
    let PeripheralProperties {
        local_name,
        rssi,
        manufacturer_data,
        service_data,
        services,
        ..
    } = properties;

    ScanRecord::new(
        address_for_id(id),
        Advertisement::builder()
            .maybe_local_name(local_name)
            .maybe_rssi(rssi)
            .service_uuids(services)
            .manufacturer_data(manufacturer_data.into_iter().collect())
            .service_data(service_data.into_iter().collect())
            .build(),
    )
}

fn services_from_peripheral(peripheral: &Peripheral) -> Vec<ServiceInfo> {
    peripheral
        .services()
        .into_iter()
        .map(|service| {
            let characteristics = service
                .characteristics
                .iter()
                .map(|characteristic| {
                    CharacteristicInfo::new(
                        characteristic.uuid,
                        characteristic_properties(characteristic.properties),
                        characteristic
                            .descriptors
                            .iter()
                            .map(|descriptor| descriptor.uuid)
                            .collect(),
                    )
                })
                .collect();
            ServiceInfo::new(service.uuid, service.primary, characteristics)
        })
        .collect()
}

fn characteristic_properties(flags: CharPropFlags) -> Vec<CharacteristicProperty> {
    [
        (CharPropFlags::BROADCAST, CharacteristicProperty::Broadcast),
        (CharPropFlags::READ, CharacteristicProperty::Read),
        (
            CharPropFlags::WRITE_WITHOUT_RESPONSE,
            CharacteristicProperty::WriteWithoutResponse,
        ),
        (CharPropFlags::WRITE, CharacteristicProperty::Write),
        (CharPropFlags::NOTIFY, CharacteristicProperty::Notify),
        (CharPropFlags::INDICATE, CharacteristicProperty::Indicate),
        (
            CharPropFlags::AUTHENTICATED_SIGNED_WRITES,
            CharacteristicProperty::AuthenticatedSignedWrites,
        ),
    ]
    .into_iter()
    .filter(|(flag, _property)| flags.contains(*flag))
    .map(|(_flag, property)| property)
    .collect()
}

fn find_characteristic(peripheral: &Peripheral, path: &CharacteristicPath) -> Option<Characteristic> {
    peripheral.characteristics().into_iter().find(|characteristic| {
        characteristic.service_uuid == path.service() && characteristic.uuid == path.characteristic()
    })
}

fn service_of(peripheral: &Peripheral, characteristic: Uuid) -> Option<Uuid> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|candidate| candidate.uuid == characteristic)
        .map(|candidate| candidate.service_uuid)
}

fn outcome_status<T>(result: Result<T, btleplug::Error>) -> i32 {
    match result {
        Ok(_) => status::GATT_SUCCESS,
        Err(error) => {
            debug!(?error, "GATT operation failed");
            status::GATT_FAILURE
        }
    }
}

/// Maps a connect error onto the status codes the central classifies.
fn connect_failure_status(error: &btleplug::Error) -> i32 {
    match error {
        btleplug::Error::TimedOut(_) | btleplug::Error::DeviceNotFound => {
            status::CONN_TIMEOUT_OR_NOT_FOUND
        }
        btleplug::Error::NotConnected => status::CONN_OUT_OF_RANGE,
        _ => status::GATT_FAILURE,
    }
}

fn scan_failure_code(error: &btleplug::Error) -> i32 {
    match error {
        btleplug::Error::NotSupported(_) => scan_error::FEATURE_UNSUPPORTED,
        btleplug::Error::PermissionDenied => scan_error::APPLICATION_REGISTRATION_FAILED,
        _ => scan_error::INTERNAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CharPropFlags::READ | CharPropFlags::NOTIFY, vec![CharacteristicProperty::Read, CharacteristicProperty::Notify])]
    #[case(
        CharPropFlags::WRITE_WITHOUT_RESPONSE | CharPropFlags::WRITE,
        vec![CharacteristicProperty::WriteWithoutResponse, CharacteristicProperty::Write]
    )]
    #[case(CharPropFlags::INDICATE, vec![CharacteristicProperty::Indicate])]
    #[case(CharPropFlags::empty(), vec![])]
    fn characteristic_properties_follow_flag_order(
        #[case] flags: CharPropFlags,
        #[case] expected: Vec<CharacteristicProperty>,
    ) {
        assert_eq!(expected, characteristic_properties(flags));
    }

    #[rstest]
    #[case(btleplug::Error::TimedOut(Duration::from_secs(5)), status::CONN_TIMEOUT_OR_NOT_FOUND)]
    #[case(btleplug::Error::DeviceNotFound, status::CONN_TIMEOUT_OR_NOT_FOUND)]
    #[case(btleplug::Error::NotConnected, status::CONN_OUT_OF_RANGE)]
    #[case(btleplug::Error::PermissionDenied, status::GATT_FAILURE)]
    fn connect_errors_map_to_classified_status(
        #[case] error: btleplug::Error,
        #[case] expected: i32,
    ) {
        assert_eq!(expected, connect_failure_status(&error));
    }

    #[test]
    fn scan_failures_map_to_platform_codes() {
        assert_eq!(
            scan_error::FEATURE_UNSUPPORTED,
            scan_failure_code(&btleplug::Error::NotSupported("filters".to_string()))
        );
        assert_eq!(
            scan_error::INTERNAL_ERROR,
            scan_failure_code(&btleplug::Error::DeviceNotFound)
        );
    }
}
