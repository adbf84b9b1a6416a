use std::sync::Arc;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc::error::TryRecvError;
use uuid::Uuid;

use gattlink::{
    BleCentral, CLIENT_CHARACTERISTIC_CONFIGURATION, CentralConfig, CharacteristicPath,
    ConnectionEvent, DescriptorWriteOutcome, DiscoveryFailure, EventStream,
    FAKE_NOTIFY_CHARACTERISTIC, FAKE_SERVICE, FAKE_WRITE_CHARACTERISTIC, FakeOperation,
    FakePlatform, GattError, LinkState, NotificationEvent, NotificationFailure,
    NotificationSuccessPolicy, NotifyError, PeripheralAddress, PeripheralHandle, PlatformCall,
    PlatformEvent, ServiceInfo, WriteMode, bluetooth_base_uuid, default_services,
};

const MISSING_CHARACTERISTIC: Uuid = bluetooth_base_uuid(0xfff9);

struct Connected {
    platform: Arc<FakePlatform>,
    central: BleCentral,
    handle: PeripheralHandle,
    _events: EventStream<ConnectionEvent>,
}

impl Connected {
    fn new(config: CentralConfig) -> anyhow::Result<Self> {
        let platform = Arc::new(FakePlatform::manual());
        let central = BleCentral::with_config(platform.clone(), config);
        let (handle, events) = central.connect(address(), false)?;
        central.handle_platform_event(PlatformEvent::ConnectionStateChanged {
            address: address(),
            link: handle.link(),
            status: 0,
            new_state: LinkState::Connected,
        });
        Ok(Self {
            platform,
            central,
            handle,
            _events: events,
        })
    }

    fn optimistic() -> anyhow::Result<Self> {
        Self::new(CentralConfig::default())
    }

    fn awaiting_descriptor_write() -> anyhow::Result<Self> {
        Self::new(
            CentralConfig::builder()
                .notification_policy(NotificationSuccessPolicy::AwaitDescriptorWrite)
                .build(),
        )
    }

    fn discover(&self, status: i32, services: Vec<ServiceInfo>) {
        self.central
            .handle_platform_event(PlatformEvent::ServicesDiscovered {
                address: address(),
                link: self.handle.link(),
                status,
                services,
            });
    }

    fn notify(&self, characteristic: Uuid, value: &[u8]) {
        self.central
            .handle_platform_event(PlatformEvent::CharacteristicChanged {
                address: address(),
                link: self.handle.link(),
                characteristic: CharacteristicPath::new(FAKE_SERVICE, characteristic),
                value: value.to_vec(),
            });
    }

    fn descriptor_written(&self, status: i32) {
        self.central
            .handle_platform_event(PlatformEvent::DescriptorWritten {
                address: address(),
                link: self.handle.link(),
                characteristic: notify_path(),
                descriptor: CLIENT_CHARACTERISTIC_CONFIGURATION,
                status,
            });
    }

    fn link_dropped(&self) {
        self.central
            .handle_platform_event(PlatformEvent::ConnectionStateChanged {
                address: address(),
                link: self.handle.link(),
                status: 0,
                new_state: LinkState::Disconnected,
            });
    }

    fn enable(&self) -> Result<EventStream<NotificationEvent>, NotifyError> {
        self.central
            .enable_notifications(&self.handle, FAKE_SERVICE, FAKE_NOTIFY_CHARACTERISTIC)
    }

    fn calls_since_connect(&self) -> Vec<PlatformCall> {
        self.platform.calls().into_iter().skip(1).collect()
    }
}

fn address() -> PeripheralAddress {
    PeripheralAddress::new("AA:AA")
}

fn notify_path() -> CharacteristicPath {
    CharacteristicPath::new(FAKE_SERVICE, FAKE_NOTIFY_CHARACTERISTIC)
}

fn assert_enabled(event: Option<NotificationEvent>) {
    assert_matches!(
        event,
        Some(NotificationEvent::Enabled(binding))
            if binding.service() == FAKE_SERVICE
                && binding.notify_characteristic() == FAKE_NOTIFY_CHARACTERISTIC
                && binding.write_characteristic() == Some(FAKE_WRITE_CHARACTERISTIC)
    );
}

#[test]
fn values_follow_enabled_in_arrival_order_including_empty_payloads() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    let mut notifications = connected.enable()?;

    connected.discover(0, default_services());
    connected.notify(FAKE_NOTIFY_CHARACTERISTIC, &[0x01]);
    connected.notify(FAKE_NOTIFY_CHARACTERISTIC, &[0x02, 0x03]);
    connected.notify(FAKE_NOTIFY_CHARACTERISTIC, &[]);

    let mut events = notifications.drain_ready().into_iter();
    assert_enabled(events.next());
    assert_eq!(
        vec![
            NotificationEvent::Value(vec![0x01]),
            NotificationEvent::Value(vec![0x02, 0x03]),
            NotificationEvent::Value(Vec::new()),
        ],
        events.collect::<Vec<_>>()
    );
    assert_eq!(
        vec![
            PlatformCall::DiscoverServices { address: address() },
            PlatformCall::WriteDescriptor {
                address: address(),
                characteristic: notify_path(),
                descriptor: CLIENT_CHARACTERISTIC_CONFIGURATION,
                value: vec![0x01, 0x00],
            },
            PlatformCall::SetCharacteristicNotification {
                address: address(),
                characteristic: notify_path(),
                enabled: true,
            },
        ],
        connected.calls_since_connect()
    );
    assert_eq!(
        Some(FAKE_NOTIFY_CHARACTERISTIC),
        connected
            .central
            .service_binding(&connected.handle)
            .map(|binding| binding.notify_characteristic())
    );

    Ok(())
}

#[test]
fn missing_characteristic_fails_and_no_values_follow() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    let mut notifications = connected.central.enable_notifications(
        &connected.handle,
        FAKE_SERVICE,
        MISSING_CHARACTERISTIC,
    )?;

    connected.discover(0, default_services());
    connected.notify(MISSING_CHARACTERISTIC, &[0x01]);

    assert_eq!(
        vec![NotificationEvent::Failed(NotificationFailure::Discovery(
            DiscoveryFailure::CharacteristicNotFound {
                service: FAKE_SERVICE,
                characteristic: MISSING_CHARACTERISTIC,
            }
        ))],
        notifications.drain_ready()
    );
    assert_matches!(notifications.try_recv(), Err(TryRecvError::Disconnected));
    assert!(connected.central.subscriptions(&connected.handle).is_empty());

    Ok(())
}

#[test]
fn missing_service_fails_the_subscription() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    let mut notifications = connected.enable()?;

    connected.discover(0, Vec::new());

    assert_eq!(
        vec![NotificationEvent::Failed(NotificationFailure::Discovery(
            DiscoveryFailure::ServiceNotFound {
                service: FAKE_SERVICE
            }
        ))],
        notifications.drain_ready()
    );

    Ok(())
}

#[test]
fn failed_discovery_fails_waiting_subscriptions() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    let mut notifications = connected.enable()?;

    connected.discover(129, Vec::new());

    assert_eq!(
        vec![NotificationEvent::Failed(NotificationFailure::Discovery(
            DiscoveryFailure::DiscoveryFailed { status: 129 }
        ))],
        notifications.drain_ready()
    );

    Ok(())
}

#[test]
fn subscriptions_share_one_discovery_and_later_ones_use_the_cache() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    let mut first = connected.enable()?;
    let mut second = connected.central.enable_notifications(
        &connected.handle,
        FAKE_SERVICE,
        FAKE_WRITE_CHARACTERISTIC,
    )?;
    connected.discover(0, default_services());

    connected
        .central
        .disable_notifications(&connected.handle, FAKE_WRITE_CHARACTERISTIC)?;
    let mut third = connected.central.enable_notifications(
        &connected.handle,
        FAKE_SERVICE,
        FAKE_WRITE_CHARACTERISTIC,
    )?;

    assert_enabled(first.drain_ready().into_iter().next());
    assert_matches!(
        second.drain_ready().as_slice(),
        [NotificationEvent::Enabled(_)]
    );
    assert_matches!(
        third.drain_ready().as_slice(),
        [NotificationEvent::Enabled(_)]
    );
    let discoveries = connected
        .platform
        .calls()
        .into_iter()
        .filter(|call| matches!(call, PlatformCall::DiscoverServices { .. }))
        .count();
    assert_eq!(1, discoveries);

    Ok(())
}

#[test]
fn duplicate_subscription_is_rejected() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    let _notifications = connected.enable()?;

    assert_eq!(
        Err(NotifyError::AlreadySubscribed {
            characteristic: FAKE_NOTIFY_CHARACTERISTIC
        }),
        connected.enable().map(|_stream| ())
    );

    Ok(())
}

#[test]
fn enabling_requires_a_connected_current_handle() -> anyhow::Result<()> {
    let platform = Arc::new(FakePlatform::manual());
    let central = BleCentral::new(platform);
    let (handle, _events) = central.connect(address(), false)?;

    assert_eq!(
        Err(NotifyError::NotConnected),
        central
            .enable_notifications(&handle, FAKE_SERVICE, FAKE_NOTIFY_CHARACTERISTIC)
            .map(|_stream| ())
    );

    central.close(&handle);
    assert_eq!(
        Err(NotifyError::UnknownHandle),
        central
            .enable_notifications(&handle, FAKE_SERVICE, FAKE_NOTIFY_CHARACTERISTIC)
            .map(|_stream| ())
    );

    Ok(())
}

#[test]
fn callbacks_from_a_closed_link_skip_the_reconnected_session() -> anyhow::Result<()> {
    let first = Connected::optimistic()?;
    let stale = first.handle.clone();
    first.central.close(&stale);
    let (handle, events) = first.central.connect(address(), false)?;
    let second = Connected {
        handle,
        _events: events,
        ..first
    };
    second
        .central
        .handle_platform_event(PlatformEvent::ConnectionStateChanged {
            address: address(),
            link: second.handle.link(),
            status: 0,
            new_state: LinkState::Connected,
        });
    let mut notifications = second.enable()?;

    second
        .central
        .handle_platform_event(PlatformEvent::ServicesDiscovered {
            address: address(),
            link: stale.link(),
            status: 129,
            services: Vec::new(),
        });
    assert_matches!(notifications.try_recv(), Err(TryRecvError::Empty));

    second.discover(0, default_services());
    second
        .central
        .handle_platform_event(PlatformEvent::CharacteristicChanged {
            address: address(),
            link: stale.link(),
            characteristic: notify_path(),
            value: vec![0x01],
        });
    second.notify(FAKE_NOTIFY_CHARACTERISTIC, &[0x02]);

    let mut events = notifications.drain_ready().into_iter();
    assert_enabled(events.next());
    assert_eq!(
        vec![NotificationEvent::Value(vec![0x02])],
        events.collect::<Vec<_>>()
    );

    Ok(())
}

#[test]
fn closing_during_negotiation_silences_the_subscription() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    let mut notifications = connected.enable()?;

    connected.central.close(&connected.handle);
    connected.discover(0, default_services());
    connected.notify(FAKE_NOTIFY_CHARACTERISTIC, &[0x01]);

    assert_matches!(notifications.try_recv(), Err(TryRecvError::Disconnected));
    assert!(
        !connected
            .platform
            .calls()
            .iter()
            .any(|call| matches!(call, PlatformCall::WriteDescriptor { .. }))
    );

    Ok(())
}

#[test]
fn link_loss_before_enabled_reports_connection_lost() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    let mut notifications = connected.enable()?;

    connected.link_dropped();

    assert_eq!(
        vec![NotificationEvent::Failed(NotificationFailure::ConnectionLost)],
        notifications.drain_ready()
    );
    assert_matches!(notifications.try_recv(), Err(TryRecvError::Disconnected));

    Ok(())
}

#[test]
fn link_loss_after_enabled_just_ends_the_stream() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    let mut notifications = connected.enable()?;
    connected.discover(0, default_services());

    connected.link_dropped();

    assert_matches!(
        notifications.drain_ready().as_slice(),
        [NotificationEvent::Enabled(_)]
    );
    assert_matches!(notifications.try_recv(), Err(TryRecvError::Disconnected));
    assert_eq!(None, connected.central.service_binding(&connected.handle));

    Ok(())
}

#[test]
fn await_policy_reports_enabled_only_after_descriptor_ack() -> anyhow::Result<()> {
    let connected = Connected::awaiting_descriptor_write()?;
    let mut notifications = connected.enable()?;

    connected.discover(0, default_services());
    connected.notify(FAKE_NOTIFY_CHARACTERISTIC, &[0x09]);
    assert_eq!(Vec::<NotificationEvent>::new(), notifications.drain_ready());

    connected.descriptor_written(0);
    connected.notify(FAKE_NOTIFY_CHARACTERISTIC, &[0x0A]);

    let mut events = notifications.drain_ready().into_iter();
    assert_enabled(events.next());
    assert_eq!(Some(NotificationEvent::Value(vec![0x0A])), events.next());

    Ok(())
}

#[test]
fn await_policy_fails_and_unregisters_when_descriptor_write_fails() -> anyhow::Result<()> {
    let connected = Connected::awaiting_descriptor_write()?;
    let mut notifications = connected.enable()?;
    connected.discover(0, default_services());

    connected.descriptor_written(5);

    assert_eq!(
        vec![NotificationEvent::Failed(
            NotificationFailure::DescriptorWriteFailed { status: 5 }
        )],
        notifications.drain_ready()
    );
    assert_eq!(
        Some(&PlatformCall::SetCharacteristicNotification {
            address: address(),
            characteristic: notify_path(),
            enabled: false,
        }),
        connected.platform.calls().last()
    );

    Ok(())
}

#[test]
fn await_policy_fails_when_descriptor_write_is_refused() -> anyhow::Result<()> {
    let connected = Connected::awaiting_descriptor_write()?;
    connected.platform.refuse(FakeOperation::WriteDescriptor);
    let mut notifications = connected.enable()?;

    connected.discover(0, default_services());

    assert_eq!(
        vec![NotificationEvent::Failed(
            NotificationFailure::DescriptorWriteRefused
        )],
        notifications.drain_ready()
    );

    Ok(())
}

#[test]
fn optimistic_policy_records_a_failed_descriptor_write() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    let mut notifications = connected.enable()?;
    connected.discover(0, default_services());

    connected.descriptor_written(5);
    connected.notify(FAKE_NOTIFY_CHARACTERISTIC, &[0x01]);

    let events = notifications.drain_ready();
    assert_eq!(2, events.len());
    assert_eq!(Some(&NotificationEvent::Value(vec![0x01])), events.last());
    let subscriptions = connected.central.subscriptions(&connected.handle);
    assert_eq!(1, subscriptions.len());
    assert!(subscriptions[0].enabled());
    assert_eq!(
        DescriptorWriteOutcome::Failed(5),
        subscriptions[0].descriptor_write()
    );

    Ok(())
}

#[test]
fn registration_refusal_fails_the_subscription() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    connected
        .platform
        .refuse(FakeOperation::SetCharacteristicNotification);
    let mut notifications = connected.enable()?;

    connected.discover(0, default_services());

    assert_eq!(
        vec![NotificationEvent::Failed(
            NotificationFailure::RegistrationRefused
        )],
        notifications.drain_ready()
    );

    Ok(())
}

#[test]
fn disabling_unregisters_and_ends_the_stream() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    let mut notifications = connected.enable()?;
    connected.discover(0, default_services());

    connected
        .central
        .disable_notifications(&connected.handle, FAKE_NOTIFY_CHARACTERISTIC)?;
    connected.notify(FAKE_NOTIFY_CHARACTERISTIC, &[0x01]);

    assert_matches!(
        notifications.drain_ready().as_slice(),
        [NotificationEvent::Enabled(_)]
    );
    assert_matches!(notifications.try_recv(), Err(TryRecvError::Disconnected));
    let calls = connected.platform.calls();
    assert_eq!(
        &[
            PlatformCall::SetCharacteristicNotification {
                address: address(),
                characteristic: notify_path(),
                enabled: false,
            },
            PlatformCall::WriteDescriptor {
                address: address(),
                characteristic: notify_path(),
                descriptor: CLIENT_CHARACTERISTIC_CONFIGURATION,
                value: vec![0x00, 0x00],
            },
        ],
        &calls[calls.len() - 2..]
    );
    assert_eq!(
        Err(NotifyError::NotSubscribed {
            characteristic: FAKE_NOTIFY_CHARACTERISTIC
        }),
        connected
            .central
            .disable_notifications(&connected.handle, FAKE_NOTIFY_CHARACTERISTIC)
    );

    Ok(())
}

#[tokio::test]
async fn write_and_read_resolve_from_their_callbacks() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    let discovery = connected.central.discover_services(&connected.handle);
    connected.discover(0, default_services());
    assert_eq!(default_services(), discovery.await?);

    let write_path = CharacteristicPath::new(FAKE_SERVICE, FAKE_WRITE_CHARACTERISTIC);
    let write = connected.central.write_characteristic(
        &connected.handle,
        FAKE_SERVICE,
        FAKE_WRITE_CHARACTERISTIC,
        &[0x01, 0x02],
        WriteMode::WithResponse,
    );
    connected
        .central
        .handle_platform_event(PlatformEvent::CharacteristicWritten {
            address: address(),
            link: connected.handle.link(),
            characteristic: write_path,
            status: 0,
        });
    assert_eq!(Ok(()), write.await);

    let failing_write = connected.central.write_characteristic(
        &connected.handle,
        FAKE_SERVICE,
        FAKE_WRITE_CHARACTERISTIC,
        &[0x03],
        WriteMode::WithoutResponse,
    );
    connected
        .central
        .handle_platform_event(PlatformEvent::CharacteristicWritten {
            address: address(),
            link: connected.handle.link(),
            characteristic: write_path,
            status: 3,
        });
    assert_eq!(Err(GattError::WriteFailed { status: 3 }), failing_write.await);

    let read = connected.central.read_characteristic(
        &connected.handle,
        FAKE_SERVICE,
        FAKE_NOTIFY_CHARACTERISTIC,
    );
    connected
        .central
        .handle_platform_event(PlatformEvent::CharacteristicRead {
            address: address(),
            link: connected.handle.link(),
            characteristic: notify_path(),
            status: 0,
            value: vec![0x2A],
        });
    assert_eq!(Ok(vec![0x2A]), read.await);

    Ok(())
}

#[tokio::test]
async fn requests_before_discovery_or_for_unknown_attributes_fail_immediately()
-> anyhow::Result<()> {
    let connected = Connected::optimistic()?;

    let early = connected.central.write_characteristic(
        &connected.handle,
        FAKE_SERVICE,
        FAKE_WRITE_CHARACTERISTIC,
        &[0x01],
        WriteMode::WithResponse,
    );
    assert_eq!(Err(GattError::ServicesNotDiscovered), early.await);

    let discovery = connected.central.discover_services(&connected.handle);
    connected.discover(0, default_services());
    discovery.await?;

    let unknown = connected.central.read_characteristic(
        &connected.handle,
        FAKE_SERVICE,
        MISSING_CHARACTERISTIC,
    );
    assert_eq!(
        Err(GattError::Discovery(
            DiscoveryFailure::CharacteristicNotFound {
                service: FAKE_SERVICE,
                characteristic: MISSING_CHARACTERISTIC,
            }
        )),
        unknown.await
    );

    Ok(())
}

#[tokio::test]
async fn pending_requests_resolve_when_the_connection_goes_away() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    let discovery = connected.central.discover_services(&connected.handle);
    connected.discover(0, default_services());
    discovery.await?;

    let read = connected.central.read_characteristic(
        &connected.handle,
        FAKE_SERVICE,
        FAKE_NOTIFY_CHARACTERISTIC,
    );
    connected.link_dropped();
    assert_eq!(Err(GattError::ConnectionLost), read.await);

    let reconnected = Connected::optimistic()?;
    let discovery = reconnected.central.discover_services(&reconnected.handle);
    reconnected.central.close(&reconnected.handle);
    assert_eq!(Err(GattError::Cancelled), discovery.await);

    Ok(())
}

#[tokio::test]
async fn refused_write_resolves_with_the_platform_error() -> anyhow::Result<()> {
    let connected = Connected::optimistic()?;
    let discovery = connected.central.discover_services(&connected.handle);
    connected.discover(0, default_services());
    discovery.await?;
    connected.platform.refuse(FakeOperation::WriteCharacteristic);

    let write = connected.central.write_characteristic(
        &connected.handle,
        FAKE_SERVICE,
        FAKE_WRITE_CHARACTERISTIC,
        &[0x01],
        WriteMode::WithResponse,
    );

    assert_matches!(write.await, Err(GattError::Refused(_)));

    Ok(())
}
