use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use serde_with::{hex::Hex, serde_as};
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::config::NotificationSuccessPolicy;
use super::connection::{ConnectionState, PeripheralHandle};
use super::context::BleCentral;
use super::dispatch::{EventSender, EventStream, GattRequest, Responder, event_channel, resolve};
use crate::error::{DiscoveryFailure, GattError, NotificationFailure, NotifyError};
use crate::hw::{
    CharacteristicPath, CharacteristicProperty, LinkId, PeripheralAddress, ServiceInfo,
    WriteMode, find_service,
};
use crate::protocol::{
    CLIENT_CHARACTERISTIC_CONFIGURATION, DISABLE_NOTIFICATION_VALUE, ENABLE_INDICATION_VALUE,
    ENABLE_NOTIFICATION_VALUE, status,
};

/// Events delivered on a notification subscription stream.
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// Notifications are enabled; values follow.
    Enabled(ServiceBinding),
    /// The subscription could not be set up or the link went away first. Terminal.
    Failed(NotificationFailure),
    /// One characteristic-changed payload, in arrival order.
    Value(#[serde_as(as = "Hex")] Vec<u8>),
}

/// Service and characteristics resolved by a successful subscription.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct ServiceBinding {
    service: Uuid,
    notify_characteristic: Uuid,
    write_characteristic: Option<Uuid>,
}

impl ServiceBinding {
    #[must_use]
    pub fn service(&self) -> Uuid {
        self.service
    }

    #[must_use]
    pub fn notify_characteristic(&self) -> Uuid {
        self.notify_characteristic
    }

    /// A writable characteristic in the same service, preferring one other than the notify characteristic.
    #[must_use]
    pub fn write_characteristic(&self) -> Option<Uuid> {
        self.write_characteristic
    }
}

/// Observed result of the configuration descriptor write.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum DescriptorWriteOutcome {
    Pending,
    Written,
    Failed(i32),
    Refused,
}

/// Snapshot of one subscription on a connection.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct NotificationSubscription {
    service: Uuid,
    characteristic: Uuid,
    enabled: bool,
    descriptor_write: DescriptorWriteOutcome,
}

impl NotificationSubscription {
    #[must_use]
    pub fn service(&self) -> Uuid {
        self.service
    }

    #[must_use]
    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    /// Returns whether values are being routed to the subscription stream.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn descriptor_write(&self) -> DescriptorWriteOutcome {
        self.descriptor_write
    }
}

/// Attribute writes needed to turn on one subscription.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct SubscriptionPlan {
    path: CharacteristicPath,
    descriptor: Uuid,
    enable_value: [u8; 2],
    binding: ServiceBinding,
}

/// Resolves the descriptor write and binding for a subscription against discovered services.
pub(crate) fn resolve_subscription(
    services: &[ServiceInfo],
    service: Uuid,
    characteristic: Uuid,
) -> Result<SubscriptionPlan, DiscoveryFailure> {
    let service_info =
        find_service(services, service).ok_or(DiscoveryFailure::ServiceNotFound { service })?;
    let characteristic_info = service_info.characteristic(characteristic).ok_or(
        DiscoveryFailure::CharacteristicNotFound {
            service,
            characteristic,
        },
    )?;

    if !characteristic_info
        .descriptors()
        .contains(&CLIENT_CHARACTERISTIC_CONFIGURATION)
    {
        trace!(%characteristic, "configuration descriptor not listed, using the standard one");
    }

    let indicate_only = characteristic_info.has_property(CharacteristicProperty::Indicate)
        && !characteristic_info.has_property(CharacteristicProperty::Notify);
    let enable_value = if indicate_only {
        ENABLE_INDICATION_VALUE
    } else {
        ENABLE_NOTIFICATION_VALUE
    };

    let write_characteristic = service_info
        .characteristics()
        .iter()
        .find(|candidate| candidate.uuid() != characteristic && candidate.supports_write())
        .map(|candidate| candidate.uuid())
        .or_else(|| {
            characteristic_info
                .supports_write()
                .then_some(characteristic)
        });

    Ok(SubscriptionPlan {
        path: CharacteristicPath::new(service, characteristic),
        descriptor: CLIENT_CHARACTERISTIC_CONFIGURATION,
        enable_value,
        binding: ServiceBinding {
            service,
            notify_characteristic: characteristic,
            write_characteristic,
        },
    })
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum SubscriptionPhase {
    AwaitingDiscovery,
    Registering,
    AwaitingDescriptor,
    Active,
}

#[derive(Debug)]
struct Subscription {
    id: u64,
    service: Uuid,
    characteristic: Uuid,
    phase: SubscriptionPhase,
    descriptor_write: DescriptorWriteOutcome,
    plan: Option<SubscriptionPlan>,
    events: EventSender<NotificationEvent>,
}

impl Subscription {
    fn snapshot(&self) -> NotificationSubscription {
        NotificationSubscription {
            service: self.service,
            characteristic: self.characteristic,
            enabled: self.phase == SubscriptionPhase::Active,
            descriptor_write: self.descriptor_write,
        }
    }

    fn is_registered(&self) -> bool {
        matches!(
            self.phase,
            SubscriptionPhase::AwaitingDescriptor | SubscriptionPhase::Active
        )
    }
}

#[derive(Debug)]
struct PendingRequest<T> {
    id: u64,
    responder: Responder<T>,
}

/// FIFO of outstanding requests per characteristic.
#[derive(Debug)]
struct PendingRequests<T> {
    by_path: HashMap<CharacteristicPath, VecDeque<PendingRequest<T>>>,
}

impl<T> Default for PendingRequests<T> {
    fn default() -> Self {
        Self {
            by_path: HashMap::new(),
        }
    }
}

impl<T> PendingRequests<T> {
    fn push(&mut self, path: CharacteristicPath, id: u64, responder: Responder<T>) {
        self.by_path
            .entry(path)
            .or_default()
            .push_back(PendingRequest { id, responder });
    }

    fn pop(&mut self, path: &CharacteristicPath) -> Option<Responder<T>> {
        let queue = self.by_path.get_mut(path)?;
        let request = queue.pop_front();
        if queue.is_empty() {
            self.by_path.remove(path);
        }
        request.map(|request| request.responder)
    }

    fn take(&mut self, path: &CharacteristicPath, id: u64) -> Option<Responder<T>> {
        let queue = self.by_path.get_mut(path)?;
        let index = queue.iter().position(|request| request.id == id)?;
        let request = queue.remove(index);
        if queue.is_empty() {
            self.by_path.remove(path);
        }
        request.map(|request| request.responder)
    }

    fn fail_all(&mut self, error: &GattError) {
        for (_path, queue) in self.by_path.drain() {
            for request in queue {
                resolve(request.responder, Err(error.clone()));
            }
        }
    }
}

/// Post-connection protocol state for one connection session.
#[derive(Debug, Default)]
pub(crate) struct Negotiation {
    next_id: u64,
    services: Option<Vec<ServiceInfo>>,
    discovery_in_flight: bool,
    discovery_waiters: Vec<Responder<Vec<ServiceInfo>>>,
    subscriptions: HashMap<Uuid, Subscription>,
    binding: Option<ServiceBinding>,
    pending_writes: PendingRequests<()>,
    pending_reads: PendingRequests<Vec<u8>>,
}

enum DiscoveryStep {
    Start,
    Joined,
    Cached,
}

impl Negotiation {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Returns whether the caller must issue the platform discovery request.
    fn begin_discovery(&mut self) -> bool {
        if self.discovery_in_flight {
            return false;
        }
        self.discovery_in_flight = true;
        true
    }

    fn locate(&self, service: Uuid, characteristic: Uuid) -> Result<CharacteristicPath, GattError> {
        let services = self
            .services
            .as_deref()
            .ok_or(GattError::ServicesNotDiscovered)?;
        let service_info =
            find_service(services, service).ok_or(DiscoveryFailure::ServiceNotFound { service })?;
        service_info
            .characteristic(characteristic)
            .ok_or(DiscoveryFailure::CharacteristicNotFound {
                service,
                characteristic,
            })?;
        Ok(CharacteristicPath::new(service, characteristic))
    }

    fn subscription_mut(&mut self, plan: &SubscriptionPlan, id: u64) -> Option<&mut Subscription> {
        self.subscriptions
            .get_mut(&plan.path.characteristic())
            .filter(|subscription| subscription.id == id)
    }

    fn fail_subscription(&mut self, characteristic: Uuid, failure: NotificationFailure) {
        if let Some(subscription) = self.subscriptions.remove(&characteristic) {
            debug!(%characteristic, %failure, "notification subscription failed");
            subscription.events.emit(NotificationEvent::Failed(failure));
        }
    }

    fn activate(&mut self, characteristic: Uuid) {
        let Some(subscription) = self.subscriptions.get_mut(&characteristic) else {
            return;
        };
        let Some(plan) = subscription.plan else {
            return;
        };
        subscription.phase = SubscriptionPhase::Active;
        subscription
            .events
            .emit(NotificationEvent::Enabled(plan.binding));
        self.binding = Some(plan.binding);
        info!(%characteristic, "notifications enabled");
    }

    /// Resolves every subscription waiting on discovery against the cached services.
    fn plan_waiting_subscriptions(&mut self) -> Vec<(u64, SubscriptionPlan)> {
        let Some(services) = &self.services else {
            return Vec::new();
        };

        let mut plans = Vec::new();
        let mut failed = Vec::new();
        for subscription in self.subscriptions.values_mut() {
            if subscription.phase != SubscriptionPhase::AwaitingDiscovery {
                continue;
            }
            match resolve_subscription(services, subscription.service, subscription.characteristic)
            {
                Ok(plan) => {
                    subscription.phase = SubscriptionPhase::Registering;
                    subscription.plan = Some(plan);
                    plans.push((subscription.id, plan));
                }
                Err(failure) => failed.push((subscription.characteristic, failure)),
            }
        }

        for (characteristic, failure) in failed {
            self.fail_subscription(characteristic, failure.into());
        }
        plans
    }

    fn fail_waiting_subscriptions(&mut self, failure: NotificationFailure) {
        let waiting: Vec<Uuid> = self
            .subscriptions
            .values()
            .filter(|subscription| subscription.phase == SubscriptionPhase::AwaitingDiscovery)
            .map(|subscription| subscription.characteristic)
            .collect();
        for characteristic in waiting {
            self.fail_subscription(characteristic, failure);
        }
    }

    /// Ends all negotiation for a link that went down.
    ///
    /// Unfinished subscriptions report `ConnectionLost`; active ones just end.
    pub(super) fn connection_lost(&mut self) {
        self.discovery_in_flight = false;
        for waiter in self.discovery_waiters.drain(..) {
            resolve(waiter, Err(GattError::ConnectionLost));
        }
        for (_characteristic, subscription) in self.subscriptions.drain() {
            if subscription.phase != SubscriptionPhase::Active {
                subscription
                    .events
                    .emit(NotificationEvent::Failed(NotificationFailure::ConnectionLost));
            }
        }
        self.pending_writes.fail_all(&GattError::ConnectionLost);
        self.pending_reads.fail_all(&GattError::ConnectionLost);
        self.services = None;
        self.binding = None;
    }
}

enum RegistrationOutcome {
    Done,
    Unregister(CharacteristicPath),
}

impl BleCentral {
    /// Subscribes to change notifications for a characteristic.
    ///
    /// Service discovery is started (or joined, if already running) unless
    /// services were discovered earlier on this connection. The outcome arrives
    /// on the returned stream.
    ///
    /// # Errors
    ///
    /// Returns a [`NotifyError`] when the handle is stale, the link is not
    /// connected, or the characteristic already has a subscription.
    #[instrument(skip(self), level = "info", fields(%handle, %service, %characteristic))]
    pub fn enable_notifications(
        &self,
        handle: &PeripheralHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<EventStream<NotificationEvent>, NotifyError> {
        let (sender, stream) = event_channel();
        let step = {
            let mut table = self.connection_table();
            let connection = table.session_mut(handle).ok_or(NotifyError::UnknownHandle)?;
            if connection.state() != ConnectionState::Connected {
                return Err(NotifyError::NotConnected);
            }
            let negotiation = &mut connection.negotiation;
            if negotiation.subscriptions.contains_key(&characteristic) {
                return Err(NotifyError::AlreadySubscribed { characteristic });
            }

            let id = negotiation.allocate_id();
            negotiation.subscriptions.insert(
                characteristic,
                Subscription {
                    id,
                    service,
                    characteristic,
                    phase: SubscriptionPhase::AwaitingDiscovery,
                    descriptor_write: DescriptorWriteOutcome::Pending,
                    plan: None,
                    events: sender,
                },
            );

            if negotiation.services.is_some() {
                DiscoveryStep::Cached
            } else if negotiation.begin_discovery() {
                DiscoveryStep::Start
            } else {
                DiscoveryStep::Joined
            }
        };

        match step {
            DiscoveryStep::Start => self.request_discovery(handle),
            DiscoveryStep::Joined => debug!("joining in-flight service discovery"),
            DiscoveryStep::Cached => {
                let plans = match self.connection_table().session_mut(handle) {
                    Some(connection) => connection.negotiation.plan_waiting_subscriptions(),
                    None => Vec::new(),
                };
                for (id, plan) in plans {
                    self.apply_subscription(handle, id, plan);
                }
            }
        }

        Ok(stream)
    }

    /// Turns notifications off and ends the subscription stream.
    ///
    /// # Errors
    ///
    /// Returns a [`NotifyError`] when the handle is stale, the link is not
    /// connected, or no subscription exists for the characteristic.
    #[instrument(skip(self), level = "info", fields(%handle, %characteristic))]
    pub fn disable_notifications(
        &self,
        handle: &PeripheralHandle,
        characteristic: Uuid,
    ) -> Result<(), NotifyError> {
        let removed = {
            let mut table = self.connection_table();
            let connection = table.session_mut(handle).ok_or(NotifyError::UnknownHandle)?;
            if connection.state() != ConnectionState::Connected {
                return Err(NotifyError::NotConnected);
            }
            let negotiation = &mut connection.negotiation;
            let removed = negotiation
                .subscriptions
                .remove(&characteristic)
                .ok_or(NotifyError::NotSubscribed { characteristic })?;
            if negotiation
                .binding
                .is_some_and(|binding| binding.notify_characteristic == characteristic)
            {
                negotiation.binding = None;
            }
            removed
        };

        if let Some(plan) = removed.plan
            && removed.is_registered()
        {
            self.unregister_quietly(handle.address(), &plan.path);
            if let Err(error) = self.platform().write_descriptor(
                handle.address(),
                &plan.path,
                plan.descriptor,
                &DISABLE_NOTIFICATION_VALUE,
            ) {
                debug!(%error, "failed to write disable value");
            }
        }
        info!("notifications disabled");
        Ok(())
    }

    /// Discovers services on a connected peripheral, joining a discovery already in flight.
    #[instrument(skip(self), level = "debug", fields(%handle))]
    pub fn discover_services(&self, handle: &PeripheralHandle) -> GattRequest<Vec<ServiceInfo>> {
        let (request, start) = {
            let mut table = self.connection_table();
            let Some(connection) = table.session_mut(handle) else {
                return GattRequest::ready(Err(GattError::NotConnected));
            };
            if connection.state() != ConnectionState::Connected {
                return GattRequest::ready(Err(GattError::NotConnected));
            }
            let (responder, request) = GattRequest::pending();
            connection.negotiation.discovery_waiters.push(responder);
            (request, connection.negotiation.begin_discovery())
        };

        if start {
            self.request_discovery(handle);
        }
        request
    }

    /// Writes a characteristic once; resolves from the platform's write callback.
    #[instrument(
        skip(self, value),
        level = "debug",
        fields(%handle, %service, %characteristic, %mode, len = value.len())
    )]
    pub fn write_characteristic(
        &self,
        handle: &PeripheralHandle,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
    ) -> GattRequest<()> {
        let (path, id, request) = {
            let mut table = self.connection_table();
            let negotiation = match connected_negotiation(table.session_mut(handle)) {
                Ok(negotiation) => negotiation,
                Err(error) => return GattRequest::ready(Err(error)),
            };
            let path = match negotiation.locate(service, characteristic) {
                Ok(path) => path,
                Err(error) => return GattRequest::ready(Err(error)),
            };
            let (responder, request) = GattRequest::pending();
            let id = negotiation.allocate_id();
            negotiation.pending_writes.push(path, id, responder);
            (path, id, request)
        };

        if let Err(error) =
            self.platform()
                .write_characteristic(handle.address(), &path, value, mode)
        {
            warn!(%error, "platform refused characteristic write");
            if let Some(responder) = self
                .connection_table()
                .session_mut(handle)
                .and_then(|connection| connection.negotiation.pending_writes.take(&path, id))
            {
                resolve(responder, Err(GattError::Refused(error)));
            }
        }
        request
    }

    /// Reads a characteristic once; resolves from the platform's read callback.
    #[instrument(skip(self), level = "debug", fields(%handle, %service, %characteristic))]
    pub fn read_characteristic(
        &self,
        handle: &PeripheralHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> GattRequest<Vec<u8>> {
        let (path, id, request) = {
            let mut table = self.connection_table();
            let negotiation = match connected_negotiation(table.session_mut(handle)) {
                Ok(negotiation) => negotiation,
                Err(error) => return GattRequest::ready(Err(error)),
            };
            let path = match negotiation.locate(service, characteristic) {
                Ok(path) => path,
                Err(error) => return GattRequest::ready(Err(error)),
            };
            let (responder, request) = GattRequest::pending();
            let id = negotiation.allocate_id();
            negotiation.pending_reads.push(path, id, responder);
            (path, id, request)
        };

        if let Err(error) = self.platform().read_characteristic(handle.address(), &path) {
            warn!(%error, "platform refused characteristic read");
            if let Some(responder) = self
                .connection_table()
                .session_mut(handle)
                .and_then(|connection| connection.negotiation.pending_reads.take(&path, id))
            {
                resolve(responder, Err(GattError::Refused(error)));
            }
        }
        request
    }

    /// Returns the binding resolved by the most recent successful subscription.
    #[must_use]
    pub fn service_binding(&self, handle: &PeripheralHandle) -> Option<ServiceBinding> {
        self.connection_table()
            .session(handle)
            .and_then(|connection| connection.negotiation.binding)
    }

    /// Returns snapshots of every subscription on the connection, ordered by characteristic.
    #[must_use]
    pub fn subscriptions(&self, handle: &PeripheralHandle) -> Vec<NotificationSubscription> {
        let table = self.connection_table();
        let Some(connection) = table.session(handle) else {
            return Vec::new();
        };
        let mut snapshots: Vec<NotificationSubscription> = connection
            .negotiation
            .subscriptions
            .values()
            .map(Subscription::snapshot)
            .collect();
        snapshots.sort_by_key(NotificationSubscription::characteristic);
        snapshots
    }

    fn request_discovery(&self, handle: &PeripheralHandle) {
        debug!(%handle, "starting service discovery");
        if let Err(error) = self.platform().discover_services(handle.address()) {
            warn!(%error, "platform refused service discovery");
            self.complete_discovery(handle, Err(status::GATT_FAILURE));
        }
    }

    fn complete_discovery(
        &self,
        handle: &PeripheralHandle,
        outcome: Result<Vec<ServiceInfo>, i32>,
    ) {
        let plans = {
            let mut table = self.connection_table();
            let Some(connection) = table.session_mut(handle) else {
                return;
            };
            if connection.state() != ConnectionState::Connected {
                return;
            }
            let negotiation = &mut connection.negotiation;
            negotiation.discovery_in_flight = false;

            match outcome {
                Ok(services) => {
                    debug!(service_count = services.len(), "service discovery complete");
                    for waiter in negotiation.discovery_waiters.drain(..) {
                        resolve(waiter, Ok(services.clone()));
                    }
                    negotiation.services = Some(services);
                    negotiation.plan_waiting_subscriptions()
                }
                Err(gatt_status) => {
                    warn!(gatt_status, "service discovery failed");
                    let failure = DiscoveryFailure::DiscoveryFailed {
                        status: gatt_status,
                    };
                    for waiter in negotiation.discovery_waiters.drain(..) {
                        resolve(waiter, Err(failure.into()));
                    }
                    negotiation.fail_waiting_subscriptions(failure.into());
                    return;
                }
            }
        };

        for (id, plan) in plans {
            self.apply_subscription(handle, id, plan);
        }
    }

    /// Writes the configuration descriptor, registers locally, then reports per policy.
    fn apply_subscription(&self, handle: &PeripheralHandle, id: u64, plan: SubscriptionPlan) {
        let policy = self.config().notification_policy();
        let address = handle.address();

        if let Err(error) =
            self.platform()
                .write_descriptor(address, &plan.path, plan.descriptor, &plan.enable_value)
        {
            warn!(%error, "platform refused configuration descriptor write");
            let mut table = self.connection_table();
            let Some(connection) = table.session_mut(handle) else {
                return;
            };
            let negotiation = &mut connection.negotiation;
            let Some(subscription) = negotiation.subscription_mut(&plan, id) else {
                return;
            };
            subscription.descriptor_write = DescriptorWriteOutcome::Refused;
            if policy == NotificationSuccessPolicy::AwaitDescriptorWrite {
                negotiation.fail_subscription(
                    plan.path.characteristic(),
                    NotificationFailure::DescriptorWriteRefused,
                );
                return;
            }
        }

        let registration =
            self.platform()
                .set_characteristic_notification(address, &plan.path, true);

        let outcome = {
            let mut table = self.connection_table();
            let Some(connection) = table.session_mut(handle) else {
                return;
            };
            let negotiation = &mut connection.negotiation;
            let characteristic = plan.path.characteristic();
            let Some(subscription) = negotiation.subscription_mut(&plan, id) else {
                return;
            };

            if let Err(error) = registration {
                warn!(%error, "platform refused notification registration");
                negotiation.fail_subscription(characteristic, NotificationFailure::RegistrationRefused);
                return;
            }

            match (policy, subscription.descriptor_write) {
                (NotificationSuccessPolicy::Optimistic, _)
                | (NotificationSuccessPolicy::AwaitDescriptorWrite, DescriptorWriteOutcome::Written) => {
                    negotiation.activate(characteristic);
                    RegistrationOutcome::Done
                }
                (NotificationSuccessPolicy::AwaitDescriptorWrite, DescriptorWriteOutcome::Pending) => {
                    subscription.phase = SubscriptionPhase::AwaitingDescriptor;
                    RegistrationOutcome::Done
                }
                (
                    NotificationSuccessPolicy::AwaitDescriptorWrite,
                    DescriptorWriteOutcome::Failed(gatt_status),
                ) => {
                    negotiation.fail_subscription(
                        characteristic,
                        NotificationFailure::DescriptorWriteFailed {
                            status: gatt_status,
                        },
                    );
                    RegistrationOutcome::Unregister(plan.path)
                }
                (NotificationSuccessPolicy::AwaitDescriptorWrite, DescriptorWriteOutcome::Refused) => {
                    negotiation.fail_subscription(
                        characteristic,
                        NotificationFailure::DescriptorWriteRefused,
                    );
                    RegistrationOutcome::Unregister(plan.path)
                }
            }
        };

        if let RegistrationOutcome::Unregister(path) = outcome {
            self.unregister_quietly(address, &path);
        }
    }

    fn unregister_quietly(&self, address: &PeripheralAddress, path: &CharacteristicPath) {
        if let Err(error) = self
            .platform()
            .set_characteristic_notification(address, path, false)
        {
            debug!(%error, "failed to unregister notifications");
        }
    }

    pub(super) fn on_services_discovered(
        &self,
        address: &PeripheralAddress,
        link: LinkId,
        gatt_status: i32,
        services: Vec<ServiceInfo>,
    ) {
        let Some(handle) = self.current_handle(address, link) else {
            debug!(%address, %link, "services discovered for a stale link");
            return;
        };
        let outcome = if gatt_status == status::GATT_SUCCESS {
            Ok(services)
        } else {
            Err(gatt_status)
        };
        self.complete_discovery(&handle, outcome);
    }

    pub(super) fn on_descriptor_written(
        &self,
        address: &PeripheralAddress,
        link: LinkId,
        path: CharacteristicPath,
        descriptor: Uuid,
        gatt_status: i32,
    ) {
        let policy = self.config().notification_policy();
        let unregister = {
            let mut table = self.connection_table();
            let Some(connection) = table.by_link_mut(address, link) else {
                return;
            };
            if connection.state() != ConnectionState::Connected {
                return;
            }
            let negotiation = &mut connection.negotiation;
            let Some(subscription) = negotiation.subscriptions.get_mut(&path.characteristic())
            else {
                trace!(%address, characteristic = %path.characteristic(), "descriptor write without subscription");
                return;
            };
            let Some(plan) = subscription.plan else {
                return;
            };
            if plan.path != path
                || plan.descriptor != descriptor
                || subscription.descriptor_write != DescriptorWriteOutcome::Pending
            {
                return;
            }

            subscription.descriptor_write = if gatt_status == status::GATT_SUCCESS {
                DescriptorWriteOutcome::Written
            } else {
                warn!(gatt_status, characteristic = %path.characteristic(), "configuration descriptor write failed");
                DescriptorWriteOutcome::Failed(gatt_status)
            };

            if policy != NotificationSuccessPolicy::AwaitDescriptorWrite
                || subscription.phase != SubscriptionPhase::AwaitingDescriptor
            {
                return;
            }
            if gatt_status == status::GATT_SUCCESS {
                negotiation.activate(path.characteristic());
                return;
            }
            negotiation.fail_subscription(
                path.characteristic(),
                NotificationFailure::DescriptorWriteFailed {
                    status: gatt_status,
                },
            );
            path
        };

        self.unregister_quietly(address, &unregister);
    }

    pub(super) fn on_characteristic_written(
        &self,
        address: &PeripheralAddress,
        link: LinkId,
        path: CharacteristicPath,
        gatt_status: i32,
    ) {
        let mut table = self.connection_table();
        let Some(responder) = table
            .by_link_mut(address, link)
            .and_then(|connection| connection.negotiation.pending_writes.pop(&path))
        else {
            trace!(%address, "characteristic write without pending request");
            return;
        };
        let result = if gatt_status == status::GATT_SUCCESS {
            Ok(())
        } else {
            Err(GattError::WriteFailed {
                status: gatt_status,
            })
        };
        resolve(responder, result);
    }

    pub(super) fn on_characteristic_read(
        &self,
        address: &PeripheralAddress,
        link: LinkId,
        path: CharacteristicPath,
        gatt_status: i32,
        value: Vec<u8>,
    ) {
        let mut table = self.connection_table();
        let Some(responder) = table
            .by_link_mut(address, link)
            .and_then(|connection| connection.negotiation.pending_reads.pop(&path))
        else {
            trace!(%address, "characteristic read without pending request");
            return;
        };
        let result = if gatt_status == status::GATT_SUCCESS {
            Ok(value)
        } else {
            Err(GattError::ReadFailed {
                status: gatt_status,
            })
        };
        resolve(responder, result);
    }

    pub(super) fn on_characteristic_changed(
        &self,
        address: &PeripheralAddress,
        link: LinkId,
        path: CharacteristicPath,
        value: Vec<u8>,
    ) {
        let mut table = self.connection_table();
        let Some(connection) = table.by_link_mut(address, link) else {
            return;
        };
        if connection.state() != ConnectionState::Connected {
            return;
        }
        match connection
            .negotiation
            .subscriptions
            .get(&path.characteristic())
        {
            Some(subscription) if subscription.phase == SubscriptionPhase::Active => {
                subscription.events.emit(NotificationEvent::Value(value));
            }
            _ => trace!(%address, characteristic = %path.characteristic(), "dropping unrouted notification"),
        }
    }

    fn current_handle(
        &self,
        address: &PeripheralAddress,
        link: LinkId,
    ) -> Option<PeripheralHandle> {
        self.connection_table()
            .by_link_mut(address, link)
            .map(|connection| connection.handle().clone())
    }
}

fn connected_negotiation(
    connection: Option<&mut super::connection::ManagedConnection>,
) -> Result<&mut Negotiation, GattError> {
    match connection {
        Some(connection) if connection.state() == ConnectionState::Connected => {
            Ok(&mut connection.negotiation)
        }
        _ => Err(GattError::NotConnected),
    }
}
