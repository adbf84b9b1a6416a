use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::context::BleCentral;
use super::dispatch::{EventSender, EventStream, event_channel};
use super::negotiator::Negotiation;
use crate::error::{ConnectionError, ConnectionFailure};
use crate::hw::{CacheInvalidation, LinkId, LinkState, PeripheralAddress};
use crate::protocol::status;

/// Identifies one connection attempt to a peripheral.
///
/// Every [`BleCentral::connect`] call allocates a fresh session number, so a
/// handle from an earlier attempt never addresses a later connection.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
pub struct PeripheralHandle {
    address: PeripheralAddress,
    session: u64,
}

impl PeripheralHandle {
    #[must_use]
    pub fn address(&self) -> &PeripheralAddress {
        &self.address
    }

    #[must_use]
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Platform link this session's callbacks are tagged with.
    #[must_use]
    pub fn link(&self) -> LinkId {
        LinkId::new(self.session)
    }
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.session)
    }
}

/// State of one connection session.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display, Serialize)]
#[serde(tag = "state", content = "failure", rename_all = "snake_case")]
pub enum ConnectionState {
    #[display("connecting")]
    Connecting,
    #[display("connected")]
    Connected,
    #[display("disconnecting")]
    Disconnecting,
    #[display("disconnected")]
    Disconnected,
    #[display("failed: {_0}")]
    Failed(ConnectionFailure),
}

impl ConnectionState {
    /// Returns whether the session still occupies its address.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Disconnecting
        )
    }
}

/// Events delivered on a connection stream.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    Connecting { handle: PeripheralHandle },
    Connected { handle: PeripheralHandle },
    /// Orderly disconnect. Terminal unless the session was opened with auto-connect.
    Disconnected { handle: PeripheralHandle },
    /// Abnormal teardown; the transport has already been released. Terminal.
    Failed {
        handle: PeripheralHandle,
        failure: ConnectionFailure,
    },
}

#[derive(Debug, Default)]
pub(crate) struct ConnectionTable {
    next_session: u64,
    connections: HashMap<PeripheralAddress, ManagedConnection>,
}

impl ConnectionTable {
    /// Returns the connection only if `handle` names its current session.
    pub(super) fn session(&self, handle: &PeripheralHandle) -> Option<&ManagedConnection> {
        self.connections
            .get(&handle.address)
            .filter(|connection| connection.handle.session == handle.session)
    }

    pub(super) fn session_mut(
        &mut self,
        handle: &PeripheralHandle,
    ) -> Option<&mut ManagedConnection> {
        self.connections
            .get_mut(&handle.address)
            .filter(|connection| connection.handle.session == handle.session)
    }

    /// Returns the connection only if `link` is the one its current session opened.
    pub(super) fn by_link_mut(
        &mut self,
        address: &PeripheralAddress,
        link: LinkId,
    ) -> Option<&mut ManagedConnection> {
        self.connections
            .get_mut(address)
            .filter(|connection| connection.handle.link() == link)
    }
}

#[derive(Debug)]
pub(crate) struct ManagedConnection {
    handle: PeripheralHandle,
    state: ConnectionState,
    auto_connect: bool,
    events: Option<EventSender<ConnectionEvent>>,
    pub(super) negotiation: Negotiation,
}

impl ManagedConnection {
    pub(super) fn handle(&self) -> &PeripheralHandle {
        &self.handle
    }

    pub(super) fn state(&self) -> ConnectionState {
        self.state
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

impl BleCentral {
    /// Starts connecting to a peripheral.
    ///
    /// Returns the new session's handle and its event stream, which opens with
    /// [`ConnectionEvent::Connecting`]. A platform refusal is reported on the
    /// stream as [`ConnectionEvent::Failed`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::AlreadyActive`] while an earlier session on
    /// the same address is connecting, connected, or disconnecting.
    #[instrument(skip(self), level = "info", fields(%address))]
    pub fn connect(
        &self,
        address: PeripheralAddress,
        auto_connect: bool,
    ) -> Result<(PeripheralHandle, EventStream<ConnectionEvent>), ConnectionError> {
        let (sender, stream) = event_channel();
        let (handle, release_stale_transport) = {
            let mut table = self.connection_table();
            let release_stale_transport = match table.connections.get(&address) {
                Some(existing) if existing.state.is_active() => {
                    return Err(ConnectionError::AlreadyActive { address });
                }
                Some(existing) => existing.state == ConnectionState::Disconnected,
                None => false,
            };

            table.next_session += 1;
            let handle = PeripheralHandle {
                address: address.clone(),
                session: table.next_session,
            };
            sender.emit(ConnectionEvent::Connecting {
                handle: handle.clone(),
            });
            table.connections.insert(
                address.clone(),
                ManagedConnection {
                    handle: handle.clone(),
                    state: ConnectionState::Connecting,
                    auto_connect,
                    events: Some(sender),
                    negotiation: Negotiation::default(),
                },
            );
            (handle, release_stale_transport)
        };

        if release_stale_transport {
            debug!("releasing transport of previous disconnected session");
            self.platform().close(&address);
        }

        if let Err(error) = self.platform().connect(&address, handle.link(), auto_connect) {
            warn!(%error, "platform refused to connect");
            self.fail_connection(
                &address,
                handle.link(),
                ConnectionFailure::classify(status::GATT_FAILURE),
            );
        } else {
            info!(%handle, "connecting");
        }

        Ok((handle, stream))
    }

    /// Disconnects and releases the transport for a handle in any state.
    ///
    /// Idempotent. Afterwards no event for this handle is delivered: its
    /// streams end and pending requests resolve as cancelled.
    #[instrument(skip(self), level = "info", fields(%handle))]
    pub fn close(&self, handle: &PeripheralHandle) {
        let removed = {
            let mut table = self.connection_table();
            if table.session(handle).is_none() {
                debug!("handle already closed");
                return;
            }
            table.connections.remove(&handle.address)
        };
        let Some(removed) = removed else {
            return;
        };

        if removed.state.is_active() {
            self.disconnect_quietly(&handle.address);
        }
        if !matches!(removed.state, ConnectionState::Failed(_)) {
            self.platform().close(&handle.address);
        }
        info!(state = %removed.state, "connection closed");
    }

    /// Returns the current state of a handle, or `None` once it is closed or replaced.
    #[must_use]
    pub fn connection_state(&self, handle: &PeripheralHandle) -> Option<ConnectionState> {
        self.connection_table()
            .session(handle)
            .map(ManagedConnection::state)
    }

    pub(super) fn on_connection_state_changed(
        &self,
        address: &PeripheralAddress,
        link: LinkId,
        gatt_status: i32,
        new_state: LinkState,
    ) {
        if gatt_status != status::GATT_SUCCESS {
            let failure = ConnectionFailure::classify(gatt_status);
            warn!(%address, %link, gatt_status, %failure, "connection failed");
            self.fail_connection(address, link, failure);
            return;
        }

        let mut table = self.connection_table();
        let Some(connection) = table.by_link_mut(address, link) else {
            debug!(%address, %link, %new_state, "dropping link state change for a stale link");
            return;
        };
        let resumable = connection.auto_connect && connection.state == ConnectionState::Disconnected;

        match new_state {
            LinkState::Connected => {
                if connection.state == ConnectionState::Connecting || resumable {
                    connection.state = ConnectionState::Connected;
                    info!(handle = %connection.handle, "connected");
                    connection.emit(ConnectionEvent::Connected {
                        handle: connection.handle.clone(),
                    });
                }
            }
            LinkState::Disconnected => {
                if connection.state.is_active() {
                    connection.state = ConnectionState::Disconnected;
                    connection.negotiation.connection_lost();
                    info!(handle = %connection.handle, "disconnected");
                    connection.emit(ConnectionEvent::Disconnected {
                        handle: connection.handle.clone(),
                    });
                    if !connection.auto_connect {
                        connection.events = None;
                    }
                }
            }
            LinkState::Connecting => {
                if connection.state.is_active() || resumable {
                    connection.state = ConnectionState::Connecting;
                }
            }
            LinkState::Disconnecting => {
                if connection.state.is_active() {
                    connection.state = ConnectionState::Disconnecting;
                }
            }
        }
    }

    /// Tears down a session after an abnormal status.
    ///
    /// Cache invalidation happens before the transport is closed, and both
    /// happen before the `Failed` event is delivered.
    fn fail_connection(
        &self,
        address: &PeripheralAddress,
        link: LinkId,
        failure: ConnectionFailure,
    ) {
        let handle = {
            let mut table = self.connection_table();
            let Some(connection) = table.by_link_mut(address, link) else {
                return;
            };
            if matches!(connection.state, ConnectionState::Failed(_)) {
                return;
            }
            connection.state = ConnectionState::Failed(failure);
            connection.negotiation.connection_lost();
            connection.handle.clone()
        };

        match self.platform().invalidate_cache(address) {
            CacheInvalidation::Invalidated => debug!(%address, "attribute cache invalidated"),
            outcome => debug!(%address, %outcome, "attribute cache not invalidated"),
        }
        self.disconnect_quietly(address);
        self.platform().close(address);

        let mut table = self.connection_table();
        if let Some(connection) = table.session_mut(&handle) {
            connection.emit(ConnectionEvent::Failed {
                handle: handle.clone(),
                failure,
            });
            connection.events = None;
        }
    }

    fn disconnect_quietly(&self, address: &PeripheralAddress) {
        if let Err(error) = self.platform().disconnect(address) {
            debug!(%address, %error, "failed to disconnect cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn handle_display_includes_session() {
        let handle = PeripheralHandle {
            address: PeripheralAddress::new("aa:bb"),
            session: 7,
        };
        assert_eq!("AA:BB#7", handle.to_string());
    }

    #[rstest]
    #[case(ConnectionState::Connecting, true)]
    #[case(ConnectionState::Connected, true)]
    #[case(ConnectionState::Disconnecting, true)]
    #[case(ConnectionState::Disconnected, false)]
    #[case(ConnectionState::Failed(ConnectionFailure::Timeout), false)]
    fn active_states_block_a_second_connect(#[case] state: ConnectionState, #[case] active: bool) {
        assert_eq!(active, state.is_active());
    }

    #[rstest]
    #[case(ConnectionState::Connecting, "connecting")]
    #[case(ConnectionState::Disconnecting, "disconnecting")]
    #[case(ConnectionState::Disconnected, "disconnected")]
    fn states_render_in_lower_case(#[case] state: ConnectionState, #[case] expected: &str) {
        assert_eq!(expected, state.to_string());
    }

    #[test]
    fn handle_link_follows_its_session() {
        let handle = PeripheralHandle {
            address: PeripheralAddress::new("aa:bb"),
            session: 7,
        };
        assert_eq!(LinkId::new(7), handle.link());
    }

    #[test]
    fn failed_state_renders_its_reason() {
        assert_eq!(
            "failed: device is out of range (status 8)",
            ConnectionState::Failed(ConnectionFailure::OutOfRange).to_string()
        );
    }
}
