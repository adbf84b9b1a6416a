use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{instrument, trace};

use super::config::CentralConfig;
use super::connection::ConnectionTable;
use super::dispatch::DispatcherHandle;
use super::scan::ScanSession;
use crate::hw::{BlePlatform, PlatformEvent, PlatformEventSource};

/// Owned BLE central context: scan session, connections, and negotiators over one platform.
///
/// Cloning is cheap and every clone drives the same state.
#[derive(Debug, Clone)]
pub struct BleCentral {
    inner: Arc<CentralInner>,
}

#[derive(Debug)]
pub(super) struct CentralInner {
    platform: Arc<dyn BlePlatform>,
    config: CentralConfig,
    scan: Mutex<ScanSession>,
    connections: Mutex<ConnectionTable>,
}

impl BleCentral {
    /// Creates a central with default configuration.
    #[must_use]
    pub fn new(platform: Arc<dyn BlePlatform>) -> Self {
        Self::with_config(platform, CentralConfig::default())
    }

    #[must_use]
    pub fn with_config(platform: Arc<dyn BlePlatform>, config: CentralConfig) -> Self {
        Self {
            inner: Arc::new(CentralInner {
                platform,
                config,
                scan: Mutex::new(ScanSession::default()),
                connections: Mutex::new(ConnectionTable::default()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> CentralConfig {
        self.inner.config
    }

    /// Spawns a task feeding callbacks from `source` into this central.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn_dispatcher(&self, source: PlatformEventSource) -> DispatcherHandle {
        DispatcherHandle::spawn(self.clone(), source)
    }

    /// Routes one platform callback to the component that owns it.
    ///
    /// Safe to call from any thread. Callbacks for stopped scans, or tagged
    /// with a link other than the current session's, are dropped.
    #[instrument(skip_all, level = "trace")]
    pub fn handle_platform_event(&self, event: PlatformEvent) {
        trace!(?event, "platform event");
        match event {
            PlatformEvent::ScanResult(record) => self.on_scan_result(record),
            PlatformEvent::BatchScanResults { records } => self.on_batch_scan_results(records),
            PlatformEvent::ScanFailed { error_code } => self.on_scan_failed(error_code),
            PlatformEvent::ConnectionStateChanged {
                address,
                link,
                status,
                new_state,
            } => self.on_connection_state_changed(&address, link, status, new_state),
            PlatformEvent::ServicesDiscovered {
                address,
                link,
                status,
                services,
            } => self.on_services_discovered(&address, link, status, services),
            PlatformEvent::DescriptorWritten {
                address,
                link,
                characteristic,
                descriptor,
                status,
            } => self.on_descriptor_written(&address, link, characteristic, descriptor, status),
            PlatformEvent::CharacteristicWritten {
                address,
                link,
                characteristic,
                status,
            } => self.on_characteristic_written(&address, link, characteristic, status),
            PlatformEvent::CharacteristicRead {
                address,
                link,
                characteristic,
                status,
                value,
            } => self.on_characteristic_read(&address, link, characteristic, status, value),
            PlatformEvent::CharacteristicChanged {
                address,
                link,
                characteristic,
                value,
            } => self.on_characteristic_changed(&address, link, characteristic, value),
        }
    }

    pub(super) fn platform(&self) -> &dyn BlePlatform {
        self.inner.platform.as_ref()
    }

    pub(super) fn scan_session(&self) -> MutexGuard<'_, ScanSession> {
        self.inner
            .scan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn connection_table(&self) -> MutexGuard<'_, ConnectionTable> {
        self.inner
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn downgrade(&self) -> Weak<CentralInner> {
        Arc::downgrade(&self.inner)
    }

    pub(super) fn upgrade(inner: &Weak<CentralInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }
}
