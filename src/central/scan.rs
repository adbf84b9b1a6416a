use std::time::Duration;

use bon::Builder;
use serde::Serialize;
use strum_macros::Display;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::context::BleCentral;
use super::dispatch::{EventSender, EventStream, event_channel};
use super::registry::DeviceRegistry;
use crate::error::{PlatformError, ScanError, ScanFailure};
use crate::hw::{ScanRecord, ScanSettings};

/// Scan length used when a request does not set one.
pub const DEFAULT_SCAN_DURATION_MILLIS: i64 = 10_000;

/// Events delivered on a scan session stream.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ScanEvent {
    /// First sighting of an address in this session.
    DeviceDiscovered(ScanRecord),
    /// Platform-batched sightings, passed through without deduplication.
    BatchDiscovered(Vec<ScanRecord>),
    /// The session could not start or was aborted by the platform. Terminal.
    Failed(ScanFailure),
    /// The session stopped; carries first sightings in discovery order. Terminal.
    Finished(Vec<ScanRecord>),
}

/// Lifecycle of the current scan session.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Active,
    Stopped,
}

/// Parameters for [`BleCentral::start_scan`].
#[derive(Debug, Clone, Builder)]
pub struct ScanRequest {
    service_filter: Uuid,
    /// Positive values stop the scan automatically; zero or less scans until stopped.
    #[builder(default = DEFAULT_SCAN_DURATION_MILLIS)]
    duration_millis: i64,
    settings: Option<ScanSettings>,
}

impl ScanRequest {
    #[must_use]
    pub fn service_filter(&self) -> Uuid {
        self.service_filter
    }

    /// Returns the auto-stop interval, or `None` for an open-ended scan.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        u64::try_from(self.duration_millis)
            .ok()
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
    }
}

#[derive(Debug, Default)]
pub(crate) struct ScanSession {
    generation: u64,
    state: ScanState,
    registry: DeviceRegistry,
    events: Option<EventSender<ScanEvent>>,
    timer: Option<CancellationToken>,
}

impl ScanSession {
    fn is_active(&self, generation: u64) -> bool {
        self.generation == generation && self.state == ScanState::Active
    }

    /// Moves the session to Stopped and hands back its sender so the caller can emit the terminal event.
    fn stop(&mut self) -> Option<EventSender<ScanEvent>> {
        self.state = ScanState::Stopped;
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.events.take()
    }
}

impl BleCentral {
    /// Starts a scan session, replacing any session already running.
    ///
    /// A replaced active session receives its `Finished` event first. Start
    /// failures are reported on the returned stream as [`ScanEvent::Failed`].
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::NoRuntime`] when a timed scan is requested outside
    /// a tokio runtime.
    #[instrument(
        skip(self, request),
        level = "info",
        fields(service = %request.service_filter, duration = ?request.duration())
    )]
    pub fn start_scan(&self, request: ScanRequest) -> Result<EventStream<ScanEvent>, ScanError> {
        let runtime = match request.duration() {
            Some(_) => Some(Handle::try_current().map_err(|_error| ScanError::NoRuntime)?),
            None => None,
        };
        let settings = request
            .settings
            .unwrap_or_else(|| self.config().scan_settings());
        let (sender, stream) = event_channel();

        let (generation, replaced_active) = {
            let mut session = self.scan_session();
            let replaced_active = session.state == ScanState::Active;
            if replaced_active {
                let devices = session.registry.devices().to_vec();
                if let Some(previous) = session.stop() {
                    previous.emit(ScanEvent::Finished(devices));
                }
            }
            session.generation += 1;
            session.state = ScanState::Active;
            session.registry.reset();
            session.events = Some(sender);
            (session.generation, replaced_active)
        };

        if replaced_active {
            debug!("superseding active scan session");
            self.stop_platform_scan();
        }

        if !self.platform().adapter_enabled() {
            warn!("cannot scan while the adapter is disabled");
            self.fail_scan(generation, ScanFailure::AdapterDisabled);
            return Ok(stream);
        }

        if let Err(error) = self
            .platform()
            .start_scan(request.service_filter, &settings)
        {
            warn!(%error, "platform refused to start scanning");
            let failure = match error {
                PlatformError::AdapterUnavailable => ScanFailure::AdapterDisabled,
                PlatformError::UnknownPeripheral { .. } | PlatformError::Refused { .. } => {
                    ScanFailure::InternalError
                }
            };
            self.fail_scan(generation, failure);
            return Ok(stream);
        }

        if let (Some(duration), Some(runtime)) = (request.duration(), runtime) {
            self.arm_scan_timer(&runtime, generation, duration);
        }

        info!(generation, "scan session started");
        Ok(stream)
    }

    /// Stops the active scan session, emitting its `Finished` event. No-op otherwise.
    #[instrument(skip(self), level = "info")]
    pub fn stop_scan(&self) {
        let generation = self.scan_session().generation;
        self.finish_scan(generation);
    }

    #[must_use]
    pub fn scan_state(&self) -> ScanState {
        self.scan_session().state
    }

    /// Returns first sightings of the current (or most recent) session in discovery order.
    #[must_use]
    pub fn discovered_devices(&self) -> Vec<ScanRecord> {
        self.scan_session().registry.devices().to_vec()
    }

    fn arm_scan_timer(&self, runtime: &Handle, generation: u64, duration: Duration) {
        let token = CancellationToken::new();
        {
            let mut session = self.scan_session();
            if !session.is_active(generation) {
                return;
            }
            session.timer = Some(token.clone());
        }

        let central = self.downgrade();
        runtime.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(duration) => {
                    if let Some(central) = BleCentral::upgrade(&central) {
                        debug!(generation, "scan duration elapsed");
                        central.finish_scan(generation);
                    }
                }
            }
        });
    }

    fn finish_scan(&self, generation: u64) {
        {
            let mut session = self.scan_session();
            if !session.is_active(generation) {
                return;
            }
            let devices = session.registry.devices().to_vec();
            if let Some(events) = session.stop() {
                info!(device_count = devices.len(), "scan session finished");
                events.emit(ScanEvent::Finished(devices));
            }
        }

        self.stop_platform_scan();
    }

    fn fail_scan(&self, generation: u64, failure: ScanFailure) {
        let mut session = self.scan_session();
        if !session.is_active(generation) {
            return;
        }
        if let Some(events) = session.stop() {
            events.emit(ScanEvent::Failed(failure));
        }
    }

    fn stop_platform_scan(&self) {
        if let Err(error) = self.platform().stop_scan() {
            debug!(%error, "failed to stop platform scan cleanly");
        }
    }

    pub(super) fn on_scan_result(&self, record: ScanRecord) {
        let mut session = self.scan_session();
        if session.state != ScanState::Active {
            return;
        }
        if session.registry.insert(&record) {
            debug!(address = %record.address(), "discovered peripheral");
            if let Some(events) = &session.events {
                events.emit(ScanEvent::DeviceDiscovered(record));
            }
        }
    }

    pub(super) fn on_batch_scan_results(&self, records: Vec<ScanRecord>) {
        let session = self.scan_session();
        if session.state != ScanState::Active {
            return;
        }
        if let Some(events) = &session.events {
            events.emit(ScanEvent::BatchDiscovered(records));
        }
    }

    pub(super) fn on_scan_failed(&self, error_code: i32) {
        let failure = ScanFailure::from_code(error_code);
        warn!(error_code, %failure, "platform reported scan failure");
        let generation = self.scan_session().generation;
        self.fail_scan(generation, failure);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(10_000, Some(Duration::from_secs(10)))]
    #[case(1, Some(Duration::from_millis(1)))]
    #[case(0, None)]
    #[case(-5, None)]
    fn scan_request_duration_treats_non_positive_as_unbounded(
        #[case] millis: i64,
        #[case] expected: Option<Duration>,
    ) {
        let request = ScanRequest::builder()
            .service_filter(Uuid::nil())
            .duration_millis(millis)
            .build();
        assert_eq!(expected, request.duration());
    }

    #[test]
    fn scan_request_defaults_to_ten_seconds() {
        let request = ScanRequest::builder().service_filter(Uuid::nil()).build();
        assert_eq!(Some(Duration::from_secs(10)), request.duration());
    }
}
