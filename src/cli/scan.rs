use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio_stream::StreamExt;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::central::{BleCentral, DEFAULT_SCAN_DURATION_MILLIS, ScanEvent, ScanRequest};
use crate::error::InteractionError;
use crate::utils::parse_uuid;

use super::command::parse_duration;
use super::output::Output;
use super::ui::{DeviceLineView, DeviceTableView, Painter};

/// Arguments for the `scan` command.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Service UUID peripherals must advertise; 16-bit forms such as `fff0` are accepted.
    #[arg(long, value_parser = parse_uuid)]
    service: Uuid,
    /// How long to scan. `0s` scans until Ctrl+C.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    duration: Duration,
}

impl ScanArgs {
    /// Creates scan arguments with the default scan duration.
    #[must_use]
    pub fn new(service: Uuid) -> Self {
        Self {
            service,
            duration: Duration::from_millis(DEFAULT_SCAN_DURATION_MILLIS.unsigned_abs()),
        }
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub(crate) fn duration_millis(&self) -> i64 {
        i64::try_from(self.duration.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Executes the `scan` command.
#[instrument(skip_all, level = "info", fields(service = %args.service))]
pub(crate) async fn run<W>(
    central: &BleCentral,
    args: &ScanArgs,
    output: &mut Output<'_, W>,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    let request = ScanRequest::builder()
        .service_filter(args.service)
        .duration_millis(args.duration_millis())
        .build();
    let mut events = central.start_scan(request)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        let maybe_event = tokio::select! {
            maybe_event = events.next() => maybe_event,
            result = &mut ctrl_c, if !interrupted => {
                result.map_err(|source| InteractionError::CtrlC { source })?;
                info!("interrupted, stopping scan");
                interrupted = true;
                central.stop_scan();
                continue;
            }
        };
        let Some(event) = maybe_event else {
            break;
        };

        match &event {
            ScanEvent::DeviceDiscovered(record) => {
                output.record(&event, DeviceLineView::new(record, painter))?;
            }
            ScanEvent::BatchDiscovered(records) => {
                let lines = records
                    .iter()
                    .map(|record| DeviceLineView::new(record, painter).to_string())
                    .collect::<Vec<_>>()
                    .join("\n");
                output.record(&event, lines)?;
            }
            ScanEvent::Failed(failure) => {
                return Err(InteractionError::ScanFailed(*failure).into());
            }
            ScanEvent::Finished(records) => {
                output.record(&event, DeviceTableView::new(records, painter))?;
                break;
            }
        }
    }

    Ok(())
}
