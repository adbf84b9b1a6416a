use std::fmt;
use std::io;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::app::{ConnectedPeripheral, SessionHandler};
use crate::central::{BleCentral, NotificationEvent, NotificationSuccessPolicy};
use crate::error::InteractionError;
use crate::hw::PeripheralAddress;

use super::output::Output;
use super::target::TargetArgs;
use super::ui::{ListenNotificationView, ListenReadyView, ListenSummaryView, Painter};

/// Arguments for the `listen` command.
#[derive(Debug, Args)]
pub struct ListenArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Stop after this many notifications. If omitted, listen until Ctrl+C.
    #[arg(long)]
    max_notifications: Option<usize>,
    /// When the subscription counts as enabled.
    #[arg(long, default_value_t = NotificationSuccessPolicy::Optimistic)]
    notification_policy: NotificationSuccessPolicy,
}

impl ListenArgs {
    /// Creates listen arguments for one characteristic of a peripheral.
    #[must_use]
    pub fn new(address: PeripheralAddress, service: Uuid, characteristic: Uuid) -> Self {
        Self {
            target: TargetArgs::new(address, service, characteristic),
            max_notifications: None,
            notification_policy: NotificationSuccessPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_max_notifications(mut self, max_notifications: usize) -> Self {
        self.max_notifications = Some(max_notifications);
        self
    }

    #[must_use]
    pub fn with_notification_policy(mut self, policy: NotificationSuccessPolicy) -> Self {
        self.notification_policy = policy;
        self
    }

    pub(crate) fn notification_policy(&self) -> NotificationSuccessPolicy {
        self.notification_policy
    }
}

/// Why a listen session stopped.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub(crate) enum ListenStopReason {
    ReachedLimit { limit: usize },
    Interrupted,
    LinkClosed,
}

impl fmt::Display for ListenStopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReachedLimit { limit } => write!(f, "reached notification limit ({limit})"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::LinkClosed => f.write_str("connection closed"),
        }
    }
}

/// Outcome of a listen session.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ListenSummary {
    address: PeripheralAddress,
    received_notifications: usize,
    stop_reason: ListenStopReason,
}

impl ListenSummary {
    pub(crate) fn new(
        address: PeripheralAddress,
        received_notifications: usize,
        stop_reason: ListenStopReason,
    ) -> Self {
        Self {
            address,
            received_notifications,
            stop_reason,
        }
    }

    pub(crate) fn received_notifications(&self) -> usize {
        self.received_notifications
    }

    pub(crate) fn stop_reason(&self) -> ListenStopReason {
        self.stop_reason
    }
}

/// Executes the `listen` command.
#[instrument(skip_all, level = "info", fields(address = %args.target.address()))]
pub(crate) async fn run<W>(
    central: &BleCentral,
    args: &ListenArgs,
    output: &mut Output<'_, W>,
    painter: &Painter,
) -> Result<()>
where
    W: io::Write,
{
    let peripheral = SessionHandler::new(central.clone())
        .with_scan_timeout(args.target.scan_timeout())
        .connect(args.target.address(), args.target.service())
        .await?;

    let listen_result = listen(&peripheral, args, output, painter).await;

    if let Err(error) = peripheral
        .central()
        .disable_notifications(peripheral.handle(), args.target.characteristic())
    {
        debug!(%error, "notifications were not disabled cleanly");
    }
    peripheral.close();

    let summary = listen_result?;
    output.record(&summary, ListenSummaryView::new(&summary, painter))?;
    Ok(())
}

async fn listen<W>(
    peripheral: &ConnectedPeripheral,
    args: &ListenArgs,
    output: &mut Output<'_, W>,
    painter: &Painter,
) -> Result<ListenSummary>
where
    W: io::Write,
{
    let handle = peripheral.handle();
    let mut notifications = peripheral.central().enable_notifications(
        handle,
        args.target.service(),
        args.target.characteristic(),
    )?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut received = 0usize;

    let stop_reason = loop {
        if let Some(limit) = args.max_notifications
            && received >= limit
        {
            break ListenStopReason::ReachedLimit { limit };
        }

        let maybe_event = tokio::select! {
            maybe_event = notifications.next() => maybe_event,
            result = &mut ctrl_c => {
                result.map_err(|source| InteractionError::CtrlC { source })?;
                info!("interrupted, stopping listen session");
                break ListenStopReason::Interrupted;
            }
        };
        let Some(event) = maybe_event else {
            break ListenStopReason::LinkClosed;
        };

        match &event {
            NotificationEvent::Enabled(binding) => {
                output.record(&event, ListenReadyView::new(handle, binding, painter))?;
            }
            NotificationEvent::Value(payload) => {
                received += 1;
                output.record(&event, ListenNotificationView::new(received, payload, painter))?;
            }
            NotificationEvent::Failed(failure) => {
                return Err(InteractionError::NotificationFailed(*failure).into());
            }
        }
    };

    Ok(ListenSummary::new(
        handle.address().clone(),
        received,
        stop_reason,
    ))
}
