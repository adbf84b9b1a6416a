use std::fmt::{self, Display, Formatter};

use crate::central::{PeripheralHandle, ServiceBinding};
use crate::cli::listen::{ListenStopReason, ListenSummary};
use crate::utils::format_uuid;

use super::painter::Painter;
use super::table::Table;

/// Renders the subscription that a listen session is receiving from.
pub(crate) struct ListenReadyView<'a> {
    handle: &'a PeripheralHandle,
    binding: &'a ServiceBinding,
    painter: &'a Painter,
}

impl<'a> ListenReadyView<'a> {
    pub(crate) fn new(
        handle: &'a PeripheralHandle,
        binding: &'a ServiceBinding,
        painter: &'a Painter,
    ) -> Self {
        Self {
            handle,
            binding,
            painter,
        }
    }
}

impl Display for ListenReadyView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let write_characteristic = match self.binding.write_characteristic() {
            Some(uuid) => self.painter.value(format_uuid(uuid)),
            None => self.painter.warning("<none>"),
        };
        let table = Table::key_value(
            self.painter,
            vec![
                ("session", self.painter.value(self.handle.to_string())),
                (
                    "service",
                    self.painter.value(format_uuid(self.binding.service())),
                ),
                (
                    "notify",
                    self.painter
                        .value(format_uuid(self.binding.notify_characteristic())),
                ),
                ("write", write_characteristic),
            ],
        );

        write!(f, "{}", self.painter.heading("Notifications enabled:"))?;
        write!(f, "\n{table}")
    }
}

/// Renders a single notification line.
pub(crate) struct ListenNotificationView<'a> {
    index: usize,
    payload: &'a [u8],
    painter: &'a Painter,
}

impl<'a> ListenNotificationView<'a> {
    pub(crate) fn new(index: usize, payload: &'a [u8], painter: &'a Painter) -> Self {
        Self {
            index,
            payload,
            painter,
        }
    }
}

impl Display for ListenNotificationView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let index_label = self.painter.muted(format!("[{:04}]", self.index));
        write!(
            f,
            "{index_label} {} {}",
            self.painter.value("Notification"),
            self.painter.payload(self.payload)
        )
    }
}

/// Renders the listen session summary.
pub(crate) struct ListenSummaryView<'a> {
    summary: &'a ListenSummary,
    painter: &'a Painter,
}

impl<'a> ListenSummaryView<'a> {
    pub(crate) fn new(summary: &'a ListenSummary, painter: &'a Painter) -> Self {
        Self { summary, painter }
    }
}

impl Display for ListenSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let stop_reason = self.summary.stop_reason();
        let stop_reason = match stop_reason {
            ListenStopReason::ReachedLimit { .. } => self.painter.success(stop_reason.to_string()),
            ListenStopReason::Interrupted | ListenStopReason::LinkClosed => {
                self.painter.warning(stop_reason.to_string())
            }
        };
        write!(
            f,
            "{} {} {}",
            self.painter.heading("Stopped:"),
            stop_reason,
            self.painter.value(format!(
                "- received {} notification(s)",
                self.summary.received_notifications()
            ))
        )
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use crate::hw::PeripheralAddress;

    use super::*;

    #[test]
    fn notification_formats_index_and_hex() {
        let painter = Painter::new(false);
        let payload = [0x02, 0x03];
        assert_snapshot!(
            ListenNotificationView::new(2, &payload, &painter).to_string(),
            @"[0002] Notification raw=02 03"
        );
    }

    #[test]
    fn notification_formats_empty_payload() {
        let painter = Painter::new(false);
        assert_snapshot!(
            ListenNotificationView::new(3, &[], &painter).to_string(),
            @"[0003] Notification raw=<empty>"
        );
    }

    #[test]
    fn summary_renders_limit() {
        let painter = Painter::new(false);
        let summary = ListenSummary::new(
            PeripheralAddress::new("AA:AA"),
            3,
            ListenStopReason::ReachedLimit { limit: 3 },
        );
        assert_snapshot!(
            ListenSummaryView::new(&summary, &painter).to_string(),
            @"Stopped: reached notification limit (3) - received 3 notification(s)"
        );
    }

    #[test]
    fn summary_renders_link_closed() {
        let painter = Painter::new(false);
        let summary = ListenSummary::new(
            PeripheralAddress::new("AA:AA"),
            1,
            ListenStopReason::LinkClosed,
        );
        assert_snapshot!(
            ListenSummaryView::new(&summary, &painter).to_string(),
            @"Stopped: connection closed - received 1 notification(s)"
        );
    }
}
