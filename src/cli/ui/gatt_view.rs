use std::fmt::{self, Display, Formatter};

use crate::cli::gatt::{GattOperation, GattOutcome};
use crate::utils::format_uuid;

use super::painter::Painter;

/// Renders the result of a one-shot characteristic write or read.
pub(crate) struct GattOutcomeView<'a> {
    outcome: &'a GattOutcome,
    painter: &'a Painter,
}

impl<'a> GattOutcomeView<'a> {
    pub(crate) fn new(outcome: &'a GattOutcome, painter: &'a Painter) -> Self {
        Self { outcome, painter }
    }
}

impl Display for GattOutcomeView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let verb = match self.outcome.operation() {
            GattOperation::Write => "Wrote",
            GattOperation::Read => "Read",
        };
        write!(
            f,
            "{} {} {} {}",
            self.painter.success(verb),
            self.painter
                .value(format_uuid(self.outcome.characteristic())),
            self.painter.muted(format!("on {}", self.outcome.address())),
            self.painter.payload(self.outcome.value())
        )
    }
}
