use std::fmt::{self, Display, Formatter};

use crate::hw::ScanRecord;
use crate::utils::{format_rssi, format_uuid};

use super::painter::Painter;
use super::table::Table;

/// Renders one newly discovered peripheral as a single line.
pub(crate) struct DeviceLineView<'a> {
    record: &'a ScanRecord,
    painter: &'a Painter,
}

impl<'a> DeviceLineView<'a> {
    pub(crate) fn new(record: &'a ScanRecord, painter: &'a Painter) -> Self {
        Self { record, painter }
    }
}

impl Display for DeviceLineView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let advertisement = self.record.advertisement();
        write!(
            f,
            "{} {} {} {}",
            self.painter.success("+"),
            self.painter.value(self.record.address().as_str()),
            advertisement.local_name().unwrap_or("<unknown>"),
            self.painter.rssi(advertisement.rssi())
        )
    }
}

/// Renders every peripheral of a finished scan as a table.
pub(crate) struct DeviceTableView<'a> {
    records: &'a [ScanRecord],
    painter: &'a Painter,
}

impl<'a> DeviceTableView<'a> {
    pub(crate) fn new(records: &'a [ScanRecord], painter: &'a Painter) -> Self {
        Self { records, painter }
    }
}

impl Display for DeviceTableView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.painter.heading("Scan finished:"),
            self.painter
                .value(format!("{} device(s) discovered", self.records.len()))
        )?;
        if self.records.is_empty() {
            return Ok(());
        }

        let rows = self
            .records
            .iter()
            .map(|record| {
                let advertisement = record.advertisement();
                let services = advertisement
                    .service_uuids()
                    .iter()
                    .map(|uuid| format_uuid(*uuid))
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![
                    record.address().to_string(),
                    advertisement.local_name().unwrap_or("<unknown>").to_string(),
                    format_rssi(advertisement.rssi()),
                    services,
                ]
            })
            .collect();
        let table = Table::grid(["address", "name", "rssi", "services"], rows);
        write!(f, "\n{table}")
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use crate::hw::{Advertisement, PeripheralAddress};
    use crate::protocol::bluetooth_base_uuid;

    use super::*;

    fn record(address: &str, name: Option<&str>, rssi: Option<i16>) -> ScanRecord {
        ScanRecord::new(
            PeripheralAddress::new(address),
            Advertisement::builder()
                .maybe_local_name(name.map(String::from))
                .maybe_rssi(rssi)
                .service_uuids(vec![bluetooth_base_uuid(0xfff0)])
                .build(),
        )
    }

    #[test]
    fn device_line_shows_address_name_and_rssi() {
        let painter = Painter::new(false);
        let record = record("AA:AA", Some("Thermo"), Some(-40));
        assert_snapshot!(
            DeviceLineView::new(&record, &painter).to_string(),
            @"+ AA:AA Thermo -40 dBm"
        );
    }

    #[test]
    fn device_line_marks_missing_fields() {
        let painter = Painter::new(false);
        let record = record("BB:BB", None, None);
        assert_snapshot!(
            DeviceLineView::new(&record, &painter).to_string(),
            @"+ BB:BB <unknown> -"
        );
    }

    #[test]
    fn device_table_lists_first_sightings() {
        let painter = Painter::new(false);
        let records = vec![
            record("AA:AA", Some("Thermo"), Some(-40)),
            record("BB:BB", None, Some(-71)),
        ];
        assert_snapshot!(DeviceTableView::new(&records, &painter).to_string(), @r"
        Scan finished: 2 device(s) discovered
        ╭─────────┬───────────┬─────────┬──────────╮
        │ address │ name      │ rssi    │ services │
        ├─────────┼───────────┼─────────┼──────────┤
        │ AA:AA   │ Thermo    │ -40 dBm │ fff0     │
        │ BB:BB   │ <unknown> │ -71 dBm │ fff0     │
        ╰─────────┴───────────┴─────────┴──────────╯
        ");
    }

    #[test]
    fn device_table_omits_grid_when_nothing_was_found() {
        let painter = Painter::new(false);
        assert_snapshot!(
            DeviceTableView::new(&[], &painter).to_string(),
            @"Scan finished: 0 device(s) discovered"
        );
    }
}
