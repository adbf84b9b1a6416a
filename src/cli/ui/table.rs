use std::fmt::{self, Display, Formatter};

use tabled::{builder::Builder, settings::Style};

use super::painter::Painter;

/// Rounded table rendered through `Display`.
#[derive(Debug)]
pub(crate) struct Table {
    headers: Option<Vec<String>>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Column table with a header row, used for scan listings.
    pub(crate) fn grid(
        headers: impl IntoIterator<Item = impl Into<String>>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        Self {
            headers: Some(headers.into_iter().map(Into::into).collect()),
            rows,
        }
    }

    /// Headerless two-column table with muted field names.
    pub(crate) fn key_value(painter: &Painter, rows: Vec<(&str, String)>) -> Self {
        let rows = rows
            .into_iter()
            .map(|(field, value)| vec![painter.muted(field), value])
            .collect();
        Self {
            headers: None,
            rows,
        }
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        if let Some(headers) = &self.headers {
            builder.push_record(headers);
        }
        for row in &self.rows {
            builder.push_record(row);
        }
        let mut table = builder.build();
        match self.headers {
            Some(_) => table.with(Style::rounded()),
            None => table.with(Style::rounded().remove_horizontals()),
        };
        write!(f, "{table}")
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn grid_pads_columns_to_the_widest_cell() {
        let table = Table::grid(
            ["address", "rssi"],
            vec![
                vec!["AA:AA".into(), "-40 dBm".into()],
                vec!["BB:BB".into(), "-".into()],
            ],
        );
        assert_snapshot!(table.to_string(), @r"
        ╭─────────┬─────────╮
        │ address │ rssi    │
        ├─────────┼─────────┤
        │ AA:AA   │ -40 dBm │
        │ BB:BB   │ -       │
        ╰─────────┴─────────╯
        ");
    }

    #[test]
    fn key_value_has_no_header_row() {
        let painter = Painter::new(false);
        let table = Table::key_value(
            &painter,
            vec![("session", "AA:AA#1".into()), ("write", "<none>".into())],
        );
        assert_snapshot!(table.to_string(), @r"
        ╭─────────┬─────────╮
        │ session │ AA:AA#1 │
        │ write   │ <none>  │
        ╰─────────┴─────────╯
        ");
    }
}
