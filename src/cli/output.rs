use std::fmt::Display;
use std::io;

use anyhow::Result;
use serde::Serialize;

use super::command::OutputFormat;

/// Writes command records either as terminal views or as JSON lines.
pub(crate) struct Output<'a, W> {
    out: &'a mut W,
    format: OutputFormat,
}

impl<'a, W> Output<'a, W>
where
    W: io::Write,
{
    pub(crate) fn new(out: &'a mut W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    /// Writes one record; `view` is only rendered in pretty mode.
    pub(crate) fn record<T>(&mut self, record: &T, view: impl Display) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        match self.format {
            OutputFormat::Pretty => writeln!(self.out, "{view}")?,
            OutputFormat::Json => {
                serde_json::to_writer(&mut *self.out, record)?;
                writeln!(self.out)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn json_mode_writes_one_object_per_line() {
        let mut buffer = Vec::new();
        let mut output = Output::new(&mut buffer, OutputFormat::Json);
        output
            .record(&json!({"event": "finished"}), "ignored")
            .expect("record should be written");
        output
            .record(&json!({"event": "value"}), "ignored")
            .expect("record should be written");

        assert_eq!(
            "{\"event\":\"finished\"}\n{\"event\":\"value\"}\n",
            String::from_utf8(buffer).expect("output should be utf-8")
        );
    }

    #[test]
    fn pretty_mode_writes_the_view() {
        let mut buffer = Vec::new();
        Output::new(&mut buffer, OutputFormat::Pretty)
            .record(&json!({}), "Scan finished")
            .expect("record should be written");

        assert_eq!("Scan finished\n", String::from_utf8(buffer).expect("output should be utf-8"));
    }
}
