use owo_colors::{OwoColorize, Style};

use crate::terminal::TerminalClient;
use crate::utils::{format_hex, format_rssi};

/// Signal strength at or above which a peripheral counts as close by.
const STRONG_RSSI_DBM: i16 = -60;
/// Signal strength below which a link is likely to drop.
const WEAK_RSSI_DBM: i16 = -80;

/// Role of a piece of text in a view.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Tone {
    Heading,
    Success,
    Warning,
    Muted,
    Value,
}

impl Tone {
    fn style(self) -> Style {
        match self {
            Self::Heading => Style::new().bold().cyan(),
            Self::Success => Style::new().bold().green(),
            Self::Warning => Style::new().bold().yellow(),
            Self::Muted => Style::new().dimmed(),
            Self::Value => Style::new().bold(),
        }
    }

    fn for_rssi(rssi: Option<i16>) -> Self {
        match rssi {
            None => Self::Muted,
            Some(dbm) if dbm >= STRONG_RSSI_DBM => Self::Success,
            Some(dbm) if dbm >= WEAK_RSSI_DBM => Self::Value,
            Some(_) => Self::Warning,
        }
    }
}

/// Colours view text when stdout is a terminal.
#[derive(Debug)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn for_terminal(terminal_client: &dyn TerminalClient) -> Self {
        Self::new(terminal_client.stdout_is_terminal())
    }

    pub(crate) fn paint<T: AsRef<str>>(&self, tone: Tone, text: T) -> String {
        let text = text.as_ref();
        if self.use_colour {
            text.style(tone.style()).to_string()
        } else {
            text.to_string()
        }
    }

    pub(crate) fn heading<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(Tone::Heading, text)
    }

    pub(crate) fn success<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(Tone::Success, text)
    }

    pub(crate) fn warning<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(Tone::Warning, text)
    }

    pub(crate) fn muted<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(Tone::Muted, text)
    }

    pub(crate) fn value<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(Tone::Value, text)
    }

    /// Signal strength, coloured by how usable the link is likely to be.
    pub(crate) fn rssi(&self, rssi: Option<i16>) -> String {
        self.paint(Tone::for_rssi(rssi), format_rssi(rssi))
    }

    /// Attribute bytes as `raw=..` hex.
    pub(crate) fn payload(&self, bytes: &[u8]) -> String {
        self.paint(Tone::Muted, format!("raw={}", format_hex(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::unknown(None, Tone::Muted)]
    #[case::strong(Some(-40), Tone::Success)]
    #[case::strong_boundary(Some(-60), Tone::Success)]
    #[case::usable(Some(-71), Tone::Value)]
    #[case::weak(Some(-81), Tone::Warning)]
    fn rssi_tone_tracks_signal_strength(#[case] rssi: Option<i16>, #[case] expected: Tone) {
        assert_eq!(expected, Tone::for_rssi(rssi));
    }

    #[test]
    fn plain_painter_leaves_text_untouched() {
        let painter = Painter::new(false);

        assert_eq!("-40 dBm", painter.rssi(Some(-40)));
        assert_eq!("raw=01 02", painter.payload(&[0x01, 0x02]));
        assert_eq!("Scan finished:", painter.heading("Scan finished:"));
    }

    #[rstest]
    #[case::heading(Tone::Heading)]
    #[case::success(Tone::Success)]
    #[case::warning(Tone::Warning)]
    #[case::muted(Tone::Muted)]
    #[case::value(Tone::Value)]
    fn colour_painter_wraps_text_in_escape_codes(#[case] tone: Tone) {
        let painter = Painter::new(true);
        let styled = painter.paint(tone, "AA:AA");
        assert_ne!("AA:AA", styled);
        assert!(styled.contains("AA:AA"));
    }
}
