use uuid::Uuid;

use crate::protocol::bluetooth_base_uuid;

/// Formats bytes as uppercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    bytes
        .iter()
        .map(|value| format!("{value:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Formats an optional RSSI for terminal output.
pub(crate) fn format_rssi(rssi: Option<i16>) -> String {
    match rssi {
        Some(value) => format!("{value} dBm"),
        None => "-".to_string(),
    }
}

/// Renders a UUID in its 16-bit short form when it sits on the Bluetooth base.
pub(crate) fn format_uuid(uuid: Uuid) -> String {
    let short = ((uuid.as_u128() >> 96) & 0xFFFF) as u16;
    if bluetooth_base_uuid(short) == uuid {
        format!("{short:04x}")
    } else {
        uuid.hyphenated().to_string()
    }
}

/// Parses a full UUID or a 16-bit short form such as `fff0` or `0x180d`.
pub(crate) fn parse_uuid(value: &str) -> Result<Uuid, String> {
    let trimmed = value.trim();
    let short = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if short.len() == 4 {
        return u16::from_str_radix(short, 16)
            .map(bluetooth_base_uuid)
            .map_err(|error| format!("invalid 16-bit UUID `{trimmed}`: {error}"));
    }

    Uuid::parse_str(trimmed).map_err(|error| format!("invalid UUID `{trimmed}`: {error}"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn format_hex_handles_empty_payload() {
        assert_eq!("<empty>", format_hex(&[]));
    }

    #[test]
    fn format_hex_formats_uppercase_pairs() {
        assert_eq!("05 00 A1 FF", format_hex(&[0x05, 0x00, 0xA1, 0xFF]));
    }

    #[rstest]
    #[case(None, "-")]
    #[case(Some(-61), "-61 dBm")]
    fn format_rssi_renders_known_and_unknown(#[case] rssi: Option<i16>, #[case] expected: &str) {
        assert_eq!(expected, format_rssi(rssi));
    }

    #[rstest]
    #[case("fff0", "0000fff0-0000-1000-8000-00805f9b34fb")]
    #[case("0x180D", "0000180d-0000-1000-8000-00805f9b34fb")]
    #[case(
        "6e400001-b5a3-f393-e0a9-e50e24dcca9e",
        "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
    )]
    fn parse_uuid_accepts_short_and_full_forms(#[case] raw: &str, #[case] expected: &str) {
        let parsed = parse_uuid(raw).expect("uuid should parse");
        assert_eq!(expected, parsed.hyphenated().to_string());
    }

    #[test]
    fn parse_uuid_rejects_garbage() {
        let error = parse_uuid("zzzz").expect_err("non-hex short form should fail");
        assert!(error.starts_with("invalid 16-bit UUID `zzzz`"));
    }

    #[rstest]
    #[case("fff1", "fff1")]
    #[case(
        "6e400001-b5a3-f393-e0a9-e50e24dcca9e",
        "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
    )]
    fn format_uuid_shortens_base_uuids(#[case] raw: &str, #[case] expected: &str) {
        let uuid = parse_uuid(raw).expect("uuid should parse");
        assert_eq!(expected, format_uuid(uuid));
    }
}
