use time::OffsetDateTime;
use time::macros::format_description;

/// Formats bytes as lowercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    bytes
        .iter()
        .map(|value| format!("{value:02x}"))
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

/// Returns the payload as text when it is valid UTF-8 made of printable
/// characters.
pub(crate) fn printable_text(bytes: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(bytes).ok()?;
    if text.is_empty() || text.chars().any(|value| value.is_control() && value != ' ') {
        return None;
    }
    Some(text)
}

/// Renders a value every way an operator may want to read it.
///
/// Hex and length always come first. The text line appears for printable
/// UTF-8 and integer lines appear for 1, 2, and 4 byte payloads.
pub(crate) fn describe_value(bytes: &[u8]) -> Vec<String> {
    let mut lines = vec![
        format!("Value (hex): {}", format_hex(bytes)),
        format!("Length: {} bytes", bytes.len()),
    ];
    if let Some(text) = printable_text(bytes) {
        lines.push(format!("Value (string): {text}"));
    }

    match *bytes {
        [value] => lines.push(format!("Value (uint8): {value}")),
        [first, second] => {
            lines.push(format!(
                "Value (uint16 LE): {}",
                u16::from_le_bytes([first, second])
            ));
            lines.push(format!(
                "Value (uint16 BE): {}",
                u16::from_be_bytes([first, second])
            ));
        }
        [a, b, c, d] => {
            lines.push(format!(
                "Value (uint32 LE): {}",
                u32::from_le_bytes([a, b, c, d])
            ));
            lines.push(format!(
                "Value (uint32 BE): {}",
                u32::from_be_bytes([a, b, c, d])
            ));
        }
        _ => {}
    }
    lines
}

/// Renders one notification as a single operator log line.
pub(crate) fn notification_line(timestamp: &str, uuid: &str, value: &[u8]) -> String {
    let mut line = format!("[{timestamp}] [NOTIFY] {uuid}: {}", format_hex(value));
    if let Some(text) = printable_text(value) {
        line.push_str(" | string: ");
        line.push_str(text);
    }
    line
}

/// Returns the local wall-clock time with millisecond precision.
pub(crate) fn timestamp_now() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[hour]:[minute]:[second].[subsecond digits:3]"
    ))
    .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
