use crate::error::ConfigurationError;

const BASE_UUID_PREFIX: &str = "0000";
const BASE_UUID_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// Canonicalises a 16-bit or 128-bit UUID string into dashed lowercase form.
///
/// Dashes and spaces are stripped first. Four remaining characters expand
/// into the Bluetooth base UUID, 32 are re-dashed 8-4-4-4-12, and anything
/// else, including non-ASCII text, comes back lowercased so that lookups
/// against it simply miss.
#[must_use]
pub fn normalize_uuid(raw: &str) -> String {
    let cleaned = strip_separators(raw).to_ascii_lowercase();
    if !cleaned.is_ascii() {
        return raw.to_ascii_lowercase();
    }
    match cleaned.len() {
        4 => format!("{BASE_UUID_PREFIX}{cleaned}{BASE_UUID_SUFFIX}"),
        32 => format!(
            "{}-{}-{}-{}-{}",
            &cleaned[0..8],
            &cleaned[8..12],
            &cleaned[12..16],
            &cleaned[16..20],
            &cleaned[20..32]
        ),
        _ => raw.to_ascii_lowercase(),
    }
}

/// Validates an advertised-service filter and returns its normalised form.
///
/// # Errors
///
/// Returns an error when the filter is not hexadecimal or is neither 4 nor
/// 32 digits long.
pub fn parse_service_filter(raw: &str) -> Result<String, ConfigurationError> {
    let cleaned = strip_separators(raw.trim());
    if cleaned.is_empty() || !cleaned.chars().all(|value| value.is_ascii_hexdigit()) {
        return Err(ConfigurationError::InvalidUuidHex {
            value: raw.to_string(),
        });
    }
    if !matches!(cleaned.len(), 4 | 32) {
        return Err(ConfigurationError::InvalidUuidLength {
            length: cleaned.len(),
        });
    }
    Ok(normalize_uuid(&cleaned))
}

/// Returns the 16-bit short form when a UUID sits on the Bluetooth base UUID.
pub(crate) fn short_uuid(normalized: &str) -> Option<u16> {
    let short = normalized
        .strip_prefix(BASE_UUID_PREFIX)?
        .strip_suffix(BASE_UUID_SUFFIX)?;
    if short.len() != 4 {
        return None;
    }
    u16::from_str_radix(short, 16).ok()
}

fn strip_separators(raw: &str) -> String {
    raw.chars()
        .filter(|value| *value != '-' && *value != ' ')
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("180D", "0000180d-0000-1000-8000-00805f9b34fb")]
    #[case("2a37", "00002a37-0000-1000-8000-00805f9b34fb")]
    #[case("2A 37", "00002a37-0000-1000-8000-00805f9b34fb")]
    #[case("ffff", "0000ffff-0000-1000-8000-00805f9b34fb")]
    fn short_uuids_expand_into_base_uuid(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(expected, normalize_uuid(raw));
    }

    #[rstest]
    #[case(
        "D44BC439ABFD45A2B575925416129600",
        "d44bc439-abfd-45a2-b575-925416129600"
    )]
    #[case(
        "d44bc439-ABFD-45a2-b575-925416129600",
        "d44bc439-abfd-45a2-b575-925416129600"
    )]
    fn long_uuids_are_dashed_8_4_4_4_12(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(expected, normalize_uuid(raw));
    }

    #[rstest]
    #[case("0000180d-0000-1000-8000-00805f9b34fb")]
    #[case("d44bc439-abfd-45a2-b575-925416129600")]
    fn normalisation_is_idempotent(#[case] normalized: &str) {
        assert_eq!(normalized, normalize_uuid(normalized));
        assert_eq!(normalize_uuid(normalized), normalize_uuid(&normalize_uuid(normalized)));
    }

    #[rstest]
    #[case("18D")]
    #[case("Heart-Rate")]
    #[case("")]
    #[case("AAAAAAA\u{e9}AAAAAAAAAAAAAAAAAAAAAAA")]
    #[case("2\u{e9}7")]
    fn other_inputs_pass_through_lowercased(#[case] raw: &str) {
        assert_eq!(raw.to_ascii_lowercase(), normalize_uuid(raw));
    }

    #[test]
    fn service_filter_accepts_short_and_long_forms() {
        assert_eq!(
            Ok("0000180d-0000-1000-8000-00805f9b34fb".to_string()),
            parse_service_filter("180D")
        );
        assert_eq!(
            Ok("d44bc439-abfd-45a2-b575-925416129600".to_string()),
            parse_service_filter("d44bc439-abfd-45a2-b575-925416129600")
        );
    }

    #[test]
    fn service_filter_rejects_non_hex_input() {
        assert_matches!(
            parse_service_filter("18XD"),
            Err(ConfigurationError::InvalidUuidHex { .. })
        );
    }

    #[test]
    fn service_filter_rejects_wrong_length() {
        assert_matches!(
            parse_service_filter("180D1"),
            Err(ConfigurationError::InvalidUuidLength { length: 5 })
        );
    }

    #[rstest]
    #[case("00002a37-0000-1000-8000-00805f9b34fb", Some(0x2A37))]
    #[case("d44bc439-abfd-45a2-b575-925416129600", None)]
    fn short_uuid_recovers_sig_assigned_numbers(
        #[case] normalized: &str,
        #[case] expected: Option<u16>,
    ) {
        assert_eq!(expected, short_uuid(normalized));
    }
}
