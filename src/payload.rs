use std::str::FromStr;

use serde::Serialize;
use strum_macros::Display;

use crate::error::ConfigurationError;

/// How operator text is turned into bytes for a characteristic write.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Display, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteEncoding {
    /// Hex digits; whitespace and `0x` markers are ignored.
    #[default]
    #[strum(serialize = "hex")]
    Hex,
    /// Decimal bytes separated by spaces or commas.
    #[strum(serialize = "dec")]
    DecimalList,
    /// UTF-8 text written verbatim.
    #[strum(serialize = "text")]
    Utf8Text,
}

impl FromStr for WriteEncoding {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hex" => Ok(Self::Hex),
            "dec" | "decimal" => Ok(Self::DecimalList),
            "text" | "string" | "utf8" => Ok(Self::Utf8Text),
            _ => Err(ConfigurationError::UnknownEncoding {
                value: value.to_string(),
            }),
        }
    }
}

/// Decodes operator input into a write payload.
///
/// # Errors
///
/// Returns an error for empty input, odd-length or non-hex digits, and
/// decimal tokens that are not integers between 0 and 255.
pub fn decode_payload(text: &str, encoding: WriteEncoding) -> Result<Vec<u8>, ConfigurationError> {
    if text.is_empty() {
        return Err(ConfigurationError::EmptyPayload);
    }

    match encoding {
        WriteEncoding::Hex => decode_hex(text),
        WriteEncoding::DecimalList => decode_decimal_list(text),
        WriteEncoding::Utf8Text => Ok(text.as_bytes().to_vec()),
    }
}

fn decode_hex(text: &str) -> Result<Vec<u8>, ConfigurationError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = compact.replace("0x", "").replace("0X", "");
    if digits.is_empty() {
        return Err(ConfigurationError::EmptyPayload);
    }
    if !digits.len().is_multiple_of(2) {
        return Err(ConfigurationError::OddHexLength);
    }
    hex::decode(&digits).map_err(|_error| ConfigurationError::InvalidHex {
        value: text.to_string(),
    })
}

fn decode_decimal_list(text: &str) -> Result<Vec<u8>, ConfigurationError> {
    let payload = text
        .split([' ', ','])
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            let value = token
                .parse::<i64>()
                .map_err(|_error| ConfigurationError::InvalidDecimal {
                    token: token.to_string(),
                })?;
            u8::try_from(value).map_err(|_error| ConfigurationError::DecimalOutOfRange { value })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if payload.is_empty() {
        return Err(ConfigurationError::EmptyPayload);
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("01 0x0203", vec![1, 2, 3])]
    #[case("0A0b", vec![0x0A, 0x0B])]
    #[case("0X ff", vec![0xFF])]
    fn hex_ignores_whitespace_and_markers(#[case] text: &str, #[case] expected: Vec<u8>) {
        assert_eq!(Ok(expected), decode_payload(text, WriteEncoding::Hex));
    }

    #[rstest]
    #[case("a", ConfigurationError::OddHexLength)]
    #[case("0x", ConfigurationError::EmptyPayload)]
    #[case("zz", ConfigurationError::InvalidHex { value: "zz".to_string() })]
    fn hex_rejects_malformed_digits(#[case] text: &str, #[case] expected: ConfigurationError) {
        assert_eq!(Err(expected), decode_payload(text, WriteEncoding::Hex));
    }

    #[rstest]
    #[case("1,2,3", vec![1, 2, 3])]
    #[case("1 2, 3", vec![1, 2, 3])]
    #[case("0,255", vec![0, 255])]
    fn decimal_list_splits_on_spaces_and_commas(#[case] text: &str, #[case] expected: Vec<u8>) {
        assert_eq!(Ok(expected), decode_payload(text, WriteEncoding::DecimalList));
    }

    #[rstest]
    #[case("300", ConfigurationError::DecimalOutOfRange { value: 300 })]
    #[case("-1", ConfigurationError::DecimalOutOfRange { value: -1 })]
    #[case("1,x", ConfigurationError::InvalidDecimal { token: "x".to_string() })]
    #[case(" , ", ConfigurationError::EmptyPayload)]
    fn decimal_list_rejects_values_outside_a_byte(
        #[case] text: &str,
        #[case] expected: ConfigurationError,
    ) {
        assert_eq!(Err(expected), decode_payload(text, WriteEncoding::DecimalList));
    }

    #[test]
    fn text_is_written_verbatim() {
        assert_eq!(
            Ok(b"hi there".to_vec()),
            decode_payload("hi there", WriteEncoding::Utf8Text)
        );
    }

    #[rstest]
    #[case(WriteEncoding::Hex)]
    #[case(WriteEncoding::DecimalList)]
    #[case(WriteEncoding::Utf8Text)]
    fn empty_text_is_rejected_for_every_encoding(#[case] encoding: WriteEncoding) {
        assert_matches!(
            decode_payload("", encoding),
            Err(ConfigurationError::EmptyPayload)
        );
    }

    #[rstest]
    #[case("hex", WriteEncoding::Hex)]
    #[case("DEC", WriteEncoding::DecimalList)]
    #[case("text", WriteEncoding::Utf8Text)]
    fn encodings_parse_from_operator_names(#[case] raw: &str, #[case] expected: WriteEncoding) {
        assert_eq!(Ok(expected), raw.parse::<WriteEncoding>());
        assert_eq!(
            expected,
            expected
                .to_string()
                .parse::<WriteEncoding>()
                .expect("display name should parse")
        );
    }

    #[test]
    fn unknown_encoding_is_a_configuration_error() {
        assert_matches!(
            "base64".parse::<WriteEncoding>(),
            Err(ConfigurationError::UnknownEncoding { .. })
        );
    }
}
