use serde::Serialize;

use crate::error::ConfigurationError;
use crate::gatt_uuid::{normalize_uuid, parse_service_filter};

/// Optional service-UUID and name-prefix criteria for a discovery scan.
///
/// Both criteria must hold for an advertisement to match. Absent criteria
/// match everything.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct ScanFilter {
    service_uuid: Option<String>,
    name_prefix: Option<String>,
}

impl ScanFilter {
    /// Builds a filter from operator input. Blank values mean "no filter".
    ///
    /// # Errors
    ///
    /// Returns an error when the service filter is not a 16-bit or 128-bit
    /// hex UUID.
    pub fn new(
        service_uuid: Option<&str>,
        name_prefix: Option<&str>,
    ) -> Result<Self, ConfigurationError> {
        let service_uuid = service_uuid
            .filter(|raw| !raw.trim().is_empty())
            .map(parse_service_filter)
            .transpose()?;
        let name_prefix = name_prefix
            .filter(|prefix| !prefix.is_empty())
            .map(ToString::to_string);
        Ok(Self {
            service_uuid,
            name_prefix,
        })
    }

    /// Returns the normalised service filter, if any.
    #[must_use]
    pub fn service_uuid(&self) -> Option<&str> {
        self.service_uuid.as_deref()
    }

    #[must_use]
    pub fn name_prefix(&self) -> Option<&str> {
        self.name_prefix.as_deref()
    }

    /// Decides whether one advertisement satisfies this filter.
    #[must_use]
    pub fn matches(&self, name: Option<&str>, service_uuids: &[String]) -> bool {
        let service_matches = self.service_uuid.as_deref().is_none_or(|wanted| {
            service_uuids
                .iter()
                .any(|advertised| normalize_uuid(advertised).eq_ignore_ascii_case(wanted))
        });
        let name_matches = self
            .name_prefix
            .as_deref()
            .is_none_or(|prefix| name.unwrap_or_default().starts_with(prefix));
        service_matches && name_matches
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rstest::rstest;

    use super::*;

    const HEART_RATE: &str = "0000180d-0000-1000-8000-00805f9b34fb";

    fn services(uuids: &[&str]) -> Vec<String> {
        uuids.iter().map(ToString::to_string).collect()
    }

    #[rstest]
    #[case(None, &[])]
    #[case(Some("Polar"), &[HEART_RATE])]
    fn empty_filter_matches_everything(#[case] name: Option<&str>, #[case] uuids: &[&str]) {
        assert!(ScanFilter::default().matches(name, &services(uuids)));
    }

    #[rstest]
    #[case(&["0000180D-0000-1000-8000-00805F9B34FB"], true)]
    #[case(&["180d"], true)]
    #[case(&["0000180f-0000-1000-8000-00805f9b34fb"], false)]
    #[case(&[], false)]
    fn service_membership_ignores_case(#[case] uuids: &[&str], #[case] expected: bool) {
        let filter = ScanFilter::new(Some("180D"), None).expect("valid filter");
        assert_eq!(expected, filter.matches(Some("HR"), &services(uuids)));
    }

    #[rstest]
    #[case(Some("Polar H10"), true)]
    #[case(Some("polar H10"), false)]
    #[case(None, false)]
    fn name_prefix_treats_missing_name_as_empty(
        #[case] name: Option<&str>,
        #[case] expected: bool,
    ) {
        let filter = ScanFilter::new(None, Some("Polar")).expect("valid filter");
        assert_eq!(expected, filter.matches(name, &[]));
    }

    #[test]
    fn both_criteria_must_hold() {
        let filter = ScanFilter::new(Some("180D"), Some("Polar")).expect("valid filter");
        assert!(filter.matches(Some("Polar H10"), &services(&[HEART_RATE])));
        assert!(!filter.matches(Some("Garmin HRM"), &services(&[HEART_RATE])));
        assert!(!filter.matches(Some("Polar H10"), &[]));
    }

    #[test]
    fn blank_inputs_mean_no_filter() {
        assert_eq!(
            ScanFilter::default(),
            ScanFilter::new(Some("  "), Some("")).expect("valid filter")
        );
    }

    #[test]
    fn invalid_service_filter_is_rejected_before_scanning() {
        assert_matches!(
            ScanFilter::new(Some("heart"), None),
            Err(ConfigurationError::InvalidUuidHex { .. })
        );
    }
}
