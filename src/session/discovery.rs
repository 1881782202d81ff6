use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use strum_macros::Display;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::filter::ScanFilter;
use super::sink::{EventSink, Severity};
use crate::error::{ConfigurationError, Operation, SessionError};
use crate::hw::{Advertisement, AdvertisementData, BleTransport, DeviceHandle};

/// Scan length used when the operator does not pick one.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);

/// A validated request for one bounded discovery scan.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScanRequest {
    filter: ScanFilter,
    duration: Duration,
}

impl ScanRequest {
    /// Creates a scan request.
    ///
    /// # Errors
    ///
    /// Returns an error when the duration is zero.
    pub fn new(filter: ScanFilter, duration: Duration) -> Result<Self, ConfigurationError> {
        if duration.is_zero() {
            return Err(ConfigurationError::InvalidScanDuration {
                value: format!("{}s", duration.as_secs_f64()),
            });
        }
        Ok(Self { filter, duration })
    }

    /// Creates a scan request from a duration in seconds.
    ///
    /// # Errors
    ///
    /// Returns an error unless `seconds` is finite and positive.
    pub fn from_seconds(filter: ScanFilter, seconds: f64) -> Result<Self, ConfigurationError> {
        let invalid = || ConfigurationError::InvalidScanDuration {
            value: seconds.to_string(),
        };
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(invalid());
        }
        let duration = Duration::try_from_secs_f64(seconds).map_err(|_error| invalid())?;
        Self::new(filter, duration)
    }

    #[must_use]
    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Default for ScanRequest {
    /// An unfiltered scan of [`DEFAULT_SCAN_DURATION`].
    fn default() -> Self {
        Self {
            filter: ScanFilter::default(),
            duration: DEFAULT_SCAN_DURATION,
        }
    }
}

/// Parses a scan duration given as seconds (`5`, `2.5`) or a humantime value
/// (`500ms`, `1m`).
///
/// # Errors
///
/// Returns an error when the value is neither, or is not positive.
pub fn parse_scan_duration(raw: &str) -> Result<Duration, ConfigurationError> {
    let trimmed = raw.trim();
    let invalid = || ConfigurationError::InvalidScanDuration {
        value: raw.to_string(),
    };

    let duration = match trimmed.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds > 0.0 => {
            Duration::try_from_secs_f64(seconds).map_err(|_error| invalid())?
        }
        Ok(_) => return Err(invalid()),
        Err(_) => humantime::parse_duration(trimmed).map_err(|_error| invalid())?,
    };
    if duration.is_zero() {
        return Err(invalid());
    }
    Ok(duration)
}

/// How a discovery scan ended.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryOutcome {
    /// The scan ran for its full duration and found devices.
    Completed,
    /// The scan was cancelled; devices found so far are kept.
    Stopped,
    /// Nothing matched the filter.
    #[default]
    NoMatches,
}

/// Devices collected by one discovery scan.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct DiscoveryResult {
    devices: Vec<DeviceHandle>,
    advertisements: BTreeMap<String, AdvertisementData>,
    outcome: DiscoveryOutcome,
}

impl DiscoveryResult {
    /// Returns matched devices in first-detection order.
    #[must_use]
    pub fn devices(&self) -> &[DeviceHandle] {
        &self.devices
    }

    /// Returns the advertisement a device was first detected with.
    #[must_use]
    pub fn advertisement(&self, address: &str) -> Option<&AdvertisementData> {
        self.advertisements
            .iter()
            .find_map(|(known, data)| known.eq_ignore_ascii_case(address).then_some(data))
    }

    #[must_use]
    pub fn outcome(&self) -> DiscoveryOutcome {
        self.outcome
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// De-duplicates matching detections by case-insensitive address.
#[derive(Debug, Default)]
struct DiscoveryCollector {
    devices: Vec<DeviceHandle>,
    seen: HashSet<String>,
    advertisements: BTreeMap<String, AdvertisementData>,
}

impl DiscoveryCollector {
    /// Records a detection and returns the device if it is new.
    fn observe(&mut self, advertisement: Advertisement, filter: &ScanFilter) -> Option<&DeviceHandle> {
        if !filter.matches(advertisement.name(), advertisement.data().service_uuids()) {
            return None;
        }

        if !self.seen.insert(advertisement.address().to_ascii_lowercase()) {
            return None;
        }

        let device = advertisement.into_device();
        self.advertisements
            .insert(device.address().to_string(), device.advertisement().clone());
        self.devices.push(device);
        self.devices.last()
    }

    fn finish(self, stopped: bool) -> DiscoveryResult {
        let outcome = if self.devices.is_empty() {
            DiscoveryOutcome::NoMatches
        } else if stopped {
            DiscoveryOutcome::Stopped
        } else {
            DiscoveryOutcome::Completed
        };
        DiscoveryResult {
            devices: self.devices,
            advertisements: self.advertisements,
            outcome,
        }
    }
}

/// Runs one bounded scan and collects the matching devices.
///
/// The adapter scan is always stopped before returning, including on
/// cancellation.
#[instrument(skip_all, level = "debug", fields(duration = ?request.duration()))]
pub(crate) async fn run_discovery(
    transport: &dyn BleTransport,
    request: &ScanRequest,
    cancel: &CancellationToken,
    sink: &EventSink,
) -> Result<DiscoveryResult, SessionError> {
    let filter = request.filter();
    sink.log(format!(
        "Scanning for {} (service: {}, name prefix: {})",
        humantime::format_duration(request.duration()),
        filter.service_uuid().unwrap_or("any"),
        filter.name_prefix().unwrap_or("any"),
    ));
    sink.status("Scanning...", Severity::Progress);

    let mut feed = transport
        .start_scan()
        .await
        .map_err(|error| SessionError::transport(Operation::Scan, error))?;

    let deadline = sleep(request.duration());
    tokio::pin!(deadline);
    let mut collector = DiscoveryCollector::default();
    let stopped = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break true,
            () = &mut deadline => break false,
            detection = feed.next() => {
                let Some(advertisement) = detection else {
                    debug!("advertisement feed ended before the scan deadline");
                    break false;
                };
                if let Some(device) = collector.observe(advertisement, filter) {
                    sink.log(format!("Found: {} ({})", device.display_name(), device.address()));
                }
            }
        }
    };
    drop(feed);

    if let Err(error) = transport.stop_scan().await {
        warn!(?error, "failed to stop adapter scan");
    }

    let result = collector.finish(stopped);
    match result.outcome() {
        DiscoveryOutcome::Completed => sink.status(
            format!("Scan complete. Found {} device(s)", result.devices().len()),
            Severity::Info,
        ),
        DiscoveryOutcome::Stopped => sink.status(
            format!("Scan stopped. Found {} device(s)", result.devices().len()),
            Severity::Info,
        ),
        DiscoveryOutcome::NoMatches => sink.status("No matching devices found", Severity::Warning),
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn detection(address: &str, name: &str, rssi: i16) -> Advertisement {
        let data = AdvertisementData::new(Some(name.to_string()), Some(rssi))
            .with_service_uuids(vec!["0000180d-0000-1000-8000-00805f9b34fb".to_string()]);
        Advertisement::new(address, Some(name.to_string()), data)
    }

    #[test]
    fn collector_keeps_first_detection_per_address() {
        let mut collector = DiscoveryCollector::default();
        let filter = ScanFilter::default();

        assert!(collector.observe(detection("AA:01", "HR", -40), &filter).is_some());
        assert!(collector.observe(detection("aa:01", "HR renamed", -70), &filter).is_none());
        assert!(collector.observe(detection("AA:02", "Other", -50), &filter).is_some());

        let result = collector.finish(false);
        assert_eq!(2, result.devices().len());
        assert_eq!(Some("HR"), result.devices()[0].name());
        assert_eq!(Some(-40), result.devices()[0].advertisement().rssi());
        assert_eq!(
            Some(-40),
            result.advertisement("aa:01").and_then(AdvertisementData::rssi)
        );
        assert_eq!(DiscoveryOutcome::Completed, result.outcome());
    }

    #[test]
    fn collector_skips_non_matching_detections() {
        let mut collector = DiscoveryCollector::default();
        let filter = ScanFilter::new(None, Some("Polar")).expect("valid filter");

        assert!(collector.observe(detection("AA:01", "Garmin", -40), &filter).is_none());

        assert_eq!(DiscoveryOutcome::NoMatches, collector.finish(true).outcome());
    }

    #[test]
    fn stopped_scans_keep_collected_devices() {
        let mut collector = DiscoveryCollector::default();
        collector.observe(detection("AA:01", "HR", -40), &ScanFilter::default());

        let result = collector.finish(true);

        assert_eq!(DiscoveryOutcome::Stopped, result.outcome());
        assert_eq!(1, result.devices().len());
    }

    #[rstest]
    #[case("5", Duration::from_secs(5))]
    #[case("2.5", Duration::from_millis(2500))]
    #[case("500ms", Duration::from_millis(500))]
    #[case("1m", Duration::from_secs(60))]
    fn scan_durations_accept_seconds_or_humantime(#[case] raw: &str, #[case] expected: Duration) {
        assert_eq!(Ok(expected), parse_scan_duration(raw));
    }

    #[rstest]
    #[case("0")]
    #[case("-3")]
    #[case("NaN")]
    #[case("inf")]
    #[case("soon")]
    fn scan_durations_must_be_positive_and_finite(#[case] raw: &str) {
        assert_matches!(
            parse_scan_duration(raw),
            Err(ConfigurationError::InvalidScanDuration { .. })
        );
    }

    #[rstest]
    #[case(0.0)]
    #[case(-1.0)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn scan_request_rejects_invalid_seconds(#[case] seconds: f64) {
        assert_matches!(
            ScanRequest::from_seconds(ScanFilter::default(), seconds),
            Err(ConfigurationError::InvalidScanDuration { .. })
        );
    }
}
