use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::explore::ExploreArgs;
use crate::cli::scan::ScanArgs;
use crate::error::{CliConfigError, ConfigurationError, FixtureError};
use crate::gatt_uuid::parse_service_filter;
use crate::hw::{FakeTransportConfig, NotificationFixture, ScanFixture};
use crate::session::{
    DEFAULT_SCAN_DURATION, ScanFilter, ScanRequest, parse_scan_duration,
};

/// Command-line options for the BLE exploration client.
#[derive(Debug, Parser)]
#[command(name = "blexp", about = "Discover, inspect, and poke at Bluetooth LE peripherals.")]
pub struct Args {
    /// Only keep devices advertising this service (16-bit `180D` or 128-bit UUID).
    #[arg(long, global = true, value_parser = parse_service_filter)]
    svc_uuid: Option<String>,
    /// Only keep devices whose advertised name starts with this prefix.
    #[arg(long, global = true)]
    dev_name_prefix: Option<String>,
    /// How long to scan, in seconds (`5`, `2.5`) or as a duration (`500ms`).
    #[arg(long, global = true, value_parser = parse_scan_duration)]
    scan_duration: Option<Duration>,
    /// Overrides `RUST_LOG` for diagnostic logging.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format. Defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Uses the fake BLE transport with fixture-driven discovery.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake scan fixtures in the form `address|name|service_uuids|rssi;...`.
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Fake notifications in the form `uuid=hex,...`, emitted on subscribe.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationFixture>,
    /// Characteristic UUIDs whose fake reads fail.
    #[arg(long, global = true, requires = "fake", value_delimiter = ',')]
    fake_failing_reads: Vec<String>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use blexp::{Args, Command, ScanArgs};
    ///
    /// let scan = Args::new(Command::Scan(ScanArgs::default()));
    /// let _ = scan;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            svc_uuid: None,
            dev_name_prefix: None,
            scan_duration: None,
            log_level: None,
            output: None,
            fake: false,
            fake_scan: None,
            fake_notifications: None,
            fake_failing_reads: Vec::new(),
            command,
        }
    }

    /// Enables fake transport mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            notifications,
            failing_reads,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan_fixture);
        self.fake_notifications = notifications;
        self.fake_failing_reads = failing_reads;
        self
    }

    /// Returns the requested diagnostic log level, if any.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the explicitly requested output format, if any.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Builds the discovery request from the filter and duration flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter or duration is invalid.
    pub fn scan_request(&self) -> Result<ScanRequest, ConfigurationError> {
        let filter = ScanFilter::new(self.svc_uuid.as_deref(), self.dev_name_prefix.as_deref())?;
        ScanRequest::new(filter, self.scan_duration.unwrap_or(DEFAULT_SCAN_DURATION))
    }

    /// Splits parsed CLI arguments into command and optional fake-transport settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI backend configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_notifications,
            fake_failing_reads,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan_fixture,
                notifications: fake_notifications,
                failing_reads: fake_failing_reads,
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake transport arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationFixture>,
    #[builder(default)]
    failing_reads: Vec<String>,
}

impl FakeArgs {
    pub(crate) fn into_transport_config(self) -> FakeTransportConfig {
        let Self {
            scan_fixture,
            notifications,
            failing_reads,
        } = self;

        FakeTransportConfig::builder()
            .scan_fixture(scan_fixture)
            .notifications(notifications.unwrap_or_default())
            .failing_reads(failing_reads)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one discovery scan and print the matching devices.
    Scan(ScanArgs),
    /// Open an interactive shell for scanning, connecting, and GATT operations.
    Explore(ExploreArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan(_args) => "scan",
            Self::Explore(_args) => "explore",
        }
    }
}

/// Diagnostic log verbosity.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// How command results are written to stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;

    const FIXTURE: &str = "AA:BB:CC:DD:EE:01|Polar H10|180D|-61";

    #[test]
    fn fake_mode_requires_scan_fixture() {
        let result = Args::try_parse_from(["blexp", "--fake", "scan"]);

        let error = result.expect_err("missing --fake-scan should fail argument parsing");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_scan_requires_fake_mode() {
        let result = Args::try_parse_from(["blexp", "--fake-scan", FIXTURE, "scan"]);

        let error = result.expect_err("--fake-scan should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_mode_builds_fake_settings() {
        let cli = Args::try_parse_from(["blexp", "--fake", "--fake-scan", FIXTURE, "scan"])
            .expect("valid fake arguments should parse");

        let (command, fake_args) = cli
            .into_command_and_fake_args()
            .expect("valid fake arguments should resolve fake settings");
        assert_matches!(command, Command::Scan(_));
        assert_matches!(fake_args, Some(_));
    }

    #[test]
    fn invalid_service_filter_is_rejected_at_parse_time() {
        let result = Args::try_parse_from(["blexp", "--svc-uuid", "18XD", "scan"]);

        let error = result.expect_err("non-hex service filter should fail");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }

    #[test]
    fn scan_request_uses_filters_and_duration() {
        let cli = Args::try_parse_from([
            "blexp",
            "--svc-uuid",
            "180D",
            "--dev-name-prefix",
            "Polar",
            "--scan-duration",
            "2.5",
            "scan",
        ])
        .expect("valid arguments should parse");

        let request = cli.scan_request().expect("valid scan request");
        assert_eq!(Duration::from_millis(2500), request.duration());
        assert_eq!(
            Some("0000180d-0000-1000-8000-00805f9b34fb"),
            request.filter().service_uuid()
        );
        assert_eq!(Some("Polar"), request.filter().name_prefix());
    }

    #[test]
    fn scan_request_defaults_to_five_seconds_without_filters() {
        let cli = Args::try_parse_from(["blexp", "scan"]).expect("valid arguments should parse");

        let request = cli.scan_request().expect("valid scan request");
        assert_eq!(DEFAULT_SCAN_DURATION, request.duration());
        assert_eq!(&ScanFilter::default(), request.filter());
    }
}
