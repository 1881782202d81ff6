use std::io::{BufRead, Cursor};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clap::error::ErrorKind;
use pretty_assertions::assert_eq;

const HEART_RATE_STRAP: &str = "AA:BB:CC:DD:EE:01|HR Strap|180D|-61";
const FIXTURE: &str = "AA:BB:CC:DD:EE:01|HR Strap|180D|-61;AA:BB:CC:DD:EE:02|Thermo|1809|-70";

#[derive(Debug, Default)]
struct ScriptedTerminal {
    input: String,
}

impl ScriptedTerminal {
    fn with_input(input: &str) -> Self {
        Self {
            input: input.to_string(),
        }
    }
}

impl blexp::TerminalClient for ScriptedTerminal {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }

    fn open_input(&self) -> Box<dyn BufRead + Send> {
        Box::new(Cursor::new(self.input.clone().into_bytes()))
    }
}

async fn run_with_argv<const N: usize>(argv: [&str; N], input: &str) -> anyhow::Result<String> {
    let args = blexp::Args::try_parse_from(argv)?;
    let settings = blexp::RunSettings::builder()
        .scan_request(args.scan_request()?)
        .maybe_log_level(args.log_level())
        .output_format(
            args.output_format()
                .unwrap_or(blexp::OutputFormat::Pretty),
        )
        .build();
    let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
    let fake_args = maybe_fake_args.expect("tests always run against the fake transport");

    let mut output = Vec::new();
    blexp::run_with_clients(
        command,
        settings,
        &mut output,
        &ScriptedTerminal::with_input(input),
        blexp::fake_transport(fake_args),
    )
    .await?;
    Ok(String::from_utf8(output)?)
}

#[tokio::test]
async fn scan_command_prints_matching_devices() -> anyhow::Result<()> {
    let stdout = run_with_argv(
        [
            "blexp",
            "--fake",
            "--fake-scan",
            FIXTURE,
            "--svc-uuid",
            "180D",
            "--scan-duration",
            "50ms",
            "scan",
        ],
        "",
    )
    .await?;

    assert!(stdout.contains("Found: HR Strap (AA:BB:CC:DD:EE:01)"));
    assert!(stdout.contains("Scan complete. Found 1 device(s)"));
    assert!(stdout.contains("0000180d-0000-1000-8000-00805f9b34fb"));
    assert!(!stdout.contains("Thermo"));
    Ok(())
}

#[tokio::test]
async fn scan_command_prints_advertisements_on_request() -> anyhow::Result<()> {
    let stdout = run_with_argv(
        [
            "blexp",
            "--fake",
            "--fake-scan",
            HEART_RATE_STRAP,
            "--scan-duration",
            "50ms",
            "scan",
            "--adv",
        ],
        "",
    )
    .await?;

    assert!(stdout.contains("tx power"));
    assert!(stdout.contains("-61 dBm"));
    Ok(())
}

#[tokio::test]
async fn scan_command_emits_json_when_requested() -> anyhow::Result<()> {
    let stdout = run_with_argv(
        [
            "blexp",
            "--output",
            "json",
            "--fake",
            "--fake-scan",
            FIXTURE,
            "--dev-name-prefix",
            "Thermo",
            "--scan-duration",
            "50ms",
            "scan",
        ],
        "",
    )
    .await?;

    let parsed: serde_json::Value = serde_json::from_str(&stdout)?;
    assert_eq!("completed", parsed["outcome"]);
    assert_eq!("AA:BB:CC:DD:EE:02", parsed["devices"][0]["address"]);
    assert_eq!(1, parsed["devices"].as_array().map_or(0, Vec::len));
    Ok(())
}

#[tokio::test]
async fn explore_walks_through_a_full_session() -> anyhow::Result<()> {
    let script = "\
scan
wait
adv 1
connect 1
read 2A19
write 2A39 01
sub 2A37
state
unsub 2A37
disconnect
state
quit
";
    let stdout = run_with_argv(
        [
            "blexp",
            "--fake",
            "--fake-scan",
            HEART_RATE_STRAP,
            "--fake-notifications",
            "2A37=0650",
            "--scan-duration",
            "50ms",
            "explore",
        ],
        script,
    )
    .await?;

    assert!(stdout.contains("Found: HR Strap (AA:BB:CC:DD:EE:01)"));
    assert!(stdout.contains("Connected to HR Strap (AA:BB:CC:DD:EE:01)"));
    assert!(stdout.contains("Readable: 3, Writable: 2, Notifiable: 3"));
    assert!(stdout.contains("Read 00002a19-0000-1000-8000-00805f9b34fb:"));
    assert!(stdout.contains("Notifications enabled for 00002a37-0000-1000-8000-00805f9b34fb"));
    let notification = stdout
        .lines()
        .find(|line| line.contains("[NOTIFY]"))
        .expect("fixture notification is logged");
    assert!(notification.contains("00002a37-0000-1000-8000-00805f9b34fb: 06 50"));
    assert!(stdout.contains("state: connected (HR Strap AA:BB:CC:DD:EE:01)"));
    assert!(stdout.contains("state: idle"));
    Ok(())
}

#[tokio::test]
async fn explore_reports_operator_mistakes_and_keeps_going() -> anyhow::Result<()> {
    let script = "\
read 2A19
connect 3
bogus
stop
wait
state
";
    let stdout = run_with_argv(
        ["blexp", "--fake", "--fake-scan", HEART_RATE_STRAP, "explore"],
        script,
    )
    .await?;

    assert!(stdout.contains("Error: not connected to a device"));
    assert!(stdout.contains("no device at position 3"));
    assert!(stdout.lines().any(|line| line.contains("unrecognized subcommand") && line.contains("bogus")));
    assert!(stdout.contains("No scan is running"));
    assert!(stdout.contains("No scan to wait for"));
    assert!(stdout.contains("state: idle"));
    Ok(())
}

#[tokio::test]
async fn explore_disconnects_when_input_ends() -> anyhow::Result<()> {
    let stdout = run_with_argv(
        [
            "blexp",
            "--fake",
            "--fake-scan",
            HEART_RATE_STRAP,
            "--scan-duration",
            "50ms",
            "explore",
            "--scan-on-start",
        ],
        "wait\nconnect 1\n",
    )
    .await?;

    assert!(stdout.contains("Connected to HR Strap"));
    assert!(stdout.contains("Disconnected"));
    Ok(())
}

#[tokio::test]
async fn explore_writes_text_values_as_typed() -> anyhow::Result<()> {
    let fake = blexp::FakeTransport::new(
        blexp::FakeTransportConfig::builder()
            .scan_fixture(HEART_RATE_STRAP.parse()?)
            .build(),
    );
    let settings = blexp::RunSettings::builder()
        .scan_request(blexp::ScanRequest::new(
            blexp::ScanFilter::default(),
            Duration::from_millis(50),
        )?)
        .build();
    let script = "\
scan
wait
connect 1
write d44bc439-abfd-45a2-b575-92541612960a --encoding text  two  spaces\tand tab 
quit
";

    let mut output = Vec::new();
    blexp::run_with_clients(
        blexp::Command::Explore(blexp::ExploreArgs::default()),
        settings,
        &mut output,
        &ScriptedTerminal::with_input(script),
        Arc::new(fake.clone()),
    )
    .await?;

    let writes = fake.writes();
    assert_eq!(1, writes.len());
    assert_eq!(b"two  spaces\tand tab".to_vec(), writes[0].payload);
    assert_eq!(blexp::WriteKind::WithoutResponse, writes[0].kind);
    Ok(())
}

#[test]
fn fake_args_reject_malformed_fixtures() {
    let result = blexp::FakeArgs::builder().scan_fixture("invalid-record");
    assert!(matches!(
        result,
        Err(blexp::FixtureError::InvalidRecordFieldCount)
    ));
}

#[test]
fn scan_duration_must_be_positive() {
    let result = blexp::Args::try_parse_from(["blexp", "--scan-duration", "0", "scan"]);

    let error = result.expect_err("zero duration should fail argument parsing");
    assert_eq!(ErrorKind::ValueValidation, error.kind());
}

#[test]
fn unknown_log_levels_are_rejected() {
    let result = blexp::Args::try_parse_from(["blexp", "--log-level", "loud", "scan"]);

    let error = result.expect_err("unknown level should fail argument parsing");
    assert_eq!(ErrorKind::InvalidValue, error.kind());
}
