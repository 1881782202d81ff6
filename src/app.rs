use std::io;
use std::sync::Arc;

use anyhow::Result;
use bon::Builder;
use tracing::instrument;

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::hw::{BleTransport, BtleplugTransport, FakeTransport};
use crate::session::ScanRequest;
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Creates a transport backed by the host's Bluetooth adapters.
///
/// # Errors
///
/// Returns an error if the platform Bluetooth manager cannot be created.
pub async fn real_transport() -> Result<Arc<dyn BleTransport>> {
    Ok(Arc::new(BtleplugTransport::new().await?))
}

/// Creates a transport backed by fixture data.
#[must_use]
pub fn fake_transport(fake_args: FakeArgs) -> Arc<dyn BleTransport> {
    Arc::new(FakeTransport::new(fake_args.into_transport_config()))
}

/// Per-run options shared by every command.
#[derive(Debug, Clone, Builder)]
pub struct RunSettings {
    #[builder(default)]
    scan_request: ScanRequest,
    log_level: Option<LogLevel>,
    #[builder(default = OutputFormat::Pretty)]
    output_format: OutputFormat,
}

impl RunSettings {
    #[must_use]
    pub fn scan_request(&self) -> &ScanRequest {
        &self.scan_request
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Runs a CLI command against the given transport with default settings.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = blexp::Args::try_parse_from([
///     "blexp",
///     "--fake",
///     "--fake-scan",
///     "AA:BB:CC:DD:EE:01|HR Strap|180D|-61",
///     "--scan-duration",
///     "50ms",
///     "scan",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let transport = match maybe_fake_args {
///     Some(fake_args) => blexp::fake_transport(fake_args),
///     None => blexp::real_transport().await?,
/// };
/// let mut out = Vec::new();
/// blexp::run(command, &mut out, transport).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the command fails, or
/// output writing fails.
pub async fn run<W>(command: Command, out: &mut W, transport: Arc<dyn BleTransport>) -> Result<()>
where
    W: io::Write,
{
    run_with_settings(command, RunSettings::default(), out, transport).await
}

/// Runs a CLI command with explicit settings on the process terminal.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the command fails, or
/// output writing fails.
pub async fn run_with_settings<W>(
    command: Command,
    settings: RunSettings,
    out: &mut W,
    transport: Arc<dyn BleTransport>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(command, settings, out, &SystemTerminalClient, transport).await
}

/// Runs a CLI command with an injected terminal.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use std::io::{BufRead, Cursor};
///
/// struct ScriptedTerminal;
/// impl blexp::TerminalClient for ScriptedTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
///     fn open_input(&self) -> Box<dyn BufRead + Send> {
///         Box::new(Cursor::new("state\nquit\n"))
///     }
/// }
///
/// let fake_args = blexp::FakeArgs::builder()
///     .scan_fixture("AA:BB:CC:DD:EE:01|HR Strap|180D|-61")?
///     .build();
/// let command = blexp::Command::Explore(blexp::ExploreArgs::default());
/// let mut out = Vec::new();
/// blexp::run_with_clients(
///     command,
///     blexp::RunSettings::default(),
///     &mut out,
///     &ScriptedTerminal,
///     blexp::fake_transport(fake_args),
/// )
/// .await?;
/// assert!(String::from_utf8(out)?.contains("state: idle"));
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the command fails, or
/// output writing fails.
#[instrument(
    skip(settings, out, terminal_client, transport),
    level = "info",
    fields(command = command.name(), log_level = ?settings.log_level())
)]
pub async fn run_with_clients<W>(
    command: Command,
    settings: RunSettings,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    transport: Arc<dyn BleTransport>,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "blexp",
        terminal_client.stderr_is_terminal(),
        settings.log_level().map(LogLevel::as_level_filter),
    )?;

    let RunSettings {
        scan_request,
        output_format,
        ..
    } = settings;
    match command {
        Command::Scan(args) => {
            crate::cli::scan::run(
                transport,
                scan_request,
                &args,
                out,
                terminal_client,
                output_format,
            )
            .await
        }
        Command::Explore(args) => {
            crate::cli::explore::run(
                transport,
                scan_request,
                &args,
                out,
                terminal_client,
                output_format,
            )
            .await
        }
    }
}
