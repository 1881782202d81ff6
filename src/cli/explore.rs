use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::cli::OutputFormat;
use crate::hw::BleTransport;
use crate::payload::WriteEncoding;
use crate::session::{
    ControllerConfig, DiscoveryResult, EventSink, Pending, ScanRequest, SessionController,
    SessionEvent,
};
use crate::terminal::TerminalClient;

use super::ui::{
    AdvertisementView, ConnectionReportView, DeviceListView, Painter, SessionEventView,
};

/// Upper bound on the disconnect performed when the shell exits.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(3);

/// Arguments for the interactive `explore` shell.
#[derive(Debug, Clone, Default, ClapArgs)]
pub struct ExploreArgs {
    /// Start a scan as soon as the shell opens.
    #[arg(long)]
    scan_on_start: bool,
}

impl ExploreArgs {
    #[must_use]
    pub fn new(scan_on_start: bool) -> Self {
        Self { scan_on_start }
    }
}

/// One line typed at the shell prompt.
#[derive(Debug, Parser)]
#[command(multicall = true, disable_help_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Debug, Subcommand)]
enum ShellCommand {
    /// Start a background scan with the configured filter and duration.
    Scan,
    /// Stop the running scan early.
    Stop,
    /// Block until the running scan finishes, then list the devices.
    Wait,
    /// List devices from the last scan.
    Devices,
    /// Show the advertisement a listed device was found with.
    Adv { position: usize },
    /// Connect to a listed device and enumerate its services.
    Connect { position: usize },
    /// Close the live connection.
    Disconnect,
    /// Read a characteristic.
    Read { uuid: String },
    /// Write a value to a characteristic.
    Write {
        uuid: String,
        /// How to decode the value: hex, dec, or text.
        #[arg(long, short, default_value_t = WriteEncoding::Hex)]
        encoding: WriteEncoding,
        /// Everything after the uuid and options, taken as typed.
        #[arg(
            required = true,
            num_args = 1..,
            allow_hyphen_values = true,
            trailing_var_arg = true
        )]
        value: Vec<String>,
    },
    /// Enable notifications for a characteristic.
    Sub { uuid: String },
    /// Disable notifications for a characteristic.
    Unsub { uuid: String },
    /// Show the session state.
    State,
    /// Disconnect and leave the shell.
    #[command(alias = "exit")]
    Quit,
}

impl ShellCommand {
    /// Replaces a split `write` value with the original text of the line, so
    /// inner whitespace survives for text payloads.
    fn with_verbatim_value(self, line: &str, word_count: usize) -> Self {
        match self {
            Self::Write {
                uuid,
                encoding,
                value,
            } => {
                let text = after_words(line, word_count.saturating_sub(value.len()));
                Self::Write {
                    uuid,
                    encoding,
                    value: vec![text.to_string()],
                }
            }
            other => other,
        }
    }
}

/// Returns `line` without its first `count` words, trimmed at both ends.
fn after_words(line: &str, count: usize) -> &str {
    let mut rest = line.trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    rest.trim_end()
}

/// Something the shell thread wants printed.
#[derive(Debug)]
enum ShellOutput {
    Text(String),
    Devices(Arc<DiscoveryResult>),
    Advertisement(Arc<DiscoveryResult>, usize),
    Connected(Box<crate::session::ConnectionReport>),
}

/// Executes the `explore` command.
///
/// The prompt runs on a blocking thread and drives the session controller
/// synchronously; this task renders session events and shell output in
/// arrival order.
#[instrument(skip(transport, out, terminal_client), level = "info", fields(?output_format))]
pub(crate) async fn run<W>(
    transport: Arc<dyn BleTransport>,
    request: ScanRequest,
    args: &ExploreArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let (sink, mut events) = EventSink::channel();
    let controller =
        SessionController::new(transport, sink, Handle::current(), ControllerConfig::default());
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let input = terminal_client.open_input();
    let (console, mut shell_output) = mpsc::unbounded_channel();
    let scan_on_start = args.scan_on_start;

    let shell = tokio::task::spawn_blocking(move || {
        let mut shell = Shell {
            controller,
            request,
            console,
            scan: None,
        };
        if scan_on_start {
            shell.execute(ShellCommand::Scan);
        }
        shell.run(input);
        shell.into_controller()
    });

    loop {
        tokio::select! {
            Some(event) = events.recv() => render_event(out, &event, &painter, output_format)?,
            output = shell_output.recv() => match output {
                Some(output) => render_output(out, output, &painter, output_format)?,
                None => break,
            },
        }
    }

    let controller = shell.await?;
    controller.stop_scan();
    if tokio::time::timeout(SHUTDOWN_WAIT, controller.disconnect())
        .await
        .is_err()
    {
        warn!("connection did not close within {SHUTDOWN_WAIT:?}");
    }
    drop(controller);
    while let Ok(event) = events.try_recv() {
        render_event(out, &event, &painter, output_format)?;
    }

    Ok(())
}

fn render_event<W: io::Write>(
    out: &mut W,
    event: &SessionEvent,
    painter: &Painter,
    output_format: OutputFormat,
) -> Result<()> {
    match output_format {
        OutputFormat::Pretty => writeln!(out, "{}", SessionEventView::new(event, painter))?,
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, event)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn render_output<W: io::Write>(
    out: &mut W,
    output: ShellOutput,
    painter: &Painter,
    output_format: OutputFormat,
) -> Result<()> {
    match (output, output_format) {
        (ShellOutput::Text(text), _) => writeln!(out, "{text}")?,
        (ShellOutput::Devices(result), OutputFormat::Pretty) => {
            writeln!(out, "{}", DeviceListView::new(&result, painter))?;
        }
        (ShellOutput::Devices(result), OutputFormat::Json) => {
            serde_json::to_writer(&mut *out, result.as_ref())?;
            writeln!(out)?;
        }
        (ShellOutput::Advertisement(result, index), format) => {
            let Some(device) = result.devices().get(index) else {
                return Ok(());
            };
            let advertisement = result
                .advertisement(device.address())
                .unwrap_or(device.advertisement());
            match format {
                OutputFormat::Pretty => writeln!(
                    out,
                    "{}",
                    AdvertisementView::new(device, advertisement, painter)
                )?,
                OutputFormat::Json => {
                    serde_json::to_writer(&mut *out, advertisement)?;
                    writeln!(out)?;
                }
            }
        }
        (ShellOutput::Connected(report), OutputFormat::Pretty) => {
            writeln!(out, "{}", ConnectionReportView::new(&report, painter))?;
        }
        (ShellOutput::Connected(report), OutputFormat::Json) => {
            serde_json::to_writer(&mut *out, report.services())?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Prompt-side state, owned by the blocking shell thread.
struct Shell {
    controller: SessionController,
    request: ScanRequest,
    console: mpsc::UnboundedSender<ShellOutput>,
    scan: Option<Pending<DiscoveryResult>>,
}

impl Shell {
    fn run(&mut self, input: Box<dyn BufRead + Send>) {
        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(error) => {
                    warn!(?error, "failed to read shell input");
                    break;
                }
            };
            let words: Vec<&str> = line.split_whitespace().collect();
            let word_count = words.len();
            if word_count == 0 {
                continue;
            }

            match ShellLine::try_parse_from(words) {
                Ok(ShellLine {
                    command: ShellCommand::Quit,
                }) => break,
                Ok(ShellLine { command }) => {
                    self.execute(command.with_verbatim_value(&line, word_count));
                }
                Err(error) => self.say(error.render().to_string().trim_end()),
            }
        }
    }

    fn execute(&mut self, command: ShellCommand) {
        debug!(?command, "shell command");
        match command {
            ShellCommand::Scan => {
                if let Ok(pending) = self.controller.start_scan(self.request.clone()) {
                    self.scan = Some(pending);
                }
            }
            ShellCommand::Stop => {
                if !self.controller.stop_scan() {
                    self.say("No scan is running");
                }
            }
            ShellCommand::Wait => match self.scan.take() {
                Some(pending) => {
                    if pending.wait().is_ok() {
                        self.emit(ShellOutput::Devices(self.controller.devices()));
                    }
                }
                None => self.say("No scan to wait for"),
            },
            ShellCommand::Devices => self.emit(ShellOutput::Devices(self.controller.devices())),
            ShellCommand::Adv { position } => match self.controller.device(position) {
                Ok(_device) => self.emit(ShellOutput::Advertisement(
                    self.controller.devices(),
                    position - 1,
                )),
                Err(error) => self.say(error.to_string()),
            },
            ShellCommand::Connect { position } => {
                let device = match self.controller.device(position) {
                    Ok(device) => device,
                    Err(error) => return self.say(error.to_string()),
                };
                let Ok(pending) = self.controller.connect(&device) else {
                    return;
                };
                if let Ok(report) = pending.wait() {
                    self.emit(ShellOutput::Connected(Box::new(report)));
                }
            }
            ShellCommand::Disconnect => {
                let _ = self.controller.disconnect().wait();
            }
            ShellCommand::Read { uuid } => {
                let _ = self.controller.read_characteristic(&uuid).wait();
            }
            ShellCommand::Write {
                uuid,
                encoding,
                value,
            } => {
                let text = value.join(" ");
                let _ = self
                    .controller
                    .write_characteristic(&uuid, &text, encoding)
                    .wait();
            }
            ShellCommand::Sub { uuid } => {
                let _ = self.controller.subscribe(&uuid).wait();
            }
            ShellCommand::Unsub { uuid } => {
                let _ = self.controller.unsubscribe(&uuid).wait();
            }
            ShellCommand::State => {
                let state = self.controller.state();
                let text = match self.controller.connected_device() {
                    Some(device) => format!(
                        "state: {state} ({} {})",
                        device.display_name(),
                        device.address()
                    ),
                    None => format!("state: {state}"),
                };
                self.say(text);
            }
            ShellCommand::Quit => {}
        }
    }

    fn say(&self, text: impl Into<String>) {
        self.emit(ShellOutput::Text(text.into()));
    }

    fn emit(&self, output: ShellOutput) {
        // The renderer only stops after this thread finishes.
        let _ = self.console.send(output);
    }

    fn into_controller(self) -> SessionController {
        self.controller
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn parse(line: &str) -> Result<ShellCommand, clap::Error> {
        ShellLine::try_parse_from(line.split_whitespace()).map(|parsed| parsed.command)
    }

    #[test]
    fn write_defaults_to_hex_and_joins_words() {
        let command = parse("write 2A39 01 02").expect("valid write");

        assert_matches!(
            command,
            ShellCommand::Write { uuid, encoding: WriteEncoding::Hex, value }
                if uuid == "2A39" && value == ["01", "02"]
        );
    }

    #[test]
    fn write_accepts_an_explicit_encoding() {
        let command = parse("write --encoding dec 2A39 1,-2").expect("valid write");

        assert_matches!(
            command,
            ShellCommand::Write { encoding: WriteEncoding::DecimalList, .. }
        );
    }

    #[test]
    fn write_keeps_inner_whitespace_of_the_value() {
        let line = "write  2A39 -e text  a  b\tc  ";
        let command = parse(line)
            .expect("valid write")
            .with_verbatim_value(line, line.split_whitespace().count());

        assert_matches!(
            command,
            ShellCommand::Write { encoding: WriteEncoding::Utf8Text, value, .. }
                if value == ["a  b\tc"]
        );
    }

    #[test]
    fn options_after_the_value_are_part_of_it() {
        let command = parse("write 2A39 hello -e dec").expect("valid write");

        assert_matches!(
            command,
            ShellCommand::Write { encoding: WriteEncoding::Hex, value, .. }
                if value == ["hello", "-e", "dec"]
        );
    }

    #[rstest]
    #[case("write 2A39 01 02", 2, "01 02")]
    #[case("  read   2A19  ", 1, "2A19")]
    #[case("state", 1, "")]
    fn after_words_skips_leading_words(
        #[case] line: &str,
        #[case] count: usize,
        #[case] expected: &str,
    ) {
        assert_eq!(expected, after_words(line, count));
    }

    #[test]
    fn write_requires_a_value() {
        let error = parse("write 2A39").expect_err("value is required");
        assert_eq!(clap::error::ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn exit_is_an_alias_for_quit() {
        assert_matches!(parse("exit"), Ok(ShellCommand::Quit));
    }

    #[test]
    fn device_positions_must_be_numbers() {
        assert_matches!(parse("connect first"), Err(_));
    }
}
