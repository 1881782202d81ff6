use std::io;
use std::sync::Arc;

use anyhow::Result;
use clap::Args as ClapArgs;
use tokio::runtime::Handle;
use tracing::{debug, instrument};

use crate::cli::OutputFormat;
use crate::hw::BleTransport;
use crate::session::{
    ControllerConfig, EventSink, ScanRequest, SessionController, SessionEvent,
};
use crate::terminal::TerminalClient;

use super::ui::{AdvertisementView, DeviceListView, Painter, SessionEventView, Spinner};

/// Arguments for the one-shot `scan` command.
#[derive(Debug, Clone, Default, ClapArgs)]
pub struct ScanArgs {
    /// Also print the advertisement of every device.
    #[arg(long)]
    adv: bool,
}

impl ScanArgs {
    /// Creates scan arguments, optionally including advertisement details.
    #[must_use]
    pub fn new(adv: bool) -> Self {
        Self { adv }
    }
}

/// Executes the `scan` command.
#[instrument(skip(transport, out, terminal_client), level = "info", fields(?output_format))]
pub(crate) async fn run<W>(
    transport: Arc<dyn BleTransport>,
    request: ScanRequest,
    args: &ScanArgs,
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
    let mut pending = controller.start_scan(request)?;

    let spinner = Spinner::start(
        output_format == OutputFormat::Pretty && terminal_client.stderr_is_terminal(),
        "Scanning...",
    );
    let mut log = Vec::new();
    let outcome = loop {
        tokio::select! {
            biased;
            outcome = &mut pending => break outcome,
            Some(event) = events.recv() => {
                if let SessionEvent::Status(status) = &event {
                    spinner.set_message(status.message());
                }
                log.push(event);
            }
            interrupt = tokio::signal::ctrl_c() => {
                if let Err(error) = interrupt {
                    debug!(?error, "could not listen for Ctrl+C");
                }
                controller.stop_scan();
            }
        }
    };
    drop(spinner);
    let result = outcome?;
    log.extend(std::iter::from_fn(|| events.try_recv().ok()));

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            for event in &log {
                writeln!(out, "{}", SessionEventView::new(event, &painter))?;
            }
            writeln!(out, "{}", DeviceListView::new(&result, &painter))?;
            if args.adv {
                for device in result.devices() {
                    let advertisement = result
                        .advertisement(device.address())
                        .unwrap_or(device.advertisement());
                    writeln!(out, "{}", AdvertisementView::new(device, advertisement, &painter))?;
                }
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &result)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
