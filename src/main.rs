use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;

use blexp::{
    Args, OutputFormat, RunSettings, fake_transport, real_transport, run_with_settings,
};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let output_format = args.output_format().unwrap_or(if stdout.is_terminal() {
            OutputFormat::Pretty
        } else {
            OutputFormat::Json
        });
        let settings = RunSettings::builder()
            .scan_request(args.scan_request()?)
            .maybe_log_level(args.log_level())
            .output_format(output_format)
            .build();
        let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
        let transport = match maybe_fake_args {
            Some(fake_args) => fake_transport(fake_args),
            None => real_transport().await?,
        };

        run_with_settings(command, settings, &mut stdout, transport).await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
