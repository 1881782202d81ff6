use std::io::{self, BufRead, IsTerminal};

/// Access to the process terminal, injectable for tests.
pub trait TerminalClient {
    /// Whether stdout is attached to a terminal, which enables colour.
    fn stdout_is_terminal(&self) -> bool;

    /// Whether stderr is attached to a terminal, which enables progress output.
    fn stderr_is_terminal(&self) -> bool;

    /// Opens the line source read by the interactive shell.
    fn open_input(&self) -> Box<dyn BufRead + Send>;
}

/// The terminal of the running process.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SystemTerminalClient;

impl TerminalClient for SystemTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        io::stdout().is_terminal()
    }

    fn stderr_is_terminal(&self) -> bool {
        io::stderr().is_terminal()
    }

    fn open_input(&self) -> Box<dyn BufRead + Send> {
        Box::new(io::BufReader::new(io::stdin()))
    }
}
