use std::io::{self, IsTerminal};

/// Reports whether the standard streams are attached to a terminal.
pub trait TerminalClient {
    fn stdout_is_terminal(&self) -> bool;

    fn stderr_is_terminal(&self) -> bool;
}

/// Terminal detection for the running process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTerminalClient;

impl TerminalClient for SystemTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        io::stdout().is_terminal()
    }

    fn stderr_is_terminal(&self) -> bool {
        io::stderr().is_terminal()
    }
}
