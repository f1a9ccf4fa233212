use std::io;

use anyhow::Result;
use tracing::instrument;

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::hw::{Backend, BackendSelection};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Selects the btleplug-backed BLE stack.
#[must_use]
pub fn real_backend() -> BackendSelection {
    BackendSelection::Real
}

/// Selects the in-memory fake BLE stack driven by CLI fixtures.
#[must_use]
pub fn fake_backend(fake_args: FakeArgs) -> BackendSelection {
    BackendSelection::Fake(fake_args.into_backend_config())
}

/// Runs the CLI command against the selected backend.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = hrlink::Args::try_parse_from([
///     "hrlink",
///     "--fake",
///     "--fake-scan",
///     "AA:BB:CC|Polar H10 A1B2|-43|180d",
///     "scan",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let backend = match maybe_fake_args {
///     Some(fake_args) => hrlink::fake_backend(fake_args),
///     None => hrlink::real_backend(),
/// };
/// let mut out = Vec::new();
/// hrlink::run(command, &mut out, backend, hrlink::OutputFormat::Json).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    backend: BackendSelection,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, out, backend, None, output_format).await
}

/// Runs the CLI command with an explicit telemetry log-level override.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run_with_log_level<W>(
    command: Command,
    out: &mut W,
    backend: BackendSelection,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let backend = Backend::from_selection(backend).await?;
    run_with_clients_and_log_level(
        command,
        out,
        &SystemTerminalClient,
        backend,
        log_level,
        output_format,
    )
    .await
}

/// Runs the CLI command with injected clients.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: Backend,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(command, out, terminal_client, backend, None, output_format)
        .await
}

/// Runs the CLI command with injected clients and explicit telemetry settings.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// struct FakeTerminal;
/// impl hrlink::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let fake = hrlink::FakeBackend::new(
///     hrlink::FakeBackendConfig::builder()
///         .devices(vec![hrlink::FakeDevice::heart_rate_sensor("AA:BB:CC", "Polar H10 A1B2")])
///         .notifications(vec![vec![0x00, 0x48]])
///         .build(),
/// );
/// let command = hrlink::Command::Listen(hrlink::ListenArgs::new(Some(2)));
/// let mut out = Vec::new();
/// hrlink::run_with_clients_and_log_level(
///     command,
///     &mut out,
///     &FakeTerminal,
///     fake.backend(),
///     Some(hrlink::LogLevel::Trace),
///     hrlink::OutputFormat::Pretty,
/// ).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
#[instrument(
    skip(out, terminal_client, backend),
    level = "info",
    fields(command = %command_name(&command), ?log_level)
)]
pub async fn run_with_clients_and_log_level<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: Backend,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "hrlink",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    match command {
        Command::Scan(args) => {
            crate::cli::scan::run(backend, &args, out, terminal_client, output_format).await
        }
        Command::Listen(args) => {
            crate::cli::listen::run(backend, &args, out, terminal_client, output_format).await
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Scan(_args) => "scan",
        Command::Listen(_args) => "listen",
    }
}
