use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::cli::OutputFormat;
use crate::cli::command::parse_duration;
use crate::error::HeartRateError;
use crate::hw::{Backend, DeviceScanner, ScanPolicy, platform};
use crate::terminal::TerminalClient;

use super::ui::{DeviceView, Painter};

/// Arguments for the `scan` command.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// How long to scan before giving up (e.g. `10s`, `1m`).
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    timeout: Duration,
    /// Extra case-insensitive name fragments that mark a sensor, on top of the defaults.
    #[arg(long = "name-hint")]
    name_hints: Vec<String>,
}

impl Default for ScanArgs {
    fn default() -> Self {
        Self {
            timeout: ScanPolicy::default().timeout(),
            name_hints: Vec::new(),
        }
    }
}

impl ScanArgs {
    /// Creates scan arguments with an explicit timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub(crate) fn policy(&self) -> ScanPolicy {
        let defaults = ScanPolicy::default();
        let mut hints = defaults.vendor_name_hints().to_vec();
        hints.extend(self.name_hints.iter().map(|hint| hint.to_lowercase()));
        ScanPolicy::builder()
            .timeout(self.timeout)
            .vendor_name_hints(hints)
            .build()
    }
}

/// Executes the `scan` command.
#[instrument(skip_all, level = "info", fields(?output_format))]
pub(crate) async fn run<W>(
    backend: Backend,
    args: &ScanArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    platform::ensure_ready(backend.platform().as_ref()).await?;

    let policy = args.policy();
    let timeout = policy.timeout();
    let scanner = DeviceScanner::new(backend.transport().clone(), policy);
    let cancel = CancellationToken::new();

    let scan = scanner.scan_for_heart_rate_device(timeout, &cancel);
    tokio::pin!(scan);
    let result = tokio::select! {
        result = &mut scan => result,
        interrupted = tokio::signal::ctrl_c() => {
            interrupted?;
            cancel.cancel();
            scan.await
        }
    };
    let device = match result {
        Ok(device) => device,
        Err(HeartRateError::ScanCancelled) => {
            info!("scan interrupted");
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", painter.heading("Found sensor:"))?;
            writeln!(out, "{}", DeviceView::new(&device, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &device)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
