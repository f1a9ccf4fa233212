use std::io;
use std::pin::pin;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use derive_more::Display;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{info, instrument};

use crate::cli::OutputFormat;
use crate::cli::command::parse_duration;
use crate::hw::{Backend, DeviceHandle};
use crate::measurement::HeartRateReading;
use crate::monitor::{
    ConnectionState, ConnectionStatus, HealthCheckPolicy, HeartRateMonitor, MonitorConfig,
    ReconnectPolicy,
};
use crate::terminal::TerminalClient;

use super::ui::{ListenReadyView, ListenSummaryView, Painter, ReadingView, StatusView};

/// Arguments for the `listen` command.
#[derive(Debug, Default, Args)]
pub struct ListenArgs {
    /// Stop after this many readings. If omitted, listen until Ctrl+C.
    #[arg(long)]
    max_readings: Option<usize>,
    /// Connect to this device id directly instead of scanning.
    #[arg(long)]
    device: Option<String>,
    /// How long the initial scan or connection may take.
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,
    /// First reconnect delay; doubles on each failed attempt.
    #[arg(long, value_parser = parse_duration)]
    base_delay: Option<Duration>,
    /// Upper bound for reconnect delays.
    #[arg(long, value_parser = parse_duration)]
    max_delay: Option<Duration>,
    /// Reconnect attempts before giving up.
    #[arg(long)]
    max_attempts: Option<u32>,
    /// Longest gap between readings before the link counts as stale.
    #[arg(long, value_parser = parse_duration)]
    stale_threshold: Option<Duration>,
    /// How often the link health is checked.
    #[arg(long, value_parser = parse_duration)]
    health_interval: Option<Duration>,
}

impl ListenArgs {
    /// Creates listen arguments with an optional reading limit.
    #[must_use]
    pub fn new(max_readings: Option<usize>) -> Self {
        Self {
            max_readings,
            ..Self::default()
        }
    }

    /// Connects to `device_id` without scanning.
    #[must_use]
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device = Some(device_id.into());
        self
    }

    /// Overrides the reconnect policy knobs.
    #[must_use]
    pub fn with_reconnect(mut self, base_delay: Duration, max_attempts: u32) -> Self {
        self.base_delay = Some(base_delay);
        self.max_attempts = Some(max_attempts);
        self
    }

    pub(crate) fn max_readings(&self) -> Option<usize> {
        self.max_readings
    }

    pub(crate) fn monitor_config(&self) -> MonitorConfig {
        let reconnect_defaults = ReconnectPolicy::default();
        let health_defaults = HealthCheckPolicy::default();
        let defaults = MonitorConfig::default();

        MonitorConfig::builder()
            .reconnect(
                ReconnectPolicy::builder()
                    .base_delay(self.base_delay.unwrap_or(reconnect_defaults.base_delay()))
                    .max_delay(self.max_delay.unwrap_or(reconnect_defaults.max_delay()))
                    .max_reconnect_attempts(
                        self.max_attempts
                            .unwrap_or(reconnect_defaults.max_reconnect_attempts()),
                    )
                    .build(),
            )
            .health(
                HealthCheckPolicy::builder()
                    .check_interval(
                        self.health_interval
                            .unwrap_or(health_defaults.check_interval()),
                    )
                    .stale_threshold(
                        self.stale_threshold
                            .unwrap_or(health_defaults.stale_threshold()),
                    )
                    .build(),
            )
            .connect_timeout(self.timeout.unwrap_or(defaults.connect_timeout()))
            .build()
    }

    fn scan_timeout(&self) -> Duration {
        self.timeout
            .unwrap_or_else(|| MonitorConfig::default().scan().timeout())
    }
}

/// Why a listen session ended.
#[derive(Debug, Clone, Eq, PartialEq, Display)]
pub(crate) enum ListenStopReason {
    #[display("reached limit of {_0} reading(s)")]
    ReachedLimit(usize),
    #[display("interrupted")]
    Interrupted,
    #[display("failed: {_0}")]
    Failed(String),
}

/// Totals reported once a listen session ends.
#[derive(Debug, Clone)]
pub(crate) struct ListenSummary {
    device: DeviceHandle,
    received_readings: usize,
    reconnects: usize,
    stop_reason: ListenStopReason,
}

impl ListenSummary {
    pub(crate) fn new(
        device: DeviceHandle,
        received_readings: usize,
        reconnects: usize,
        stop_reason: ListenStopReason,
    ) -> Self {
        Self {
            device,
            received_readings,
            reconnects,
            stop_reason,
        }
    }

    pub(crate) fn received_readings(&self) -> usize {
        self.received_readings
    }

    pub(crate) fn reconnects(&self) -> usize {
        self.reconnects
    }

    pub(crate) fn stop_reason(&self) -> &ListenStopReason {
        &self.stop_reason
    }
}

/// Counts changes into `Connected`; repeated snapshots of one connection count once.
#[derive(Debug)]
struct ReconnectCounter {
    previous: ConnectionState,
    count: usize,
}

impl ReconnectCounter {
    fn new(initial: ConnectionState) -> Self {
        Self {
            previous: initial,
            count: 0,
        }
    }

    fn observe(&mut self, state: ConnectionState) {
        if state == ConnectionState::Connected && self.previous != ConnectionState::Connected {
            self.count += 1;
        }
        self.previous = state;
    }

    fn count(&self) -> usize {
        self.count
    }
}

/// Writes listen output in the selected format.
struct ListenOutput<'a, W> {
    out: &'a mut W,
    painter: Painter,
    format: OutputFormat,
}

impl<W> ListenOutput<'_, W>
where
    W: io::Write,
{
    fn ready(&mut self, device: &DeviceHandle) -> io::Result<()> {
        match self.format {
            OutputFormat::Pretty => {
                writeln!(self.out, "{}", ListenReadyView::new(device, &self.painter))?;
                writeln!(self.out)
            }
            OutputFormat::Json => self.json(&json!({ "event": "connected", "device": device })),
        }
    }

    fn reading(&mut self, index: usize, reading: &HeartRateReading) -> io::Result<()> {
        match self.format {
            OutputFormat::Pretty => writeln!(
                self.out,
                "{}",
                ReadingView::new(index, reading, &self.painter)
            ),
            OutputFormat::Json => self.json(&json!({
                "event": "reading",
                "index": index,
                "bpm": reading.bpm(),
                "reading": reading,
            })),
        }
    }

    fn status(&mut self, status: &ConnectionStatus) -> io::Result<()> {
        match self.format {
            OutputFormat::Pretty => {
                writeln!(self.out, "{}", StatusView::new(status, &self.painter))
            }
            OutputFormat::Json => self.json(&json!({ "event": "status", "status": status })),
        }
    }

    fn summary(&mut self, summary: &ListenSummary) -> io::Result<()> {
        match self.format {
            OutputFormat::Pretty => {
                writeln!(self.out)?;
                writeln!(self.out, "{}", ListenSummaryView::new(summary, &self.painter))
            }
            OutputFormat::Json => self.json(&json!({
                "event": "stopped",
                "device": summary.device,
                "reason": summary.stop_reason().to_string(),
                "received_readings": summary.received_readings(),
                "reconnects": summary.reconnects(),
            })),
        }
    }

    fn json(&mut self, value: &serde_json::Value) -> io::Result<()> {
        serde_json::to_writer(&mut *self.out, value)?;
        writeln!(self.out)
    }
}

/// Executes the `listen` command.
#[instrument(skip_all, level = "info", fields(?output_format, max_readings = args.max_readings()))]
pub(crate) async fn run<W>(
    backend: Backend,
    args: &ListenArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let monitor = HeartRateMonitor::new(backend, args.monitor_config());
    let result = listen(&monitor, args, out, terminal_client, output_format).await;
    monitor.dispose().await;
    result
}

async fn listen<W>(
    monitor: &HeartRateMonitor,
    args: &ListenArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let mut output = ListenOutput {
        out,
        painter: Painter::new(terminal_client.stdout_is_terminal()),
        format: output_format,
    };
    let mut readings = pin!(monitor.readings());

    let timeout = args.scan_timeout();
    let device = match args.device.as_deref() {
        Some(device_id) => monitor.connect_to_device(device_id, timeout).await?,
        None => monitor.scan_and_connect(timeout).await?,
    };
    output.ready(&device)?;

    let mut statuses = monitor.status();
    // The first snapshot is the connected state just reported above.
    let _ = statuses.next().await;
    let mut reconnects = ReconnectCounter::new(ConnectionState::Connected);

    let mut ctrl_c = pin!(tokio::signal::ctrl_c());
    let mut received = 0_usize;
    let stop_reason = loop {
        tokio::select! {
            interrupted = &mut ctrl_c => {
                interrupted?;
                break ListenStopReason::Interrupted;
            }
            reading = readings.next() => {
                let Some(reading) = reading else {
                    break ListenStopReason::Failed("reading stream closed".into());
                };
                received += 1;
                output.reading(received, &reading)?;
                if args.max_readings().is_some_and(|limit| received >= limit) {
                    break ListenStopReason::ReachedLimit(received);
                }
            }
            status = statuses.next() => {
                let Some(status) = status else {
                    break ListenStopReason::Failed("monitor stopped".into());
                };
                output.status(&status)?;
                reconnects.observe(status.state());
                if status.state() == ConnectionState::Error {
                    let reason = status
                        .error()
                        .map_or_else(|| "unknown error".to_string(), |error| error.message().to_string());
                    break ListenStopReason::Failed(reason);
                }
            }
        }
    };
    let reconnects = reconnects.count();
    info!(%stop_reason, received, reconnects, "listen session ended");

    let summary = ListenSummary::new(device, received, reconnects, stop_reason);
    output.summary(&summary)?;
    if let ListenStopReason::Failed(reason) = summary.stop_reason() {
        anyhow::bail!("listen session failed: {reason}");
    }
    Ok(())
}
