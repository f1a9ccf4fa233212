use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::listen::ListenArgs;
use crate::cli::scan::ScanArgs;
use crate::error::{CliConfigError, FixtureError};
use crate::hw::{FakeBackendConfig, NotificationPayloads, ScanFixture};

const DEFAULT_FAKE_INTERVAL: Duration = Duration::from_secs(1);

/// Command-line options for the heart-rate monitor.
#[derive(Debug, Parser)]
#[command(name = "hrlink", about = "Stream heart rate from a Bluetooth LE sensor.")]
pub struct Args {
    /// Log level override; defaults to `RUST_LOG` or `warn`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Uses the fake BLE backend with fixture-driven discovery and payloads.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake scan fixtures in the form `device_id|local_name|rssi|service_ids;...`.
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Fake measurement payloads as comma-separated hexadecimal payloads.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationPayloads>,
    /// Delay between fake measurement payloads (e.g. `250ms`, `1s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_interval: Option<Duration>,
    /// Artificial delay before fake devices become visible to a scan.
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_discovery_delay: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use hrlink::{Args, Command, ListenArgs, ScanArgs};
    ///
    /// let scan = Args::new(Command::Scan(ScanArgs::default()));
    /// let listen = Args::new(Command::Listen(ListenArgs::new(Some(10))));
    /// let _ = (scan, listen);
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            fake: false,
            fake_scan: None,
            fake_notifications: None,
            fake_interval: None,
            fake_discovery_delay: None,
            command,
        }
    }

    /// Enables fake backend mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            notifications,
            notification_interval,
            discovery_delay,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan_fixture);
        self.fake_notifications = notifications;
        self.fake_interval = Some(notification_interval);
        self.fake_discovery_delay = Some(discovery_delay);
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Explicitly requested output format, if any.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Splits parsed CLI arguments into command and optional fake-backend settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI backend configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_notifications,
            fake_interval,
            fake_discovery_delay,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan_fixture,
                notifications: fake_notifications,
                notification_interval: fake_interval.unwrap_or(DEFAULT_FAKE_INTERVAL),
                discovery_delay: fake_discovery_delay.unwrap_or(Duration::ZERO),
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake backend arguments for programmatic runs.
#[derive(Debug, Builder)]
#[builder(derive(Debug))]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationPayloads>,
    #[builder(default = DEFAULT_FAKE_INTERVAL)]
    notification_interval: Duration,
    #[builder(default)]
    discovery_delay: Duration,
}

impl FakeArgs {
    pub(crate) fn into_backend_config(self) -> FakeBackendConfig {
        let Self {
            scan_fixture,
            notifications,
            notification_interval,
            discovery_delay,
        } = self;
        let notifications: Vec<Vec<u8>> = notifications.map(Into::into).unwrap_or_default();

        FakeBackendConfig::builder()
            .devices(scan_fixture)
            .notifications(notifications)
            .notification_interval(notification_interval)
            .discovery_delay(discovery_delay)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan until the first heart-rate sensor is found and print it.
    Scan(ScanArgs),
    /// Connect to a sensor and stream readings, reconnecting when the link drops.
    Listen(ListenArgs),
}

/// Log level accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Rendering of command output.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Tables and coloured lines for people.
    Pretty,
    /// One JSON object per line.
    Json,
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn fake_mode_requires_scan_fixture() {
        let result = Args::try_parse_from(["hrlink", "--fake", "scan"]);

        let error = result.expect_err("missing --fake-scan should fail argument parsing");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[rstest]
    #[case::scan(["hrlink", "--fake-scan", "AA:BB|Polar H10|-43|180d", "scan"])]
    #[case::notifications(["hrlink", "--fake-notifications", "0048", "scan"])]
    #[case::interval(["hrlink", "--fake-interval", "250ms", "scan"])]
    fn fake_fixture_flags_require_fake_mode(#[case] argv: [&str; 4]) {
        let error = Args::try_parse_from(argv).expect_err("fake flags should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn invalid_fixture_is_rejected_at_parse_time() {
        let result = Args::try_parse_from([
            "hrlink",
            "--fake",
            "--fake-scan",
            "AA:BB|Polar H10",
            "scan",
        ]);

        let error = result.expect_err("malformed fixture should fail argument parsing");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }

    #[test]
    fn fake_mode_builds_fake_settings() {
        let cli = Args::try_parse_from([
            "hrlink",
            "--log-level",
            "debug",
            "--output",
            "json",
            "--fake",
            "--fake-scan",
            "AA:BB|Polar H10|-43|180d",
            "--fake-notifications",
            "0048,0049",
            "listen",
            "--max-readings",
            "2",
        ])
        .expect("valid fake arguments should parse");

        assert_eq!(Some(LogLevel::Debug), cli.log_level());
        assert_eq!(Some(OutputFormat::Json), cli.output_format());
        let (command, fake_args) = cli
            .into_command_and_fake_args()
            .expect("valid fake arguments should resolve fake settings");
        assert_matches!(command, Command::Listen(_));
        assert_matches!(fake_args, Some(_));
    }

    #[test]
    fn fake_args_builder_parses_fixtures() {
        let fake = FakeArgs::builder()
            .scan_fixture("AA:BB|Polar H10|-43|180d")
            .and_then(|builder| builder.notifications("0048"));

        assert_matches!(fake, Ok(_));
    }

    #[test]
    fn fake_args_builder_rejects_bad_payloads() {
        let fake = FakeArgs::builder()
            .scan_fixture("AA:BB|Polar H10|-43|180d")
            .and_then(|builder| builder.notifications("zz"));

        assert_matches!(fake, Err(FixtureError::InvalidHex { .. }));
    }
}
