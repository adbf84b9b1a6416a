use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::central::CentralConfig;
use crate::cli::gatt::{ReadArgs, WriteArgs};
use crate::cli::listen::ListenArgs;
use crate::cli::scan::ScanArgs;
use crate::error::{CliConfigError, FixtureError};
use crate::hw::{FakePlatformConfig, HexPayload, NotificationPayloads, ScanFixture};

/// Command-line options for the gattlink BLE central.
#[derive(Debug, Parser)]
#[command(name = "gattlink", about = "Scan, connect to, and talk with BLE peripherals.")]
pub struct Args {
    /// Overrides `RUST_LOG` for this run.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output style; defaults to pretty on a terminal and JSON lines otherwise.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,
    /// Uses the fake BLE platform with fixture-driven discovery and payloads.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake scan fixtures in the form `address|local_name|rssi;...` (`-` for absent).
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Fake notification payloads as comma-separated hexadecimal payloads.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationPayloads>,
    /// Fake characteristic read payload as hexadecimal bytes.
    #[arg(long, global = true, requires = "fake")]
    fake_read: Option<HexPayload>,
    /// GATT status the fake platform reports for connection attempts.
    #[arg(long, global = true, requires = "fake", allow_negative_numbers = true)]
    fake_connect_status: Option<i32>,
    /// GATT status the fake platform reports for configuration descriptor writes.
    #[arg(long, global = true, requires = "fake", allow_negative_numbers = true)]
    fake_descriptor_status: Option<i32>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use gattlink::{Args, Command, ScanArgs};
    ///
    /// let scan = Args::new(Command::Scan(ScanArgs::new(gattlink::FAKE_SERVICE)));
    /// let _ = scan;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            format: None,
            fake: false,
            fake_scan: None,
            fake_notifications: None,
            fake_read: None,
            fake_connect_status: None,
            fake_descriptor_status: None,
            command,
        }
    }

    /// Enables fake platform mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan,
            notifications,
            read,
            connect_status,
            descriptor_status,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan);
        self.fake_notifications = notifications;
        self.fake_read = read;
        self.fake_connect_status = connect_status;
        self.fake_descriptor_status = descriptor_status;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Returns the explicit log-level override, if one was given.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the explicit output format, if one was given.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.format
    }

    /// Splits parsed CLI arguments into command and optional fake-platform settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI backend configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_notifications,
            fake_read,
            fake_connect_status,
            fake_descriptor_status,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(scan) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan,
                notifications: fake_notifications,
                read: fake_read,
                connect_status: fake_connect_status,
                descriptor_status: fake_descriptor_status,
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake platform arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan: ScanFixture,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationPayloads>,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    read: Option<HexPayload>,
    connect_status: Option<i32>,
    descriptor_status: Option<i32>,
}

impl FakeArgs {
    pub(crate) fn into_platform_config(self) -> FakePlatformConfig {
        let Self {
            scan,
            notifications,
            read,
            connect_status,
            descriptor_status,
        } = self;

        FakePlatformConfig::builder()
            .peripherals(scan)
            .maybe_notifications(notifications)
            .maybe_read_value(read)
            .maybe_connect_status(connect_status)
            .maybe_descriptor_status(descriptor_status)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan for peripherals advertising a service and list each one once.
    Scan(ScanArgs),
    /// Connect, enable notifications on a characteristic, and print each value.
    Listen(ListenArgs),
    /// Connect, discover services, and write one value to a characteristic.
    Write(WriteArgs),
    /// Connect, discover services, and read one characteristic.
    Read(ReadArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan(_args) => "scan",
            Self::Listen(_args) => "listen",
            Self::Write(_args) => "write",
            Self::Read(_args) => "read",
        }
    }

    /// Returns the central configuration this command runs with.
    pub(crate) fn central_config(&self) -> CentralConfig {
        match self {
            Self::Listen(args) => CentralConfig::builder()
                .notification_policy(args.notification_policy())
                .build(),
            Self::Scan(_) | Self::Write(_) | Self::Read(_) => CentralConfig::default(),
        }
    }
}

/// Log verbosity accepted by `--log-level`.
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

/// Output rendering accepted by `--format`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Pretty,
    Json,
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
