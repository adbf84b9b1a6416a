use std::io;
use std::time::Duration;

use anyhow::Result;
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::central::{
    BleCentral, ConnectionEvent, DEFAULT_SCAN_DURATION_MILLIS, EventStream, PeripheralHandle,
    ScanEvent, ScanRequest,
};
use crate::cli::output::Output;
use crate::cli::ui::Painter;
use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::error::InteractionError;
use crate::hw::{PeripheralAddress, PlatformBackend, platform_event_channel, platform_from_backend};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Selects the btleplug platform on the first local adapter.
#[must_use]
pub fn real_backend() -> PlatformBackend {
    PlatformBackend::Real
}

/// Selects a scripted fake platform built from fixture arguments.
#[must_use]
pub fn fake_backend(fake_args: FakeArgs) -> PlatformBackend {
    PlatformBackend::Fake(fake_args.into_platform_config())
}

/// App-level helper that finds a peripheral by scanning and then connects to it.
#[derive(Debug)]
pub struct SessionHandler {
    central: BleCentral,
    scan_timeout: Duration,
    auto_connect: bool,
}

impl SessionHandler {
    /// Creates a handler that scans for up to the default scan duration.
    ///
    /// ```
    /// # fn demo(central: gattlink::BleCentral) {
    /// let handler = gattlink::SessionHandler::new(central)
    ///     .with_scan_timeout(std::time::Duration::from_secs(5));
    /// let _ = handler;
    /// # }
    /// ```
    #[must_use]
    pub fn new(central: BleCentral) -> Self {
        Self {
            central,
            scan_timeout: Duration::from_millis(DEFAULT_SCAN_DURATION_MILLIS.unsigned_abs()),
            auto_connect: false,
        }
    }

    #[must_use]
    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    #[must_use]
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Scans until `address` is seen advertising `service`, then connects to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails, the peripheral is not seen before the
    /// scan times out, or the connection attempt fails.
    #[instrument(skip(self), level = "info", fields(%address, %service))]
    pub async fn connect(
        self,
        address: &PeripheralAddress,
        service: Uuid,
    ) -> Result<ConnectedPeripheral, InteractionError> {
        let Self {
            central,
            scan_timeout,
            auto_connect,
        } = self;

        find_peripheral(&central, address, service, scan_timeout).await?;

        let (handle, mut events) = central.connect(address.clone(), auto_connect)?;
        while let Some(event) = events.next().await {
            match event {
                ConnectionEvent::Connecting { .. } => debug!(%handle, "connecting"),
                ConnectionEvent::Connected { .. } => {
                    info!(%handle, "connected");
                    return Ok(ConnectedPeripheral {
                        central,
                        handle,
                        events,
                    });
                }
                ConnectionEvent::Failed { failure, .. } => {
                    central.close(&handle);
                    return Err(InteractionError::ConnectFailed {
                        address: address.clone(),
                        failure,
                    });
                }
                ConnectionEvent::Disconnected { .. } => break,
            }
        }

        central.close(&handle);
        Err(InteractionError::ConnectionEnded {
            address: address.clone(),
        })
    }
}

async fn find_peripheral(
    central: &BleCentral,
    address: &PeripheralAddress,
    service: Uuid,
    scan_timeout: Duration,
) -> Result<(), InteractionError> {
    let request = ScanRequest::builder()
        .service_filter(service)
        .duration_millis(i64::try_from(scan_timeout.as_millis()).unwrap_or(i64::MAX))
        .build();
    let mut scan = central.start_scan(request)?;

    while let Some(event) = scan.next().await {
        let found = match &event {
            ScanEvent::DeviceDiscovered(record) => record.address() == address,
            ScanEvent::BatchDiscovered(records) => {
                records.iter().any(|record| record.address() == address)
            }
            ScanEvent::Failed(failure) => return Err(InteractionError::ScanFailed(*failure)),
            ScanEvent::Finished(_records) => break,
        };
        if found {
            debug!("peripheral found, stopping scan");
            central.stop_scan();
            return Ok(());
        }
    }

    warn!("peripheral not seen before the scan ended");
    Err(InteractionError::PeripheralNotFound {
        address: address.clone(),
        service,
    })
}

/// An established connection opened by [`SessionHandler::connect`].
#[derive(Debug)]
pub struct ConnectedPeripheral {
    central: BleCentral,
    handle: PeripheralHandle,
    events: EventStream<ConnectionEvent>,
}

impl ConnectedPeripheral {
    #[must_use]
    pub fn central(&self) -> &BleCentral {
        &self.central
    }

    #[must_use]
    pub fn handle(&self) -> &PeripheralHandle {
        &self.handle
    }

    /// Returns the connection events that follow `Connected`.
    pub fn events_mut(&mut self) -> &mut EventStream<ConnectionEvent> {
        &mut self.events
    }

    /// Disconnects and releases the connection.
    pub fn close(self) {
        self.central.close(&self.handle);
    }
}

/// Runs the CLI command against a platform backend.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = gattlink::Args::try_parse_from([
///     "gattlink",
///     "--fake",
///     "--fake-scan",
///     "AA:AA|Thermo|-40",
///     "scan",
///     "--service",
///     "fff0",
///     "--duration",
///     "20ms",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let backend = match maybe_fake_args {
///     Some(fake_args) => gattlink::fake_backend(fake_args),
///     None => gattlink::real_backend(),
/// };
/// let mut out = Vec::new();
/// gattlink::run(command, &mut out, backend).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run<W>(command: Command, out: &mut W, backend: PlatformBackend) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, out, backend, None, OutputFormat::Pretty).await
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
    backend: PlatformBackend,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
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

/// Runs the CLI command with an injected terminal client.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: PlatformBackend,
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
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl gattlink::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = gattlink::Args::try_parse_from([
///     "gattlink",
///     "--log-level",
///     "trace",
///     "--fake",
///     "--fake-scan",
///     "AA:AA|Thermo|-40",
///     "read",
///     "--address",
///     "AA:AA",
///     "--service",
///     "fff0",
///     "--characteristic",
///     "fff1",
/// ])?;
/// let log_level = args.log_level();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let backend = match maybe_fake_args {
///     Some(fake_args) => gattlink::fake_backend(fake_args),
///     None => gattlink::real_backend(),
/// };
/// let mut out = Vec::new();
/// gattlink::run_with_clients_and_log_level(
///     command,
///     &mut out,
///     &FakeTerminal,
///     backend,
///     log_level,
///     gattlink::OutputFormat::Json,
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
    fields(command = %command.name(), ?log_level, ?output_format)
)]
pub async fn run_with_clients_and_log_level<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: PlatformBackend,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        env!("CARGO_PKG_NAME"),
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    let (sink, source) = platform_event_channel();
    let platform = platform_from_backend(backend, sink).await?;
    let central = BleCentral::with_config(platform, command.central_config());
    let dispatcher = central.spawn_dispatcher(source);

    let painter = Painter::for_terminal(terminal_client);
    let mut output = Output::new(out, output_format);
    let command_result = match &command {
        Command::Scan(args) => crate::cli::scan::run(&central, args, &mut output, &painter).await,
        Command::Listen(args) => {
            crate::cli::listen::run(&central, args, &mut output, &painter).await
        }
        Command::Write(args) => {
            crate::cli::gatt::run_write(&central, args, &mut output, &painter).await
        }
        Command::Read(args) => {
            crate::cli::gatt::run_read(&central, args, &mut output, &painter).await
        }
    };

    central.stop_scan();
    dispatcher.shutdown();
    dispatcher.join().await;
    command_result
}
