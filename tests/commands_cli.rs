use assert_matches::assert_matches;
use clap::Parser;
use clap::error::ErrorKind;
use insta::assert_snapshot;
use pretty_assertions::assert_eq;

use gattlink::{
    ConnectionFailure, FAKE_NOTIFY_CHARACTERISTIC, FAKE_SERVICE, InteractionError,
    NotificationFailure, PeripheralAddress,
};

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl gattlink::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

async fn run_with_parsed_args(args: gattlink::Args) -> anyhow::Result<String> {
    let mut output = Vec::new();
    let output_format = args.output_format().unwrap_or_default();
    let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
    let backend = match maybe_fake_args {
        Some(fake_args) => gattlink::fake_backend(fake_args),
        None => gattlink::real_backend(),
    };
    gattlink::run_with_clients(
        command,
        &mut output,
        &FakeTerminalClient,
        backend,
        output_format,
    )
    .await?;
    Ok(String::from_utf8(output)?)
}

async fn run_with_argv<const N: usize>(argv: [&str; N]) -> anyhow::Result<String> {
    let parsed_args = gattlink::Args::try_parse_from(argv)?;
    run_with_parsed_args(parsed_args).await
}

fn interaction_error(error: &anyhow::Error) -> Option<&InteractionError> {
    error.downcast_ref::<InteractionError>()
}

#[tokio::test]
async fn scan_command_lists_each_peripheral_once_then_a_table() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "gattlink",
        "--fake",
        "--fake-scan",
        "AA:AA|Thermo|-40;BB:BB|-|-71",
        "scan",
        "--service",
        "fff0",
        "--duration",
        "50ms",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r"
    + AA:AA Thermo -40 dBm
    + BB:BB <unknown> -71 dBm
    Scan finished: 2 device(s) discovered
    ╭─────────┬───────────┬─────────┬──────────╮
    │ address │ name      │ rssi    │ services │
    ├─────────┼───────────┼─────────┼──────────┤
    │ AA:AA   │ Thermo    │ -40 dBm │ fff0     │
    │ BB:BB   │ <unknown> │ -71 dBm │ fff0     │
    ╰─────────┴───────────┴─────────┴──────────╯
    ");

    Ok(())
}

#[tokio::test]
async fn scan_command_writes_json_lines_when_requested() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "gattlink",
        "--format",
        "json",
        "--fake",
        "--fake-scan",
        "AA:AA|Thermo|-40",
        "scan",
        "--service",
        "fff0",
        "--duration",
        "50ms",
    ])
    .await?;

    let records = stdout
        .lines()
        .map(serde_json::from_str::<serde_json::Value>)
        .collect::<Result<Vec<_>, _>>()?;
    let kinds: Vec<&str> = records
        .iter()
        .filter_map(|record| record["event"].as_str())
        .collect();
    assert_eq!(vec!["device_discovered", "finished"], kinds);
    assert_eq!("AA:AA", records[0]["data"]["address"]);

    Ok(())
}

#[tokio::test]
async fn listen_command_streams_notifications_until_the_limit() -> anyhow::Result<()> {
    let fake = gattlink::FakeArgs::builder()
        .scan("AA:AA|Thermo|-40")?
        .notifications("01,0203,")?
        .build();
    let listen = gattlink::ListenArgs::new(
        PeripheralAddress::new("AA:AA"),
        FAKE_SERVICE,
        FAKE_NOTIFY_CHARACTERISTIC,
    )
    .with_max_notifications(3);
    let args = gattlink::Args::new(gattlink::Command::Listen(listen)).with_fake(fake);

    let stdout = run_with_parsed_args(args).await?;

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(Some(&"Notifications enabled:"), lines.first());
    let notifications: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|line| line.contains("Notification raw="))
        .collect();
    assert_eq!(
        vec![
            "[0001] Notification raw=01",
            "[0002] Notification raw=02 03",
            "[0003] Notification raw=<empty>",
        ],
        notifications
    );
    assert_eq!(
        Some(&"Stopped: reached notification limit (3) - received 3 notification(s)"),
        lines.last()
    );

    Ok(())
}

#[tokio::test]
async fn listen_command_fails_when_the_descriptor_write_is_rejected() {
    let result = run_with_argv([
        "gattlink",
        "--fake",
        "--fake-scan",
        "AA:AA|Thermo|-40",
        "--fake-descriptor-status",
        "5",
        "listen",
        "--address",
        "AA:AA",
        "--service",
        "fff0",
        "--characteristic",
        "fff1",
        "--max-notifications",
        "1",
        "--notification-policy",
        "await-descriptor-write",
    ])
    .await;

    let error = result.expect_err("a failed descriptor write should fail the listen session");
    assert_matches!(
        interaction_error(&error),
        Some(InteractionError::NotificationFailed(
            NotificationFailure::DescriptorWriteFailed { status: 5 }
        ))
    );
}

#[tokio::test]
async fn write_command_reports_the_written_payload() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "gattlink",
        "--fake",
        "--fake-scan",
        "AA:AA|Thermo|-40",
        "write",
        "--address",
        "AA:AA",
        "--service",
        "fff0",
        "--characteristic",
        "fff2",
        "--value",
        "0x0102",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @"Wrote fff2 on AA:AA raw=01 02");

    Ok(())
}

#[tokio::test]
async fn read_command_reports_the_fixture_value() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "gattlink",
        "--fake",
        "--fake-scan",
        "AA:AA|Thermo|-40",
        "--fake-read",
        "DEADBEEF",
        "read",
        "--address",
        "AA:AA",
        "--service",
        "fff0",
        "--characteristic",
        "fff1",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @"Read fff1 on AA:AA raw=DE AD BE EF");

    Ok(())
}

#[tokio::test]
async fn read_command_writes_a_json_record() -> anyhow::Result<()> {
    let args = gattlink::Args::try_parse_from([
        "gattlink",
        "--fake",
        "--fake-scan",
        "AA:AA|Thermo|-40",
        "read",
        "--address",
        "AA:AA",
        "--service",
        "fff0",
        "--characteristic",
        "fff1",
    ])?
    .with_format(gattlink::OutputFormat::Json);

    let stdout = run_with_parsed_args(args).await?;

    let record: serde_json::Value = serde_json::from_str(stdout.trim_end())?;
    assert_eq!("read", record["operation"]);
    assert_eq!("AA:AA", record["address"]);
    assert_eq!("0100", record["value"]);

    Ok(())
}

#[tokio::test]
async fn commands_fail_when_the_peripheral_is_not_advertising() {
    let result = run_with_argv([
        "gattlink",
        "--fake",
        "--fake-scan",
        "AA:AA|Thermo|-40",
        "read",
        "--address",
        "CC:CC",
        "--service",
        "fff0",
        "--characteristic",
        "fff1",
        "--scan-timeout",
        "50ms",
    ])
    .await;

    let error = result.expect_err("an unknown address should not be found");
    assert_matches!(
        interaction_error(&error),
        Some(InteractionError::PeripheralNotFound { address, service })
            if address.as_str() == "CC:CC" && *service == FAKE_SERVICE
    );
}

#[tokio::test]
async fn commands_report_classified_connection_failures() {
    let result = run_with_argv([
        "gattlink",
        "--fake",
        "--fake-scan",
        "AA:AA|Thermo|-40",
        "--fake-connect-status",
        "133",
        "write",
        "--address",
        "AA:AA",
        "--service",
        "fff0",
        "--characteristic",
        "fff2",
        "--value",
        "01",
    ])
    .await;

    let error = result.expect_err("status 133 should fail the connection");
    assert_matches!(
        interaction_error(&error),
        Some(InteractionError::ConnectFailed {
            failure: ConnectionFailure::Timeout,
            ..
        })
    );
}

#[test]
fn fake_builder_rejects_an_invalid_scan_fixture() {
    let result = gattlink::FakeArgs::builder().scan("invalid-record");
    assert_matches!(
        result.err(),
        Some(gattlink::FixtureError::InvalidRecordFieldCount)
    );
}

#[test]
fn write_command_rejects_a_malformed_payload() {
    let result = gattlink::Args::try_parse_from([
        "gattlink",
        "write",
        "--address",
        "AA:AA",
        "--service",
        "fff0",
        "--characteristic",
        "fff2",
        "--value",
        "0x123",
    ]);

    let error = result.expect_err("an odd-length payload should fail argument parsing");
    assert_eq!(ErrorKind::ValueValidation, error.kind());
}

#[test]
fn service_arguments_reject_malformed_uuids() {
    let result = gattlink::Args::try_parse_from(["gattlink", "scan", "--service", "not-a-uuid"]);

    let error = result.expect_err("a malformed UUID should fail argument parsing");
    assert_eq!(ErrorKind::ValueValidation, error.kind());
}
