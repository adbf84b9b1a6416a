use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;

use gattlink::{
    Args, InteractionError, OutputFormat, fake_backend, real_backend, run_with_log_level,
};

/// Exit status when the peripheral could not be found or reached.
const UNREACHABLE_EXIT_CODE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let log_level = args.log_level();
        let output_format = args.output_format().unwrap_or(if stdout.is_terminal() {
            OutputFormat::Pretty
        } else {
            OutputFormat::Json
        });
        let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
        let backend = maybe_fake_args.map_or_else(real_backend, fake_backend);

        run_with_log_level(command, &mut stdout, backend, log_level, output_format).await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            exit_code(&error)
        }
    }
}

fn exit_code(error: &anyhow::Error) -> ExitCode {
    match error.downcast_ref::<InteractionError>() {
        Some(
            InteractionError::PeripheralNotFound { .. }
            | InteractionError::ConnectFailed { .. }
            | InteractionError::ConnectionEnded { .. },
        ) => ExitCode::from(UNREACHABLE_EXIT_CODE),
        _ => ExitCode::FAILURE,
    }
}
