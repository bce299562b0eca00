use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

mod batch;
mod cli;
mod error;
mod fspath;
mod nml;
mod prepare;
mod run;
mod rundesc;

use error::PrepareError;

fn main() -> ExitCode {
    init_logging();
    let args = cli::RootArgs::parse();
    match dispatch(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => exit_code(&err),
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(args: cli::RootArgs) -> Result<()> {
    match args.command {
        cli::Command::Prepare(args) => {
            let run_dir = prepare::prepare(&args.desc_file, args.nocheck_init)?;
            if !args.quiet {
                tracing::info!("Created run directory {}", run_dir.display());
            }
            Ok(())
        }
        cli::Command::Run(args) => {
            let submit_msg = run::run(&args)?;
            if let Some(submit_msg) = submit_msg {
                if !args.quiet {
                    tracing::info!("{submit_msg}");
                }
            }
            Ok(())
        }
    }
}

/// Fatal configuration errors are logged at the failure site and carry a
/// distinguished exit code; anything else is logged here.
fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<PrepareError>() {
        Some(PrepareError::Config(_)) => ExitCode::from(2),
        Some(PrepareError::DecompositionNotFound { .. }) => ExitCode::FAILURE,
        None => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
