//! Field unit binary
use clap::Parser;
use morselink::{components::prelude::*, utils::logging::init_tracing};
use std::process::ExitCode;
use tracing::error;

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the config file for the field unit.
    #[arg(short, long)]
    filepath: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing("info");
    let args = Args::parse();

    let mut unit = match FieldUnit::from_config_file(&args.filepath) {
        Ok(unit) => unit,
        Err(e) => {
            error!("Failed to initialise the field unit {e}");
            return ExitCode::FAILURE;
        }
    };

    match FieldUnitController::start(&mut unit).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Field unit stopped {e}");
            ExitCode::FAILURE
        }
    }
}
