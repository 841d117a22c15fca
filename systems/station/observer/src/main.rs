//! Station binary
use clap::Parser;
use morselink::{components::prelude::*, utils::logging::init_tracing};
use std::process::ExitCode;
use tracing::error;

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the config file for the station.
    #[arg(short, long)]
    filepath: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing("info");
    let args = Args::parse();

    let mut station = match Station::from_config_file(&args.filepath) {
        Ok(station) => station,
        Err(e) => {
            error!("Failed to initialise the station {e}");
            return ExitCode::FAILURE;
        }
    };

    match StationController::start(&mut station).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Station stopped {e}");
            ExitCode::FAILURE
        }
    }
}
