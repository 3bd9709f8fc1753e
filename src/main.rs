//! stem-separator-api entry point

use std::process::ExitCode;

use clap::Parser;
use stem_separator::config::Settings;

fn main() -> ExitCode {
    let settings = Settings::parse();

    match stem_separator::run(settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Fatal error: {e}");
            ExitCode::FAILURE
        }
    }
}
