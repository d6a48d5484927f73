use std::process::ExitCode;

use clap::Parser;

use rasterly::cli::{self, CliArgs};

fn main() -> ExitCode {
    // Initialize session log (overwrites previous session log)
    rasterly::logger::init();

    let args = CliArgs::parse();
    cli::run(args)
}
