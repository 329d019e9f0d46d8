use std::process::ExitCode;

use clap::Parser;

use characanvas::cli::{self, CliArgs};
use characanvas::logger;

fn main() -> ExitCode {
    logger::init();
    let args = CliArgs::parse();
    cli::run(args)
}
