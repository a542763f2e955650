//! mediawrap command line front end
//!
//! Drives the same application root a window would: jobs go to the
//! background runner and results are read off the UI loop.

mod cli;

use std::process::ExitCode;

use clap::Parser;

fn main() -> ExitCode {
    let args = cli::Cli::parse();
    cli::run(args)
}
