//! Entrypoint for the `leap` plugin host.
//!
//! The binary delegates to [`leap_cli::run`], which parses arguments, loads
//! configuration, launches one plugin and drives the mainloop until the
//! plugin terminates.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    leap_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
