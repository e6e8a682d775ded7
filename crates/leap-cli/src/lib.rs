//! Command-line runtime for the `leap` plugin host.
//!
//! The runtime parses arguments, loads configuration, installs telemetry,
//! launches one plugin and ticks the `"mainloop"` pump until the plugin
//! session terminates. While the plugin runs, a panic in the host is raised
//! as a fatal error so the plugin hears about it before the process dies.
//!
//! The runtime is exercised both from the binary entrypoint and from tests,
//! where the output streams and the configuration loader can be substituted.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use leap_config::Config;
use leap_plugins::{LeapHost, LeapParams, SessionHandle};
use tracing::info;

mod cli;
mod config;
mod errors;
mod panic_forwarding;
pub mod telemetry;

use cli::Cli;
use config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
use errors::AppError;
use panic_forwarding::forward_panics;

const CLI_TARGET: &str = "leap_cli";

/// Runs the CLI using the provided arguments and output streams.
///
/// Returns success once the plugin has terminated, whatever its exit status,
/// and failure when configuration or the launch itself fails.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

fn run_with_loader<I, W, E>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &dyn ConfigLoader,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    match run_plugin(args, stdout, loader) {
        Ok(exit_code) => exit_code,
        Err(error) => {
            writeln!(stderr, "leap: {error}").ok();
            ExitCode::FAILURE
        }
    }
}

fn run_plugin<I, W>(args: I, stdout: &mut W, loader: &dyn ConfigLoader) -> Result<ExitCode, AppError>
where
    I: IntoIterator<Item = OsString>,
    W: Write,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);
    let cli = match Cli::try_parse_from(split.cli_arguments.iter().cloned()) {
        Ok(cli) => cli,
        // Help and version requests are not failures.
        Err(error) if !error.use_stderr() => {
            write!(stdout, "{error}").ok();
            return Ok(ExitCode::SUCCESS);
        }
        Err(error) => return Err(AppError::CliUsage(error)),
    };

    let config = loader.load(&split.config_arguments)?;
    telemetry::initialise(&config)?;

    let host = LeapHost::new(config.session());
    let _forwarding = forward_panics(host.fatal_hooks());
    let handle = host.launch(&plugin_params(&cli))?;
    info!(
        target: CLI_TARGET,
        plugin = %handle.description(),
        pid = ?handle.process_id(),
        "plugin launched"
    );
    drive(&host, &handle, &config);
    info!(target: CLI_TARGET, plugin = %handle.description(), "plugin session ended");
    Ok(ExitCode::SUCCESS)
}

fn plugin_params(cli: &Cli) -> LeapParams {
    let mut params = LeapParams::new(cli.command.iter().cloned());
    if let Some(desc) = &cli.desc {
        params = params.desc(desc.clone());
    }
    params
}

fn drive(host: &LeapHost, handle: &SessionHandle, config: &Config) {
    let interval = config.session().tick_interval();
    while handle.is_alive() {
        host.tick();
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests;
