//! Configuration loading for the `leap` binary.
//!
//! Leading configuration flags are handed to `ortho_config`, which layers
//! them over the configuration file and `LEAP_*` environment variables.
//! Everything from the first other token onwards belongs to [`Cli`].
//!
//! [`Cli`]: crate::cli::Cli

use std::ffi::{OsStr, OsString};

use leap_config::Config;

use crate::errors::AppError;

/// Flags resolved by the configuration layer rather than by [`crate::cli::Cli`].
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--fatal-drain-timeout-ms",
    "--stdout-preview-bytes",
    "--pipe-event-limit",
    "--queue-pumps",
    "--tick-interval-ms",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the program name and configuration flags.
    ///
    /// Configuration flags must come before `--desc` and the plugin command;
    /// once another token is seen, later configuration flags are treated as
    /// part of the plugin command line.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

/// Loader backed by `ortho_config` layering.
pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Ok(Config::from_args(args.iter().cloned())?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    let (flag, inline_value) = text
        .split_once('=')
        .map_or((text.as_ref(), false), |(flag, _)| (flag, true));
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !inline_value,
        }
    } else {
        FlagAction::Stop
    }
}

/// Arguments divided between configuration loading and [`crate::cli::Cli`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    /// Program name followed by the leading configuration flags.
    pub(crate) config_arguments: Vec<OsString>,
    /// Program name followed by everything after those flags.
    pub(crate) cli_arguments: Vec<OsString>,
}

/// Splits `args` at the first token that is not a configuration flag or
/// its value.
pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let mut iter = args.iter();
    let program: Vec<OsString> = iter.next().cloned().into_iter().collect();
    let mut config_arguments = program.clone();
    let mut pending_value = false;
    let mut rest = iter.as_slice();

    while let Some((argument, tail)) = rest.split_first() {
        if pending_value {
            pending_value = false;
        } else {
            match classify(argument) {
                FlagAction::Include { needs_value } => pending_value = needs_value,
                FlagAction::Stop => break,
            }
        }
        config_arguments.push(argument.clone());
        rest = tail;
    }

    let mut cli_arguments = program;
    cli_arguments.extend(rest.iter().cloned());
    ConfigArgumentSplit {
        config_arguments,
        cli_arguments,
    }
}
