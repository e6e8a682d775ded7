//! Command-line arguments for the `leap` binary.
//!
//! Configuration flags such as `--log-filter` are resolved separately by
//! [`crate::config`] and must precede the arguments parsed here.

use clap::Parser;

/// Launches a LEAP plugin and services it until it exits.
#[derive(Parser, Debug)]
#[command(
    name = "leap",
    version,
    after_help = "Configuration flags (--config-path, --log-filter, --log-format, \
                  --tick-interval-ms and the other LEAP_* settings) go before --desc \
                  and the plugin command."
)]
pub(crate) struct Cli {
    /// Names the plugin in logs instead of its executable.
    #[arg(long, value_name = "TEXT")]
    pub(crate) desc: Option<String>,
    /// The plugin command line.
    #[arg(
        value_name = "COMMAND",
        num_args = 0..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub(crate) command: Vec<String>,
}
