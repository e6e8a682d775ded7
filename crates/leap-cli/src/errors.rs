//! Error types for the CLI runtime.

use leap_config::ConfigError;
use leap_plugins::LeapError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(#[from] ConfigError),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("failed to launch plugin: {0}")]
    Launch(#[from] LeapError),
}
