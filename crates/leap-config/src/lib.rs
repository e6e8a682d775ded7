//! Configuration for LEAP hosts.
//!
//! [`Config`] is layered by `ortho_config`: built-in defaults first, then a
//! TOML file, then `LEAP_*` environment variables, then command-line flags.
//! The file is named by `--config-path` or `LEAP_CONFIG_PATH`; without one
//! the defaults stand.
//!
//! ```no_run
//! use leap_config::{Config, LogFormat};
//!
//! let config = Config::from_args(["leap", "--log-format", "json"])?;
//! assert_eq!(config.log_format(), LogFormat::Json);
//! assert_eq!(config.log_filter(), "info");
//! # Ok::<(), leap_config::ConfigError>(())
//! ```

mod defaults;
mod error;
mod logging;

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    CONFIG_PATH_ENV, DEFAULT_FATAL_DRAIN_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_PIPE_EVENT_LIMIT,
    DEFAULT_STDOUT_PREVIEW_BYTES, DEFAULT_TICK_INTERVAL_MS, ENV_PREFIX, default_log_filter_string,
    default_log_format,
};
pub use error::ConfigError;
pub use logging::{LogFormat, LogFormatParseError};

use defaults::{
    default_fatal_drain_timeout_ms, default_pipe_event_limit, default_stdout_preview_bytes,
    default_tick_interval_ms,
};

/// Tuning applied to every plugin session a host launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Milliseconds to wait for a fatal error to reach plugins.
    pub fatal_drain_timeout_ms: u64,
    /// Bytes of undelivered stdout quoted when a plugin terminates.
    pub stdout_preview_bytes: usize,
    /// Byte cap on data carried by pipe events.
    pub pipe_event_limit: usize,
    /// Pump names created in queued mode when first obtained.
    pub queue_pumps: Vec<String>,
    /// Milliseconds between mainloop ticks in the host binary.
    pub tick_interval_ms: u64,
}

impl SessionConfig {
    /// Returns the fatal drain cap as a [`Duration`].
    #[must_use]
    pub const fn fatal_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.fatal_drain_timeout_ms)
    }

    /// Returns the mainloop tick interval as a [`Duration`].
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fatal_drain_timeout_ms: DEFAULT_FATAL_DRAIN_TIMEOUT_MS,
            stdout_preview_bytes: DEFAULT_STDOUT_PREVIEW_BYTES,
            pipe_event_limit: DEFAULT_PIPE_EVENT_LIMIT,
            queue_pumps: Vec::new(),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

/// Host configuration.
///
/// Each field is also a `--kebab-case` flag and a `LEAP_UPPER_CASE`
/// environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "LEAP")]
pub struct Config {
    /// Log filter expression, in `RUST_LOG` syntax.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Milliseconds to wait for a fatal error to reach plugins.
    #[serde(default = "default_fatal_drain_timeout_ms")]
    #[ortho_config(default = DEFAULT_FATAL_DRAIN_TIMEOUT_MS)]
    pub fatal_drain_timeout_ms: u64,
    /// Bytes of undelivered stdout quoted when a plugin terminates.
    #[serde(default = "default_stdout_preview_bytes")]
    #[ortho_config(default = DEFAULT_STDOUT_PREVIEW_BYTES)]
    pub stdout_preview_bytes: usize,
    /// Byte cap on data carried by pipe events. Zero disables the cap.
    #[serde(default = "default_pipe_event_limit")]
    #[ortho_config(default = DEFAULT_PIPE_EVENT_LIMIT)]
    pub pipe_event_limit: usize,
    /// Pump names created in queued mode when first obtained.
    #[serde(default)]
    pub queue_pumps: Vec<String>,
    /// Milliseconds between mainloop ticks in the host binary.
    #[serde(default = "default_tick_interval_ms")]
    #[ortho_config(default = DEFAULT_TICK_INTERVAL_MS)]
    pub tick_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            fatal_drain_timeout_ms: session.fatal_drain_timeout_ms,
            stdout_preview_bytes: session.stdout_preview_bytes,
            pipe_event_limit: session.pipe_event_limit,
            queue_pumps: session.queue_pumps,
            tick_interval_ms: session.tick_interval_ms,
        }
    }
}

impl Config {
    /// Resolves every configuration layer for the given command line.
    ///
    /// The first argument is the program name. Only configuration flags may
    /// follow it; callers that accept other arguments split them off first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a layer cannot be read or merged
    /// and [`ConfigError::Invalid`] when the merged values are unusable.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let config = Self::load_from_iter(args)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that parse but cannot drive a host.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "tick_interval_ms",
                reason: "must be at least one millisecond",
            });
        }
        if self.queue_pumps.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "queue_pumps",
                reason: "pump names must not be blank",
            });
        }
        Ok(())
    }

    /// Returns the log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Returns the plugin session tuning carried by this configuration.
    #[must_use]
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            fatal_drain_timeout_ms: self.fatal_drain_timeout_ms,
            stdout_preview_bytes: self.stdout_preview_bytes,
            pipe_event_limit: self.pipe_event_limit,
            queue_pumps: self.queue_pumps.clone(),
            tick_interval_ms: self.tick_interval_ms,
        }
    }
}
