use crate::logging::LogFormat;

/// Prefix shared by every configuration environment variable.
pub const ENV_PREFIX: &str = "LEAP_";

/// Environment variable naming a configuration file.
pub const CONFIG_PATH_ENV: &str = "LEAP_CONFIG_PATH";

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default cap, in milliseconds, on draining a fatal error forward.
pub const DEFAULT_FATAL_DRAIN_TIMEOUT_MS: u64 = 2_000;

/// Default number of bytes shown when logging undelivered plugin output.
pub const DEFAULT_STDOUT_PREVIEW_BYTES: usize = 80;

/// Default byte cap on data carried by pipe events.
pub const DEFAULT_PIPE_EVENT_LIMIT: usize = 0;

/// Default interval, in milliseconds, between mainloop ticks.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 20;

/// Returns [`DEFAULT_LOG_FILTER`] as an owned string.
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binary.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

pub(crate) const fn default_fatal_drain_timeout_ms() -> u64 {
    DEFAULT_FATAL_DRAIN_TIMEOUT_MS
}

pub(crate) const fn default_stdout_preview_bytes() -> usize {
    DEFAULT_STDOUT_PREVIEW_BYTES
}

pub(crate) const fn default_pipe_event_limit() -> usize {
    DEFAULT_PIPE_EVENT_LIMIT
}

pub(crate) const fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
