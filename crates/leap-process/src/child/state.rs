//! Termination status of a child process.

use std::fmt;
use std::process::ExitStatus;

/// Where a child process is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// The child was never started.
    Unstarted,
    /// The child is running.
    Running,
    /// The child exited with a status code.
    Exited(i32),
    /// The child was terminated by a signal.
    Killed(i32),
}

impl ProcessState {
    /// Returns whether the child is still running.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns the state name used in postend notifications.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Running => "running",
            Self::Exited(_) => "exited",
            Self::Killed(_) => "killed",
        }
    }

    /// Returns the exit code or signal number, if terminated.
    #[must_use]
    pub const fn data(self) -> Option<i32> {
        match self {
            Self::Exited(value) | Self::Killed(value) => Some(value),
            Self::Unstarted | Self::Running => None,
        }
    }

    /// Returns a human-readable description.
    #[must_use]
    pub fn describe(self) -> String {
        match self {
            Self::Unstarted => "not started".to_owned(),
            Self::Running => "running".to_owned(),
            Self::Exited(code) => format!("exited with code {code}"),
            Self::Killed(signal) => format!("killed by signal {signal}"),
        }
    }

    pub(crate) fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        Self::Killed(signal_of(status))
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(unix)]
fn signal_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or(-1)
}

#[cfg(not(unix))]
fn signal_of(_status: ExitStatus) -> i32 {
    -1
}
