//! Launch parameters for a child process.

use std::fmt;
use std::path::{Path, PathBuf};

/// One of the three standard streams of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stream {
    /// Standard input.
    Stdin,
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl Stream {
    /// Returns the conventional file descriptor number of the stream.
    #[must_use]
    pub const fn slot(self) -> u8 {
        match self {
            Self::Stdin => 0,
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }

    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a child's standard stream is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamMode {
    /// Shares the host's stream.
    #[default]
    Inherit,
    /// Connected to a pipe owned by the [`ChildProcess`](crate::ChildProcess).
    Pipe,
    /// Connected to the null device.
    Closed,
}

impl StreamMode {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inherit => "inherit",
            Self::Pipe => "pipe",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to launch a [`ChildProcess`](crate::ChildProcess).
///
/// The executable is run directly with the given arguments; nothing is
/// interpreted by a shell.
///
/// # Example
///
/// ```
/// use leap_process::{ProcessParams, Stream, StreamMode};
///
/// let params = ProcessParams::new("/bin/echo")
///     .arg("hello")
///     .stream(Stream::Stdout, StreamMode::Pipe)
///     .postend("echo.done");
/// assert_eq!(params.description(), "echo");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessParams {
    executable: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    desc: Option<String>,
    stdin: StreamMode,
    stdout: StreamMode,
    stderr: StreamMode,
    autokill: bool,
    postend: Option<String>,
}

impl ProcessParams {
    /// Creates parameters for `executable` with inherited streams and
    /// autokill enabled.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            cwd: None,
            desc: None,
            stdin: StreamMode::Inherit,
            stdout: StreamMode::Inherit,
            stderr: StreamMode::Inherit,
            autokill: true,
            postend: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets the human-readable description used in logs and notifications.
    #[must_use]
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// Sets how `stream` is connected.
    #[must_use]
    pub const fn stream(mut self, stream: Stream, mode: StreamMode) -> Self {
        match stream {
            Stream::Stdin => self.stdin = mode,
            Stream::Stdout => self.stdout = mode,
            Stream::Stderr => self.stderr = mode,
        }
        self
    }

    /// Pipes all three standard streams.
    #[must_use]
    pub const fn piped(self) -> Self {
        self.stream(Stream::Stdin, StreamMode::Pipe)
            .stream(Stream::Stdout, StreamMode::Pipe)
            .stream(Stream::Stderr, StreamMode::Pipe)
    }

    /// Chooses whether dropping the process handle kills the child.
    #[must_use]
    pub const fn autokill(mut self, autokill: bool) -> Self {
        self.autokill = autokill;
        self
    }

    /// Names the pump that receives the termination notification.
    #[must_use]
    pub fn postend(mut self, pump: impl Into<String>) -> Self {
        self.postend = Some(pump.into());
        self
    }

    /// Returns the executable path.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Returns the arguments.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Returns the working directory, if set.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Returns how `stream` is connected.
    #[must_use]
    pub const fn mode(&self, stream: Stream) -> StreamMode {
        match stream {
            Stream::Stdin => self.stdin,
            Stream::Stdout => self.stdout,
            Stream::Stderr => self.stderr,
        }
    }

    /// Returns whether the child is killed when its handle is dropped.
    #[must_use]
    pub const fn is_autokill(&self) -> bool {
        self.autokill
    }

    /// Returns the termination notification pump, if any.
    #[must_use]
    pub fn postend_pump(&self) -> Option<&str> {
        self.postend.as_deref()
    }

    /// Returns the explicit description, or the executable's file name.
    #[must_use]
    pub fn description(&self) -> String {
        self.desc.clone().unwrap_or_else(|| {
            self.executable
                .file_name()
                .map_or_else(
                    || self.executable.display().to_string(),
                    |name| name.to_string_lossy().into_owned(),
                )
        })
    }
}
