//! Errors raised while launching and talking to a child process.
//!
//! I/O errors are wrapped in `Arc` to keep the enum `Clone` and to satisfy
//! the `result_large_err` Clippy lint.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::params::{Stream, StreamMode};

/// Errors arising from [`ChildProcess`](crate::ChildProcess) operations.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// The operating system could not start the child.
    #[error("failed to launch '{desc}': {message}")]
    LaunchFailed {
        /// Process description.
        desc: String,
        /// Human-readable failure description.
        message: String,
        /// Underlying I/O error, absent when validation failed before spawn.
        #[source]
        source: Option<Arc<io::Error>>,
    },

    /// A pipe was requested on a stream that was not opened as a pipe, or
    /// in the wrong direction.
    #[error("'{desc}' {stream} is not a readable/writable pipe here (mode: {mode})")]
    PipeMode {
        /// Process description.
        desc: String,
        /// Requested stream.
        stream: Stream,
        /// Mode the stream was opened with.
        mode: StreamMode,
    },

    /// An I/O error occurred while servicing the child.
    #[error("I/O error on '{desc}': {source}")]
    Io {
        /// Process description.
        desc: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The write pipe was closed or its writer failed.
    #[error("'{desc}' {stream} pipe is closed")]
    PipeClosed {
        /// Process description.
        desc: String,
        /// Affected stream.
        stream: Stream,
    },
}

impl ProcessError {
    pub(crate) fn launch(desc: &str, message: impl Into<String>, source: Option<io::Error>) -> Self {
        Self::LaunchFailed {
            desc: desc.to_owned(),
            message: message.into(),
            source: source.map(Arc::new),
        }
    }
}
