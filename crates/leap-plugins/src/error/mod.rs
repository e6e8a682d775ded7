//! Domain errors raised by LEAP sessions.
//!
//! Protocol errors describe malformed plugin output; a session handles them
//! itself by logging and killing the plugin. [`LeapError`] is what callers of
//! the host API see. Foreign errors are wrapped in `Arc` to keep both enums
//! `Clone` and to satisfy the `result_large_err` Clippy lint.

use std::sync::Arc;

use leap_events::{ApiError, ListenError, PumpError};
use leap_process::ProcessError;
use thiserror::Error;

/// Failure to encode or decode a structured value or envelope.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// The JSON codec rejected the value or bytes.
    #[error("structured value codec failed: {source}")]
    Json {
        /// Underlying serde failure.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// An outgoing envelope named no pump, so the plugin could not parse it.
    #[error("envelope has an empty pump name")]
    EmptyPump,
}

impl From<serde_json::Error> for CodecError {
    fn from(source: serde_json::Error) -> Self {
        Self::Json {
            source: Arc::new(source),
        }
    }
}

/// Malformed input read from a plugin's stdout.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// The bytes before `:` were not a decimal length.
    #[error("bad length prefix: '{prefix}'")]
    BadLengthPrefix {
        /// Offending bytes, lossily decoded and truncated.
        prefix: String,
    },

    /// The frame body could not be decoded.
    #[error("undecodable {length}-byte frame body '{preview}': {source}")]
    BadBody {
        /// Declared body length.
        length: usize,
        /// Start of the body, lossily decoded and truncated.
        preview: String,
        /// Codec failure.
        #[source]
        source: CodecError,
    },

    /// The decoded value was not a `{pump, data}` envelope.
    #[error("frame body lacks {}: '{preview}'", .missing.join(" and "))]
    MissingFields {
        /// Absent or malformed keys.
        missing: Vec<&'static str>,
        /// Start of the body, lossily decoded and truncated.
        preview: String,
    },
}

/// Errors surfaced to callers of the LEAP host.
#[derive(Debug, Clone, Error)]
pub enum LeapError {
    /// The plugin command line was empty.
    #[error("no plugin command specified")]
    NoPlugin,

    /// The plugin process could not be started.
    #[error("failed to launch plugin '{desc}': {source}")]
    LaunchFailed {
        /// Plugin description.
        desc: String,
        /// Underlying launch failure.
        #[source]
        source: ProcessError,
    },

    /// The session has already terminated.
    #[error("plugin '{desc}' has terminated")]
    Terminated {
        /// Plugin description.
        desc: String,
    },

    /// A message could not be encoded for the plugin.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Talking to the plugin process failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// A session listener could not be registered.
    #[error(transparent)]
    Listen(Box<ListenError>),

    /// A session pump could not be created.
    #[error(transparent)]
    Pump(#[from] PumpError),

    /// The command API could not be attached.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl From<ListenError> for LeapError {
    fn from(error: ListenError) -> Self {
        Self::Listen(Box::new(error))
    }
}
