//! Errors raised while registering pumps, listeners and event APIs.
//!
//! Registration errors are contract violations: they are returned to the
//! caller synchronously and the bus state is left exactly as it was before
//! the failed call.

use thiserror::Error;

/// Errors raised by [`EventPump::listen`](crate::EventPump::listen).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenError {
    /// A listener with the same name is already connected to the pump.
    #[error("duplicate listener name '{listener}' on pump '{pump}'")]
    DupListenerName {
        /// Pump on which registration was attempted.
        pump: String,
        /// Offending listener name.
        listener: String,
    },

    /// The new listener's constraints would make the ordering graph cyclic.
    #[error("new listener '{listener}' on pump '{pump}' would cause cycle: {}", .cycle.join(" -> "))]
    Cycle {
        /// Pump on which registration was attempted.
        pump: String,
        /// Offending listener name.
        listener: String,
        /// Names along the cycle, starting and ending with `listener`.
        cycle: Vec<String>,
    },

    /// The new listener would reorder listeners that are already connected.
    #[error(
        "new listener '{listener}' on pump '{pump}' would move previous listener '{moved}'\nwas: {}\nnow: {}",
        .was.join(", "),
        .now.join(", ")
    )]
    OrderChange {
        /// Pump on which registration was attempted.
        pump: String,
        /// Offending listener name.
        listener: String,
        /// First previously connected listener whose position would change.
        moved: String,
        /// Dispatch order before the attempted registration.
        was: Vec<String>,
        /// Dispatch order the registration would have required.
        now: Vec<String>,
    },
}

/// Errors raised while constructing pumps on an [`EventBus`](crate::EventBus).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PumpError {
    /// A pump with this name exists and the caller did not permit tweaking.
    #[error("duplicate pump name '{name}'")]
    DupPumpName {
        /// Requested pump name.
        name: String,
    },

    /// The requested pump type string is not recognised.
    #[error("unknown pump type '{kind}' requested for pump '{name}'")]
    UnknownPumpType {
        /// Requested pump name.
        name: String,
        /// Unrecognised type string.
        kind: String,
    },
}

/// Errors raised while dispatching a request through an
/// [`EventApi`](crate::EventApi).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The request carried no operation name under the API's key.
    #[error("{api}: request has no '{key}' value")]
    MissingOperation {
        /// API name.
        api: String,
        /// Key the operation name is read from.
        key: String,
    },

    /// The request named an operation that is not registered.
    #[error("{api}: operation '{op}' not found")]
    UnknownOperation {
        /// API name.
        api: String,
        /// Requested operation.
        op: String,
    },

    /// The request lacked keys the operation requires.
    #[error("{api}: operation '{op}' missing required keys {}", .missing.join(", "))]
    MissingArguments {
        /// API name.
        api: String,
        /// Requested operation.
        op: String,
        /// Absent keys.
        missing: Vec<String>,
    },

    /// The operation ran but reported a failure.
    #[error("{api}: operation '{op}' failed: {message}")]
    Failed {
        /// API name.
        api: String,
        /// Requested operation.
        op: String,
        /// Human-readable failure description.
        message: String,
    },

    /// The API's pump could not be created or listened on.
    #[error("{api}: cannot attach: {message}")]
    Attach {
        /// API name.
        api: String,
        /// Underlying pump or listener error.
        message: String,
    },
}
