//! LEAP plugin sessions.
//!
//! A LEAP plugin is a child process that converses with its host over
//! stdin and stdout in length-prefixed frames. Each frame is an
//! [`Envelope`], `{pump, data}`: frames written by the plugin are posted to
//! the named pump on the host's [`EventBus`](leap_events::EventBus), and
//! events on the session's reply pump are framed back to the plugin.
//!
//! # Example
//!
//! ```rust,no_run
//! use leap_config::SessionConfig;
//! use leap_plugins::{LeapHost, LeapParams};
//!
//! let host = LeapHost::new(SessionConfig::default());
//! let plugin = host
//!     .launch(&LeapParams::new(["python3", "plugin.py"]))
//!     .expect("plugin launches");
//! assert_eq!(plugin.description(), "plugin.py");
//! while plugin.is_alive() {
//!     host.tick();
//! }
//! ```

pub mod codec;
pub mod error;
pub mod fatal;
pub mod features;
pub mod host;
pub mod protocol;
pub mod session;

#[cfg(test)]
mod tests;

pub use self::codec::Envelope;
pub use self::error::{CodecError, LeapError, ProtocolError};
pub use self::fatal::{FatalHookGuard, FatalHooks};
pub use self::features::Features;
pub use self::host::{LeapHost, LeapParams, describe};
pub use self::protocol::{ByteSource, EnvelopeSink, FrameParser, ParseState, frame};
pub use self::session::{SessionHandle, SessionState};
