//! Child process lifecycle for plugin hosts.
//!
//! The `leap-process` crate launches an external program with any of its
//! standard streams piped, services those pipes without blocking the host
//! thread, and reports termination through the event bus.
//!
//! Output from the child is buffered in a [`ReadPipe`] and announced on the
//! pipe's own pump. Input is queued on a [`WritePipe`]. All notifications are
//! delivered when the host posts to the bus's `"mainloop"` pump, so pipe and
//! termination listeners run on the host thread alongside every other
//! listener.
//!
//! # Example
//!
//! ```no_run
//! use leap_events::{EventBus, MAINLOOP};
//! use leap_process::{ChildProcess, ProcessParams, Stream, StreamMode};
//! use serde_json::json;
//!
//! let bus = EventBus::new();
//! let params = ProcessParams::new("/bin/echo")
//!     .arg("hello")
//!     .stream(Stream::Stdout, StreamMode::Pipe);
//! let child = ChildProcess::launch(&bus, &params).expect("launch echo");
//! while !child.is_finished() {
//!     bus.post(MAINLOOP, &json!({}));
//! }
//! let stdout = child.read_pipe(Stream::Stdout).expect("stdout is piped");
//! assert_eq!(stdout.read_line().as_deref(), Some("hello"));
//! ```

pub mod child;
pub mod error;
pub mod params;
pub mod pipe;

pub use self::child::{ChildProcess, ProcessState};
pub use self::error::ProcessError;
pub use self::params::{ProcessParams, Stream, StreamMode};
pub use self::pipe::{ReadPipe, WritePipe};
