//! Named, dependency-ordered publish/subscribe event bus.
//!
//! The `leap-events` crate provides the [`EventBus`], a registry of named
//! [`EventPump`]s. Host modules and plugin sessions communicate by posting
//! structured values (`serde_json::Value`) onto pumps; listeners registered
//! on a pump are visited in an order that honours their declared `after` and
//! `before` constraints.
//!
//! Pumps are either immediate, dispatching synchronously on `post`, or
//! queued, buffering values until the bus's `"mainloop"` pump is posted to.
//! An [`EventApi`] layers request/reply operation dispatch on top of a pump.
//!
//! The bus is single-threaded. Listener callbacks never run concurrently
//! with one another or with registration.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use leap_events::EventBus;
//! use serde_json::{Value, json};
//!
//! let bus = EventBus::new();
//! let order = Rc::new(RefCell::new(Vec::new()));
//! let pump = bus.obtain("greetings");
//!
//! for (name, after) in [("Mary", "checked"), ("checked", "spot")] {
//!     let log = Rc::clone(&order);
//!     pump.listen_ordered(name, move |_: &Value| {
//!         log.borrow_mut().push(name);
//!         false
//!     }, &[after], &[])
//!     .expect("acyclic constraints")
//!     .detach();
//! }
//! let log = Rc::clone(&order);
//! pump.listen("spot", move |_: &Value| {
//!     log.borrow_mut().push("spot");
//!     false
//! })
//! .expect("unique name")
//! .detach();
//!
//! pump.post(&json!("hello"));
//! assert_eq!(*order.borrow(), ["spot", "checked", "Mary"]);
//! ```

pub mod api;
pub mod bus;
pub mod error;
mod ordering;
pub mod pump;

#[cfg(test)]
mod tests;

pub use self::api::{ApiDescription, AttachedApi, EventApi, send_reply, stamp_reqid};
pub use self::bus::{EventBus, MAINLOOP, WeakEventBus};
pub use self::error::{ApiError, ListenError, PumpError};
pub use self::pump::{Blocker, Connection, DispatchMode, EventPump, Listener};
