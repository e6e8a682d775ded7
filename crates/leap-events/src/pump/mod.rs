//! Named event pumps and their listener registrations.
//!
//! An [`EventPump`] is a cheap, clonable handle to one named publish point.
//! Listeners are visited in the pump's resolved dependency order on every
//! dispatch; a listener returning `true` consumes the event and stops the
//! pass. Dispatch iterates over a snapshot of the order taken when the pass
//! starts, so a callback may connect or disconnect listeners (including
//! itself) without disturbing the pass in progress. A listener disconnected
//! mid-pass is skipped for the rest of that pass.

mod connection;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::trace;

use crate::error::ListenError;
use crate::ordering::ListenerOrder;

pub use self::connection::{Blocker, Connection};

/// Log target for pump dispatch.
const PUMP_TARGET: &str = "leap_events::pump";

/// A callback registered on an [`EventPump`].
///
/// Returning `true` marks the event as consumed: listeners later in the
/// order are skipped for that event. Closures of type `Fn(&Value) -> bool`
/// implement this trait, as does [`EventPump`] itself, which forwards the
/// event by posting it.
pub trait Listener {
    /// Handles one event.
    fn call(&self, event: &Value) -> bool;
}

impl<F> Listener for F
where
    F: Fn(&Value) -> bool,
{
    fn call(&self, event: &Value) -> bool {
        self(event)
    }
}

/// How a pump delivers posted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchMode {
    /// `post` invokes listeners synchronously.
    Immediate,
    /// `post` appends to a FIFO drained by `flush`.
    Queued,
}

impl DispatchMode {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Queued => "queued",
        }
    }

    /// Maps a pump type string, as sent by plugins, to a dispatch mode.
    #[must_use]
    pub fn from_type_name(kind: &str) -> Option<Self> {
        match kind {
            "LLEventStream" | "stream" => Some(Self::Immediate),
            "LLEventQueue" | "queue" => Some(Self::Queued),
            _ => None,
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named listener and its ordering constraints.
pub(crate) struct Registration {
    name: String,
    callback: Rc<dyn Listener>,
    after: BTreeSet<String>,
    before: BTreeSet<String>,
    connected: Cell<bool>,
    blocks: Cell<usize>,
}

impl Registration {
    pub(crate) fn new(
        name: String,
        callback: Rc<dyn Listener>,
        after: &[&str],
        before: &[&str],
    ) -> Self {
        Self {
            name,
            callback,
            after: after.iter().map(|s| (*s).to_owned()).collect(),
            before: before.iter().map(|s| (*s).to_owned()).collect(),
            connected: Cell::new(true),
            blocks: Cell::new(0),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.name.as_str()
    }

    pub(crate) const fn after(&self) -> &BTreeSet<String> {
        &self.after
    }

    pub(crate) const fn before(&self) -> &BTreeSet<String> {
        &self.before
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.get()
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.set(false);
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.blocks.get() > 0
    }

    pub(crate) fn add_block(&self) {
        self.blocks.set(self.blocks.get().saturating_add(1));
    }

    pub(crate) fn remove_block(&self) {
        self.blocks.set(self.blocks.get().saturating_sub(1));
    }
}

pub(crate) struct PumpInner {
    name: String,
    mode: DispatchMode,
    enabled: Cell<bool>,
    listeners: RefCell<ListenerOrder>,
    queue: RefCell<VecDeque<Value>>,
}

impl PumpInner {
    pub(crate) fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Disconnects `registration` if it is still the connected instance.
    pub(crate) fn disconnect(&self, registration: &Rc<Registration>) {
        registration.mark_disconnected();
        let removed = self
            .listeners
            .borrow_mut()
            .remove_instance(registration);
        if removed {
            trace!(
                target: PUMP_TARGET,
                pump = %self.name,
                listener = registration.name(),
                "listener disconnected"
            );
        }
    }
}

/// A named publish point with an ordered set of listeners.
///
/// # Example
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// use leap_events::EventBus;
/// use serde_json::{Value, json};
///
/// let bus = EventBus::new();
/// let pump = bus.obtain("login");
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let sink = Rc::clone(&seen);
/// let _connection = pump
///     .listen("recorder", move |event: &Value| {
///         sink.borrow_mut().push(event.clone());
///         false
///     })
///     .expect("unique listener name");
///
/// pump.post(&json!({"user": "nat"}));
/// assert_eq!(seen.borrow().len(), 1);
/// ```
#[derive(Clone)]
pub struct EventPump {
    inner: Rc<PumpInner>,
}

impl EventPump {
    pub(crate) fn new(name: String, mode: DispatchMode) -> Self {
        Self {
            inner: Rc::new(PumpInner {
                name,
                mode,
                enabled: Cell::new(true),
                listeners: RefCell::new(ListenerOrder::default()),
                queue: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// Returns the pump's registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Returns how this pump delivers events.
    #[must_use]
    pub fn mode(&self) -> DispatchMode {
        self.inner.mode
    }

    /// Registers an unconstrained listener.
    ///
    /// # Errors
    ///
    /// Returns [`ListenError::DupListenerName`] if `name` is already
    /// connected to this pump.
    pub fn listen<L>(&self, name: impl Into<String>, listener: L) -> Result<Connection, ListenError>
    where
        L: Listener + 'static,
    {
        self.listen_ordered(name, listener, &[], &[])
    }

    /// Registers a listener that must run after every name in `after` and
    /// before every name in `before`.
    ///
    /// The returned [`Connection`] disconnects the listener when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ListenError::DupListenerName`] for a duplicate name,
    /// [`ListenError::Cycle`] if the constraints are contradictory, and
    /// [`ListenError::OrderChange`] if they would reorder listeners that are
    /// already connected. The pump is unchanged on error.
    pub fn listen_ordered<L>(
        &self,
        name: impl Into<String>,
        listener: L,
        after: &[&str],
        before: &[&str],
    ) -> Result<Connection, ListenError>
    where
        L: Listener + 'static,
    {
        let registration = Rc::new(Registration::new(
            name.into(),
            Rc::new(listener),
            after,
            before,
        ));
        self.inner
            .listeners
            .borrow_mut()
            .insert(self.name(), Rc::clone(&registration))?;
        trace!(
            target: PUMP_TARGET,
            pump = self.name(),
            listener = registration.name(),
            "listener connected"
        );
        Ok(Connection::new(&self.inner, &registration))
    }

    /// Disconnects the listener called `name`, returning whether it existed.
    pub fn stop_listening(&self, name: &str) -> bool {
        let removed = self.inner.listeners.borrow_mut().remove(name);
        removed.is_some_and(|registration| {
            registration.mark_disconnected();
            true
        })
    }

    /// Temporarily disables the listener called `name` for the life of the
    /// returned [`Blocker`].
    #[must_use]
    pub fn block(&self, name: &str) -> Option<Blocker> {
        self.inner
            .listeners
            .borrow()
            .find(name)
            .map(Blocker::new)
    }

    /// Returns whether a listener called `name` is connected.
    #[must_use]
    pub fn has_listener(&self, name: &str) -> bool {
        self.inner.listeners.borrow().contains(name)
    }

    /// Returns connected listener names in dispatch order.
    #[must_use]
    pub fn listener_names(&self) -> Vec<String> {
        self.inner.listeners.borrow().names()
    }

    /// Posts `event` to this pump.
    ///
    /// Immediate pumps dispatch synchronously and report whether a listener
    /// consumed the event. Queued pumps append the event and return `false`.
    /// A disabled pump drops the event.
    pub fn post(&self, event: &Value) -> bool {
        if !self.is_enabled() {
            trace!(target: PUMP_TARGET, pump = self.name(), "post to disabled pump dropped");
            return false;
        }
        match self.inner.mode {
            DispatchMode::Immediate => self.dispatch(event),
            DispatchMode::Queued => {
                self.inner.queue.borrow_mut().push_back(event.clone());
                false
            }
        }
    }

    /// Dispatches every queued event.
    ///
    /// Events posted while the flush is running are left for the next flush.
    /// Immediate pumps have nothing to flush.
    pub fn flush(&self) {
        if self.inner.mode != DispatchMode::Queued {
            return;
        }
        let pending = std::mem::take(&mut *self.inner.queue.borrow_mut());
        if !pending.is_empty() {
            trace!(
                target: PUMP_TARGET,
                pump = self.name(),
                events = pending.len(),
                "flushing queued events"
            );
        }
        for event in &pending {
            self.dispatch(event);
        }
    }

    /// Returns the number of events waiting for the next flush.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Enables or disables the pump. Disabled pumps drop posted events.
    pub fn enable(&self, enabled: bool) {
        self.inner.enabled.set(enabled);
    }

    /// Returns whether the pump accepts posted events.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.get()
    }

    /// Disconnects every listener and discards queued events.
    pub fn reset(&self) {
        let registrations = self.inner.listeners.borrow_mut().clear();
        for registration in registrations {
            registration.mark_disconnected();
        }
        self.inner.queue.borrow_mut().clear();
    }

    /// Returns whether both handles refer to the same pump.
    #[must_use]
    pub fn same_pump(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn dispatch(&self, event: &Value) -> bool {
        let snapshot: Vec<Rc<Registration>> =
            self.inner.listeners.borrow().entries().to_vec();
        for registration in snapshot {
            if !registration.is_connected() || registration.is_blocked() {
                continue;
            }
            if registration.callback.call(event) {
                trace!(
                    target: PUMP_TARGET,
                    pump = self.name(),
                    listener = registration.name(),
                    "event consumed"
                );
                return true;
            }
        }
        false
    }
}

impl Listener for EventPump {
    fn call(&self, event: &Value) -> bool {
        self.post(event)
    }
}

impl fmt::Debug for EventPump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPump")
            .field("name", &self.inner.name)
            .field("mode", &self.inner.mode)
            .field("enabled", &self.inner.enabled.get())
            .field("listeners", &self.listener_names())
            .finish()
    }
}

#[cfg(test)]
mod tests;
