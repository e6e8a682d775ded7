//! The registry of named pumps.
//!
//! An [`EventBus`] is an explicit context object: construct one per host (or
//! per test) and hand out clones. Every bus owns a `"mainloop"` pump whose
//! first listener flushes all queued pumps, so a host drives deferred
//! delivery by posting to `"mainloop"` on each tick.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::api::ApiDescription;
use crate::error::PumpError;
use crate::pump::{DispatchMode, EventPump};

/// Name of the pump the host posts to on every tick.
pub const MAINLOOP: &str = "mainloop";

/// Listener on [`MAINLOOP`] that flushes every queued pump.
pub const FLUSH_LISTENER: &str = "flushEventQueues";

const BUS_TARGET: &str = "leap_events::bus";

struct BusInner {
    pumps: RefCell<BTreeMap<String, EventPump>>,
    queue_names: RefCell<BTreeSet<String>>,
    apis: RefCell<BTreeMap<String, ApiDescription>>,
    invented: Cell<u64>,
}

/// Shared handle to a pump registry.
///
/// Cloning the handle shares the registry. Closures stored on the bus's own
/// pumps should capture a [`WeakEventBus`] rather than a clone, so that the
/// registry can be released once the host drops it.
#[derive(Clone)]
pub struct EventBus {
    inner: Rc<BusInner>,
}

impl EventBus {
    /// Creates an empty registry containing only the `"mainloop"` pump.
    #[must_use]
    pub fn new() -> Self {
        Self::with_queues(std::iter::empty::<String>())
    }

    /// Creates a registry in which `names` are pre-declared as queue-capable.
    #[must_use]
    pub fn with_queues<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bus = Self {
            inner: Rc::new(BusInner {
                pumps: RefCell::new(BTreeMap::new()),
                queue_names: RefCell::new(names.into_iter().map(Into::into).collect()),
                apis: RefCell::new(BTreeMap::new()),
                invented: Cell::new(0),
            }),
        };
        let mainloop = bus.obtain(MAINLOOP);
        let weak = bus.downgrade();
        let flush = mainloop.listen(FLUSH_LISTENER, move |_: &Value| {
            if let Some(bus) = weak.upgrade() {
                bus.flush();
            }
            false
        });
        // The registry is empty apart from this pump, so the name is free.
        if let Ok(connection) = flush {
            connection.detach();
        }
        bus
    }

    /// Returns a handle that does not keep the registry alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Returns the pump called `name`, creating it on first reference.
    ///
    /// A created pump is queued when `name` was declared with
    /// [`EventBus::declare_queue`], otherwise immediate.
    pub fn obtain(&self, name: &str) -> EventPump {
        if let Some(pump) = self.get(name) {
            return pump;
        }
        let mode = if self.inner.queue_names.borrow().contains(name) {
            DispatchMode::Queued
        } else {
            DispatchMode::Immediate
        };
        self.insert(name.to_owned(), mode)
    }

    /// Returns the pump called `name` if it exists.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<EventPump> {
        self.inner.pumps.borrow().get(name).cloned()
    }

    /// Returns whether a pump called `name` exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.pumps.borrow().contains_key(name)
    }

    /// Creates a new pump.
    ///
    /// When `name` is taken and `tweak` is set, the first free name formed by
    /// appending `1`, `2`, ... is used instead; read the final name back from
    /// [`EventPump::name`].
    ///
    /// # Errors
    ///
    /// Returns [`PumpError::DupPumpName`] when `name` is taken and `tweak` is
    /// not set.
    pub fn make(&self, name: &str, mode: DispatchMode, tweak: bool) -> Result<EventPump, PumpError> {
        let resolved = if !self.contains(name) {
            name.to_owned()
        } else if tweak {
            self.tweaked(name)
        } else {
            return Err(PumpError::DupPumpName {
                name: name.to_owned(),
            });
        };
        Ok(self.insert(resolved, mode))
    }

    /// Creates a new pump from a type string.
    ///
    /// Accepts `"LLEventStream"` or `"stream"` for an immediate pump and
    /// `"LLEventQueue"` or `"queue"` for a queued one.
    ///
    /// # Errors
    ///
    /// Returns [`PumpError::UnknownPumpType`] for any other type string, and
    /// otherwise fails as [`EventBus::make`] does.
    pub fn make_typed(&self, name: &str, kind: &str, tweak: bool) -> Result<EventPump, PumpError> {
        let mode = DispatchMode::from_type_name(kind).ok_or_else(|| PumpError::UnknownPumpType {
            name: name.to_owned(),
            kind: kind.to_owned(),
        })?;
        self.make(name, mode, tweak)
    }

    /// Declares `name` as queue-capable for later [`EventBus::obtain`] calls.
    pub fn declare_queue(&self, name: impl Into<String>) {
        self.inner.queue_names.borrow_mut().insert(name.into());
    }

    /// Unregisters the pump called `name`, disconnecting all its listeners.
    ///
    /// Returns whether the pump existed.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.inner.pumps.borrow_mut().remove(name);
        removed.is_some_and(|pump| {
            pump.reset();
            debug!(target: BUS_TARGET, pump = name, "pump removed");
            true
        })
    }

    /// Flushes every queued pump once.
    pub fn flush(&self) {
        let queued: Vec<EventPump> = self
            .inner
            .pumps
            .borrow()
            .values()
            .filter(|pump| pump.mode() == DispatchMode::Queued)
            .cloned()
            .collect();
        for pump in queued {
            pump.flush();
        }
    }

    /// Posts `event` to the pump called `name`, creating it if necessary.
    pub fn post(&self, name: &str, event: &Value) -> bool {
        self.obtain(name).post(event)
    }

    /// Returns the names of all registered pumps.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner.pumps.borrow().keys().cloned().collect()
    }

    /// Returns a listener name that has not been handed out by this bus.
    pub fn invent_name(&self, prefix: &str) -> String {
        let next = self.inner.invented.get().saturating_add(1);
        self.inner.invented.set(next);
        format!("{prefix}{next}")
    }

    pub(crate) fn register_api(&self, description: ApiDescription) {
        self.inner
            .apis
            .borrow_mut()
            .insert(description.name().to_owned(), description);
    }

    pub(crate) fn unregister_api(&self, name: &str) {
        self.inner.apis.borrow_mut().remove(name);
    }

    /// Summarises every attached API as `{name: {desc}}`.
    #[must_use]
    pub fn apis(&self) -> Map<String, Value> {
        self.inner
            .apis
            .borrow()
            .iter()
            .map(|(name, api)| (name.clone(), api.summary()))
            .collect()
    }

    /// Describes the attached API called `name`.
    #[must_use]
    pub fn api(&self, name: &str) -> Option<Value> {
        self.inner.apis.borrow().get(name).map(ApiDescription::to_value)
    }

    fn tweaked(&self, name: &str) -> String {
        let pumps = self.inner.pumps.borrow();
        (1_u64..)
            .map(|suffix| format!("{name}{suffix}"))
            .find(|candidate| !pumps.contains_key(candidate))
            .unwrap_or_else(|| self.invent_name(name))
    }

    fn insert(&self, name: String, mode: DispatchMode) -> EventPump {
        let pump = EventPump::new(name.clone(), mode);
        trace!(target: BUS_TARGET, pump = %name, %mode, "pump created");
        self.inner.pumps.borrow_mut().insert(name, pump.clone());
        pump
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("pumps", &self.names())
            .finish_non_exhaustive()
    }
}

/// Non-owning handle to an [`EventBus`].
#[derive(Clone, Default)]
pub struct WeakEventBus {
    inner: Weak<BusInner>,
}

impl WeakEventBus {
    /// Returns the bus if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<EventBus> {
        self.inner.upgrade().map(|inner| EventBus { inner })
    }
}

impl fmt::Debug for WeakEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEventBus")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}
