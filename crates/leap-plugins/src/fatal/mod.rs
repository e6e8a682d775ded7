//! Host fatal-error interception.
//!
//! Components install handlers that see a fatal error before the host logs
//! it. Handlers run newest first, so the most recently launched plugin hears
//! about the error first. Each handler stays installed until its
//! [`FatalHookGuard`] is dropped.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::error;

const FATAL_TARGET: &str = "leap_plugins::fatal";

type Handler = Rc<dyn Fn(&str)>;

#[derive(Default)]
struct HookList {
    handlers: RefCell<Vec<(u64, Handler)>>,
    next: Cell<u64>,
}

/// Registry of fatal-error handlers.
#[derive(Clone, Default)]
pub struct FatalHooks {
    inner: Rc<HookList>,
}

impl FatalHooks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` until the returned guard is dropped.
    pub fn install<F>(&self, handler: F) -> FatalHookGuard
    where
        F: Fn(&str) + 'static,
    {
        let id = self.inner.next.get();
        self.inner.next.set(id.saturating_add(1));
        self.inner.handlers.borrow_mut().push((id, Rc::new(handler)));
        FatalHookGuard {
            hooks: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Returns the number of installed handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.handlers.borrow().len()
    }

    /// Returns whether no handler is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.handlers.borrow().is_empty()
    }

    /// Reports a fatal error to every handler, newest first, then logs it.
    pub fn raise(&self, message: &str) {
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .borrow()
            .iter()
            .rev()
            .map(|(_, handler)| Rc::clone(handler))
            .collect();
        for handler in handlers {
            handler(message);
        }
        error!(target: FATAL_TARGET, message, "fatal error");
    }
}

impl fmt::Debug for FatalHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FatalHooks")
            .field("handlers", &self.len())
            .finish()
    }
}

/// Keeps one fatal-error handler installed.
#[must_use]
pub struct FatalHookGuard {
    hooks: Weak<HookList>,
    id: u64,
}

impl Drop for FatalHookGuard {
    fn drop(&mut self) {
        if let Some(hooks) = self.hooks.upgrade() {
            hooks.handlers.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for FatalHookGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FatalHookGuard").field("id", &self.id).finish()
    }
}
