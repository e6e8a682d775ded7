//! Routes host panics to plugins as fatal errors.
//!
//! A process-wide panic hook is installed once. It looks up the
//! [`FatalHooks`] registered for the panicking thread, raises the panic
//! message through them, then defers to whichever hook was installed
//! before it.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, PanicHookInfo};

use leap_plugins::FatalHooks;
use once_cell::sync::OnceCell;

static PANIC_HOOK: OnceCell<()> = OnceCell::new();

thread_local! {
    static THREAD_HOOKS: RefCell<Option<FatalHooks>> = const { RefCell::new(None) };
}

/// Keeps panics on this thread routed to a host's fatal hooks.
#[must_use]
pub(crate) struct PanicForwarding {
    displaced: Option<FatalHooks>,
}

/// Routes panics raised on the current thread to `hooks` until the returned
/// guard is dropped.
pub(crate) fn forward_panics(hooks: &FatalHooks) -> PanicForwarding {
    PANIC_HOOK.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            raise_for_thread(info);
            previous(info);
        }));
    });
    let displaced = THREAD_HOOKS.with(|slot| slot.replace(Some(hooks.clone())));
    PanicForwarding { displaced }
}

impl Drop for PanicForwarding {
    fn drop(&mut self) {
        let displaced = self.displaced.take();
        THREAD_HOOKS.with(|slot| *slot.borrow_mut() = displaced);
    }
}

fn raise_for_thread(info: &PanicHookInfo<'_>) {
    let hooks = THREAD_HOOKS
        .try_with(|slot| slot.try_borrow().ok().and_then(|hooks| hooks.clone()))
        .ok()
        .flatten();
    if let Some(registered) = hooks {
        registered.raise(panic_message(info.payload()));
    }
}

/// Extracts the text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("host panicked")
}
