//! Scoped handles returned by listener registration.

use std::fmt;
use std::rc::{Rc, Weak};

use super::{PumpInner, Registration};

/// Handle to one listener registration.
///
/// Dropping the connection disconnects the listener. Call
/// [`Connection::detach`] to keep the listener connected for the life of the
/// pump instead. Disconnecting is idempotent and never affects a different
/// listener that later reuses the same name.
#[must_use = "dropping a Connection disconnects the listener"]
pub struct Connection {
    pump: Weak<PumpInner>,
    registration: Weak<Registration>,
    armed: bool,
}

impl Connection {
    pub(super) fn new(pump: &Rc<PumpInner>, registration: &Rc<Registration>) -> Self {
        Self {
            pump: Rc::downgrade(pump),
            registration: Rc::downgrade(registration),
            armed: true,
        }
    }

    /// Returns whether the listener is still connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.registration
            .upgrade()
            .is_some_and(|registration| registration.is_connected())
            && self.pump.strong_count() > 0
    }

    /// Disconnects the listener now.
    pub fn disconnect(&mut self) {
        self.armed = false;
        let (Some(pump), Some(registration)) = (self.pump.upgrade(), self.registration.upgrade())
        else {
            return;
        };
        pump.disconnect(&registration);
    }

    /// Leaves the listener connected after this handle is dropped.
    pub fn detach(mut self) {
        self.armed = false;
    }

    /// Suppresses the listener for the life of the returned [`Blocker`].
    ///
    /// Returns `None` when the listener is no longer connected.
    #[must_use]
    pub fn block(&self) -> Option<Blocker> {
        let registration = self.registration.upgrade()?;
        registration
            .is_connected()
            .then(|| Blocker::new(&registration))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.armed {
            self.disconnect();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .registration
            .upgrade()
            .map(|registration| registration.name().to_owned());
        f.debug_struct("Connection")
            .field("listener", &name)
            .field("connected", &self.is_connected())
            .field("armed", &self.armed)
            .finish()
    }
}

/// Guard that suppresses one listener while it is alive.
///
/// Blockers nest: the listener runs again only once every outstanding
/// blocker for it has been dropped.
#[must_use = "dropping a Blocker immediately unblocks the listener"]
pub struct Blocker {
    registration: Weak<Registration>,
}

impl Blocker {
    pub(crate) fn new(registration: &Rc<Registration>) -> Self {
        registration.add_block();
        Self {
            registration: Rc::downgrade(registration),
        }
    }
}

impl Drop for Blocker {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.upgrade() {
            registration.remove_block();
        }
    }
}

impl fmt::Debug for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .registration
            .upgrade()
            .map(|registration| registration.name().to_owned());
        f.debug_struct("Blocker").field("listener", &name).finish()
    }
}
