//! Launching plugins and owning their sessions.
//!
//! [`LeapHost`] bundles the event bus, the registry of live sessions, the
//! fatal-error hooks and session configuration. A session stays in the
//! registry until its plugin terminates; callers only ever hold a
//! [`SessionHandle`].

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use leap_config::SessionConfig;
use leap_events::{DispatchMode, EventBus, MAINLOOP};
use leap_process::{ChildProcess, ProcessParams, Stream};
use serde_json::json;
use tracing::{error, warn};

use crate::error::LeapError;
use crate::fatal::FatalHooks;
use crate::features::Features;
use crate::session::{Registry, SessionContext, SessionHandle, SessionInner};

const HOST_TARGET: &str = "leap_plugins::host";

/// Executables whose description comes from the script they run.
const INTERPRETERS: &[&str] = &["perl", "ruby", "node", "lua", "sh", "bash"];

/// How to launch one plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeapParams {
    command: Vec<String>,
    desc: Option<String>,
    cwd: Option<PathBuf>,
}

impl LeapParams {
    /// Creates parameters for the command line `command`.
    #[must_use]
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            desc: None,
            cwd: None,
        }
    }

    /// Sets the description used in logs and pump names.
    #[must_use]
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// Sets the plugin's working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Returns the command line.
    #[must_use]
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Returns the explicit description, or one derived from the command.
    #[must_use]
    pub fn description(&self) -> String {
        self.desc
            .clone()
            .filter(|desc| !desc.is_empty())
            .unwrap_or_else(|| describe(&self.command))
    }
}

/// Derives a plugin description from its command line.
///
/// This is the executable's file name, except that for an interpreter such
/// as `python` it is the file name of the script being run.
#[must_use]
pub fn describe(command: &[String]) -> String {
    let Some((executable, arguments)) = command.split_first() else {
        return String::new();
    };
    let script = is_interpreter(executable)
        .then(|| arguments.iter().find(|arg| !arg.starts_with('-')))
        .flatten();
    file_name(script.unwrap_or(executable))
}

fn is_interpreter(executable: &str) -> bool {
    Path::new(executable)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.starts_with("python") || INTERPRETERS.contains(&stem))
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map_or_else(|| path.to_owned(), |name| name.to_string_lossy().into_owned())
}

/// Launches plugins and keeps their sessions alive while they run.
pub struct LeapHost {
    sessions: Rc<Registry>,
    bus: EventBus,
    fatal: FatalHooks,
    config: SessionConfig,
    features: Features,
    next_id: Cell<u64>,
}

impl LeapHost {
    /// Creates a host with a fresh bus.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self::with_bus(EventBus::new(), config)
    }

    /// Creates a host on an existing bus.
    ///
    /// The configured queue pump names are declared on `bus`.
    #[must_use]
    pub fn with_bus(bus: EventBus, config: SessionConfig) -> Self {
        for name in &config.queue_pumps {
            bus.declare_queue(name.clone());
        }
        Self {
            sessions: Rc::new(RefCell::new(BTreeMap::new())),
            bus,
            fatal: FatalHooks::new(),
            config,
            features: Features::standard(),
            next_id: Cell::new(0),
        }
    }

    /// Replaces the features announced to plugins launched from now on.
    #[must_use]
    pub fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// Returns the bus sessions are connected to.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Returns the fatal-error hooks sessions install themselves in.
    #[must_use]
    pub const fn fatal_hooks(&self) -> &FatalHooks {
        &self.fatal
    }

    /// Returns the session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the features announced to plugins.
    #[must_use]
    pub const fn features(&self) -> &Features {
        &self.features
    }

    /// Returns handles to every running session.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.sessions
            .borrow()
            .values()
            .map(SessionHandle::new)
            .collect()
    }

    /// Returns the number of running sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.borrow().len()
    }

    /// Posts one tick to the `"mainloop"` pump.
    ///
    /// This services plugin pipes, delivers termination notifications and
    /// flushes queued pumps.
    pub fn tick(&self) {
        self.bus.post(MAINLOOP, &json!({}));
    }

    /// Launches a plugin.
    ///
    /// # Errors
    ///
    /// Returns [`LeapError::NoPlugin`] for an empty command line and
    /// [`LeapError::LaunchFailed`] when the process cannot be started. Other
    /// variants report a failure to connect the session.
    pub fn launch(&self, params: &LeapParams) -> Result<SessionHandle, LeapError> {
        let Some((executable, arguments)) = params.command().split_first() else {
            error!(target: HOST_TARGET, "no plugin command specified");
            return Err(LeapError::NoPlugin);
        };
        let desc = params.description();
        let postend = self
            .bus
            .make(&format!("{desc}.postend"), DispatchMode::Immediate, true)?;
        let mut process_params = ProcessParams::new(executable)
            .args(arguments)
            .desc(desc.clone())
            .piped()
            .autokill(true)
            .postend(postend.name());
        if let Some(cwd) = &params.cwd {
            process_params = process_params.cwd(cwd);
        }

        let process = match ChildProcess::launch(&self.bus, &process_params) {
            Ok(process) => process,
            Err(source) => {
                self.bus.remove(postend.name());
                return Err(LeapError::LaunchFailed { desc, source });
            }
        };
        for stream in [Stream::Stdout, Stream::Stderr] {
            if let Ok(pipe) = process.read_pipe(stream) {
                pipe.set_limit(self.config.pipe_event_limit);
            }
        }

        let id = self.next_id.get();
        self.next_id.set(id.saturating_add(1));
        let context = SessionContext {
            bus: &self.bus,
            fatal: &self.fatal,
            config: &self.config,
            features: &self.features,
            registry: Rc::downgrade(&self.sessions),
            id,
        };
        let session = SessionInner::start(context, process, postend.name().to_owned())?;
        let handle = SessionHandle::new(&session);
        self.sessions.borrow_mut().insert(id, session);
        Ok(handle)
    }

    /// Launches a plugin, treating a launch failure as "no plugin".
    ///
    /// A process that cannot be started is logged and yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// An empty command line still fails with [`LeapError::NoPlugin`], and
    /// session connection failures are returned as by [`LeapHost::launch`].
    pub fn launch_or_none(&self, params: &LeapParams) -> Result<Option<SessionHandle>, LeapError> {
        match self.launch(params) {
            Ok(handle) => Ok(Some(handle)),
            Err(LeapError::LaunchFailed { desc, source }) => {
                warn!(target: HOST_TARGET, plugin = %desc, error = %source, "plugin not launched");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }
}

impl Default for LeapHost {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl fmt::Debug for LeapHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeapHost")
            .field("sessions", &self.session_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
