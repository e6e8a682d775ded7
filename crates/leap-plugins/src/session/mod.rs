//! One conversation with a LEAP plugin.
//!
//! A session owns the plugin's [`ChildProcess`] and wires it to the bus:
//!
//! - events posted on the session's reply pump are framed onto the plugin's
//!   stdin;
//! - frames read from stdout are posted to the pump each one names;
//! - stderr lines are logged against the plugin description;
//! - the process postend notification terminates the session.
//!
//! The first frame a plugin receives is the priming message
//! `{pump: <reply pump>, data: {command: <command pump>, features}}`.
//!
//! Sessions are owned by the host's registry. Everything registered on the
//! bus holds only a weak reference, so a session is gone as soon as the
//! registry releases it on termination.

mod commands;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};

use leap_config::SessionConfig;
use leap_events::{AttachedApi, Connection, EventBus, WeakEventBus};
use leap_process::{ChildProcess, Stream};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec::{self, Envelope};
use crate::error::LeapError;
use crate::fatal::{FatalHookGuard, FatalHooks};
use crate::features::Features;
use crate::protocol::{self, FrameParser};

const SESSION_TARGET: &str = "leap_plugins::session";
const STDERR_TARGET: &str = "leap_plugins::stderr";

/// Listener name used by a session on every pump it watches.
pub const SESSION_LISTENER: &str = "LLLeap";

/// Prefix of command API pump names.
pub const COMMAND_PUMP_PREFIX: &str = "LLLeapListener";

/// Lifecycle of a plugin session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Listeners are being registered.
    Launching,
    /// The plugin is running and connected.
    Running,
    /// The plugin has exited and the session has been released.
    Terminated,
}

impl SessionState {
    /// Returns a lowercase name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Launching => "launching",
            Self::Running => "running",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) type Registry = RefCell<BTreeMap<u64, Rc<SessionInner>>>;

/// Everything a session needs from its host.
pub(crate) struct SessionContext<'a> {
    pub(crate) bus: &'a EventBus,
    pub(crate) fatal: &'a FatalHooks,
    pub(crate) config: &'a SessionConfig,
    pub(crate) features: &'a Features,
    pub(crate) registry: Weak<Registry>,
    pub(crate) id: u64,
}

pub(crate) struct SessionInner {
    this: Weak<Self>,
    id: u64,
    desc: String,
    bus: WeakEventBus,
    process: ChildProcess,
    reply_pump: String,
    command_pump: String,
    postend_pump: String,
    parser: RefCell<FrameParser>,
    features: Features,
    config: SessionConfig,
    state: Cell<SessionState>,
    listeners: RefCell<Vec<Connection>>,
    forwards: RefCell<BTreeMap<(String, String), Connection>>,
    created_pumps: RefCell<BTreeSet<String>>,
    command: RefCell<Option<AttachedApi>>,
    fatal_guard: RefCell<Option<FatalHookGuard>>,
    registry: Weak<Registry>,
}

impl SessionInner {
    /// Connects a launched plugin process and sends the priming message.
    pub(crate) fn start(
        context: SessionContext<'_>,
        process: ChildProcess,
        postend_pump: String,
    ) -> Result<Rc<Self>, LeapError> {
        let bus = context.bus;
        let session = Rc::new_cyclic(|this| Self {
            this: Weak::clone(this),
            id: context.id,
            desc: process.desc().to_owned(),
            bus: bus.downgrade(),
            reply_pump: Uuid::new_v4().to_string(),
            command_pump: bus.invent_name(COMMAND_PUMP_PREFIX),
            postend_pump,
            parser: RefCell::new(FrameParser::new(context.config.stdout_preview_bytes)),
            features: context.features.clone(),
            config: context.config.clone(),
            state: Cell::new(SessionState::Launching),
            listeners: RefCell::new(Vec::new()),
            forwards: RefCell::new(BTreeMap::new()),
            created_pumps: RefCell::new(BTreeSet::new()),
            command: RefCell::new(None),
            fatal_guard: RefCell::new(None),
            registry: context.registry,
            process,
        });

        session.connect(bus)?;
        let api = commands::command_api(&session.command_pump, &session.this);
        *session.command.borrow_mut() = Some(api.attach(bus)?);
        let weak = Weak::clone(&session.this);
        *session.fatal_guard.borrow_mut() = Some(context.fatal.install(move |message| {
            if let Some(live) = weak.upgrade() {
                live.forward_fatal(message);
            }
        }));

        session.state.set(SessionState::Running);
        session.send(
            &session.reply_pump,
            &json!({
                "command": session.command_pump,
                "features": session.features.to_value(),
            }),
        )?;
        info!(
            target: SESSION_TARGET,
            plugin = %session.desc,
            pid = session.process.id(),
            reply = %session.reply_pump,
            command = %session.command_pump,
            "plugin session started"
        );
        Ok(session)
    }

    fn connect(&self, bus: &EventBus) -> Result<(), LeapError> {
        let mut listeners = Vec::with_capacity(4);

        let weak = Weak::clone(&self.this);
        let reply = self.reply_pump.clone();
        listeners.push(bus.obtain(&self.reply_pump).listen(
            SESSION_LISTENER,
            move |event: &Value| {
                if let Some(session) = weak.upgrade() {
                    session.forward(&reply, event);
                }
                false
            },
        )?);

        let weak = Weak::clone(&self.this);
        listeners.push(self.process.read_pipe(Stream::Stdout)?.pump().listen(
            SESSION_LISTENER,
            move |_: &Value| {
                if let Some(session) = weak.upgrade() {
                    session.drain_stdout();
                }
                false
            },
        )?);

        let weak = Weak::clone(&self.this);
        listeners.push(self.process.read_pipe(Stream::Stderr)?.pump().listen(
            SESSION_LISTENER,
            move |event: &Value| {
                if let Some(session) = weak.upgrade() {
                    let eof = event.get("eof").and_then(Value::as_bool).unwrap_or(false);
                    session.drain_stderr(eof);
                }
                false
            },
        )?);

        let weak = Weak::clone(&self.this);
        listeners.push(bus.obtain(&self.postend_pump).listen(
            SESSION_LISTENER,
            move |event: &Value| {
                if let Some(session) = weak.upgrade() {
                    session.terminate(event);
                }
                false
            },
        )?);

        *self.listeners.borrow_mut() = listeners;
        Ok(())
    }

    /// Frames `data` for the plugin, addressed to `pump`.
    fn send(&self, pump: &str, data: &Value) -> Result<(), LeapError> {
        if self.state.get() == SessionState::Terminated {
            return Err(LeapError::Terminated {
                desc: self.desc.clone(),
            });
        }
        let bytes = protocol::frame(&Envelope::new(pump, data.clone()))?;
        self.process.write_pipe(Stream::Stdin)?.write(&bytes)?;
        debug!(
            target: SESSION_TARGET,
            plugin = %self.desc,
            pump,
            bytes = bytes.len(),
            "sent to plugin"
        );
        Ok(())
    }

    fn forward(&self, pump: &str, data: &Value) {
        if let Err(error) = self.send(pump, data) {
            warn!(target: SESSION_TARGET, plugin = %self.desc, pump, %error, "cannot forward event to plugin");
        }
    }

    fn drain_stdout(&self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let Ok(pipe) = self.process.read_pipe(Stream::Stdout) else {
            return;
        };
        let Ok(mut parser) = self.parser.try_borrow_mut() else {
            return;
        };
        let mut source = pipe;
        let mut deliver = |envelope: Envelope| {
            let (pump, data) = envelope.into_parts();
            debug!(target: SESSION_TARGET, plugin = %self.desc, pump = %pump, "received from plugin");
            bus.post(&pump, &data);
        };
        let parsed = parser.parse(&mut source, &mut deliver);
        drop(parser);
        if let Err(error) = parsed {
            error!(
                target: SESSION_TARGET,
                plugin = %self.desc,
                %error,
                "protocol error, killing plugin"
            );
            self.process.kill();
        }
    }

    fn drain_stderr(&self, eof: bool) {
        let Ok(pipe) = self.process.read_pipe(Stream::Stderr) else {
            return;
        };
        while let Some(line) = pipe.read_line() {
            log_stderr_line(&self.desc, &line);
        }
        if eof {
            let rest = pipe.take_all();
            if !rest.is_empty() {
                log_stderr_line(&self.desc, &String::from_utf8_lossy(&rest));
            }
        }
    }

    fn forward_fatal(&self, message: &str) {
        if self.state.get() != SessionState::Running {
            return;
        }
        if let Err(error) = self.send(&self.reply_pump, &json!({"type": "error", "error": message})) {
            warn!(target: SESSION_TARGET, plugin = %self.desc, %error, "cannot forward fatal error");
            return;
        }
        let timeout = self.config.fatal_drain_timeout();
        let drained = self
            .process
            .write_pipe(Stream::Stdin)
            .is_ok_and(|stdin| stdin.wait_drained(timeout));
        if !drained {
            warn!(
                target: SESSION_TARGET,
                plugin = %self.desc,
                timeout_ms = self.config.fatal_drain_timeout_ms,
                "fatal error forward did not drain"
            );
        }
    }

    fn terminate(&self, postend: &Value) {
        if self.state.replace(SessionState::Terminated) == SessionState::Terminated {
            return;
        }
        let status = postend
            .get("string")
            .and_then(Value::as_str)
            .unwrap_or("terminated");
        info!(target: SESSION_TARGET, plugin = %self.desc, status, "plugin terminated");

        if let Ok(pipe) = self.process.read_pipe(Stream::Stdout) {
            let leftover = pipe.take_all();
            if !leftover.is_empty() {
                warn!(
                    target: SESSION_TARGET,
                    plugin = %self.desc,
                    bytes = leftover.len(),
                    expected = ?self.parser.try_borrow().ok().and_then(|parser| parser.expected()),
                    preview = %codec::preview(&leftover, self.config.stdout_preview_bytes),
                    "discarding unparsed plugin output"
                );
            }
        }

        self.teardown();
        if let Some(registry) = self.registry.upgrade() {
            let released = registry.borrow_mut().remove(&self.id);
            drop(released);
        }
    }

    fn teardown(&self) {
        drop(self.fatal_guard.borrow_mut().take());
        drop(self.command.borrow_mut().take());
        drop(std::mem::take(&mut *self.forwards.borrow_mut()));
        drop(std::mem::take(&mut *self.listeners.borrow_mut()));
        let created = std::mem::take(&mut *self.created_pumps.borrow_mut());
        if let Some(bus) = self.bus.upgrade() {
            for pump in created
                .iter()
                .map(String::as_str)
                .chain([self.reply_pump.as_str(), self.postend_pump.as_str()])
            {
                bus.remove(pump);
            }
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Logs one line of plugin stderr at the level its prefix names.
fn log_stderr_line(desc: &str, raw: &str) {
    let line = raw.strip_suffix('\r').unwrap_or(raw);
    match split_level(line) {
        (StderrLevel::Error, text) => error!(target: STDERR_TARGET, plugin = %desc, "{text}"),
        (StderrLevel::Warn, text) => warn!(target: STDERR_TARGET, plugin = %desc, "{text}"),
        (StderrLevel::Info, text) => info!(target: STDERR_TARGET, plugin = %desc, "{text}"),
        (StderrLevel::Debug, text) => debug!(target: STDERR_TARGET, plugin = %desc, "{text}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StderrLevel {
    Error,
    Warn,
    Info,
    Debug,
}

const LEVEL_TAGS: [(&str, StderrLevel); 5] = [
    ("ERROR:", StderrLevel::Error),
    ("WARNING:", StderrLevel::Warn),
    ("WARN:", StderrLevel::Warn),
    ("INFO:", StderrLevel::Info),
    ("DEBUG:", StderrLevel::Debug),
];

fn split_level(line: &str) -> (StderrLevel, &str) {
    LEVEL_TAGS
        .iter()
        .find_map(|(tag, level)| {
            let head = line.get(..tag.len())?;
            let rest = line.get(tag.len()..)?;
            head.eq_ignore_ascii_case(tag).then(|| (*level, rest.trim_start()))
        })
        .unwrap_or((StderrLevel::Info, line))
}

/// A liveness-checked reference to a plugin session.
///
/// The handle does not keep the session alive. Once the plugin terminates,
/// every operation reports the session as gone.
#[derive(Clone)]
pub struct SessionHandle {
    session: Weak<SessionInner>,
    desc: String,
}

impl SessionHandle {
    pub(crate) fn new(session: &Rc<SessionInner>) -> Self {
        Self {
            session: Rc::downgrade(session),
            desc: session.desc.clone(),
        }
    }

    fn live(&self) -> Option<Rc<SessionInner>> {
        self.session
            .upgrade()
            .filter(|session| session.state.get() != SessionState::Terminated)
    }

    /// Returns whether the session is still running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.live().is_some()
    }

    /// Returns the session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session
            .upgrade()
            .map_or(SessionState::Terminated, |session| session.state.get())
    }

    /// Returns the plugin description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.desc
    }

    /// Returns the pump whose events are forwarded to the plugin.
    #[must_use]
    pub fn reply_pump(&self) -> Option<String> {
        self.live().map(|session| session.reply_pump.clone())
    }

    /// Returns the pump serving the plugin's command API.
    #[must_use]
    pub fn command_pump(&self) -> Option<String> {
        self.live().map(|session| session.command_pump.clone())
    }

    /// Returns the plugin's process id.
    #[must_use]
    pub fn process_id(&self) -> Option<u32> {
        self.live().map(|session| session.process.id())
    }

    /// Kills the plugin.
    ///
    /// Returns `true` when the plugin is no longer running, including when
    /// the session has already ended. The session itself ends on the next
    /// tick, once the termination notification arrives.
    pub fn kill(&self) -> bool {
        self.session
            .upgrade()
            .is_none_or(|session| session.process.kill())
    }

    /// Sends `data` to the plugin, addressed to `pump`.
    ///
    /// # Errors
    ///
    /// Returns [`LeapError::Terminated`] once the session has ended, and
    /// otherwise fails if the envelope cannot be encoded or written.
    pub fn post_to_plugin(&self, pump: &str, data: &Value) -> Result<(), LeapError> {
        let session = self.live().ok_or_else(|| LeapError::Terminated {
            desc: self.desc.clone(),
        })?;
        session.send(pump, data)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("desc", &self.desc)
            .field("state", &self.state())
            .finish()
    }
}
