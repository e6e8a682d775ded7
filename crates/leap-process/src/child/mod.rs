//! Child process lifecycle.
//!
//! [`ChildProcess::launch`] spawns the executable with the requested stream
//! modes. Each piped output stream is read by a background thread that
//! forwards raw chunks over a channel; stdin is fed by a writer thread. The
//! channel is drained on the driving thread whenever the bus's `"mainloop"`
//! pump is posted to, so pipe events and the termination notification are
//! always delivered on the same thread as every other listener.
//!
//! The termination notification ("postend") is posted once, after both
//! output pipes have reported end of file and the child has been reaped. A
//! launch that fails still posts it, without `id` or `data`.

mod state;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;

use leap_events::{Connection, DispatchMode, EventBus, MAINLOOP, WeakEventBus};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::error::ProcessError;
use crate::params::{ProcessParams, Stream, StreamMode};
use crate::pipe::{ReadPipe, WritePipe};

pub use self::state::ProcessState;

const PROCESS_TARGET: &str = "leap_process::child";

const READ_CHUNK: usize = 4096;

enum PipeMessage {
    Data(Stream, Vec<u8>),
    Eof(Stream),
}

struct ProcessInner {
    desc: String,
    bus: WeakEventBus,
    child: RefCell<Child>,
    pid: u32,
    state: Cell<ProcessState>,
    autokill: bool,
    postend: Option<String>,
    stdin: Option<WritePipe>,
    stdout: Option<ReadPipe>,
    stderr: Option<ReadPipe>,
    modes: [StreamMode; 3],
    messages: Receiver<PipeMessage>,
    open_readers: Cell<usize>,
    finished: Cell<bool>,
    polling: Cell<bool>,
    tick: RefCell<Option<Connection>>,
}

/// A launched child process and its pipes.
///
/// Dropping the handle kills the child when autokill is set; otherwise the
/// child keeps running detached.
pub struct ChildProcess {
    inner: Rc<ProcessInner>,
}

impl ChildProcess {
    /// Launches a child process.
    ///
    /// Pipe pumps are registered on `bus`, and the process is serviced from
    /// the bus's `"mainloop"` pump.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::LaunchFailed`] if the parameters are invalid
    /// or the operating system cannot start the executable. The postend
    /// notification, if configured, is posted before returning.
    pub fn launch(bus: &EventBus, params: &ProcessParams) -> Result<Self, ProcessError> {
        let desc = params.description();
        match Self::spawn(bus, params, &desc) {
            Ok(process) => Ok(process),
            Err(error) => {
                warn!(target: PROCESS_TARGET, plugin = %desc, %error, "launch failed");
                if let Some(pump) = params.postend_pump() {
                    bus.post(
                        pump,
                        &json!({
                            "desc": desc,
                            "state": ProcessState::Unstarted.as_str(),
                            "string": error.to_string(),
                        }),
                    );
                }
                Err(error)
            }
        }
    }

    fn spawn(bus: &EventBus, params: &ProcessParams, desc: &str) -> Result<Self, ProcessError> {
        if params.executable().as_os_str().is_empty() {
            return Err(ProcessError::launch(desc, "no executable specified", None));
        }

        let mut command = Command::new(params.executable());
        command.args(params.arguments());
        if let Some(dir) = params.working_dir() {
            command.current_dir(dir);
        }
        command
            .stdin(stdio(params.mode(Stream::Stdin)))
            .stdout(stdio(params.mode(Stream::Stdout)))
            .stderr(stdio(params.mode(Stream::Stderr)));

        debug!(
            target: PROCESS_TARGET,
            plugin = %desc,
            executable = %params.executable().display(),
            args = ?params.arguments(),
            "spawning child process"
        );

        let mut child = command.spawn().map_err(|e| {
            let message = if e.kind() == ErrorKind::NotFound {
                format!("{} not found", params.executable().display())
            } else {
                format!("failed to start {}", params.executable().display())
            };
            ProcessError::launch(desc, message, Some(e))
        })?;
        let pid = child.id();

        let (stdin, stdout, stderr, messages) = match start_pipes(bus, desc, &mut child) {
            Ok(pipes) => pipes,
            Err(error) => {
                // Threads could not start; do not leave the child orphaned.
                child.kill().ok();
                child.wait().ok();
                return Err(error);
            }
        };
        let open_readers = usize::from(stdout.is_some()).saturating_add(usize::from(stderr.is_some()));

        let inner = Rc::new(ProcessInner {
            desc: desc.to_owned(),
            bus: bus.downgrade(),
            child: RefCell::new(child),
            pid,
            state: Cell::new(ProcessState::Running),
            autokill: params.is_autokill(),
            postend: params.postend_pump().map(str::to_owned),
            stdin,
            stdout,
            stderr,
            modes: [
                params.mode(Stream::Stdin),
                params.mode(Stream::Stdout),
                params.mode(Stream::Stderr),
            ],
            messages,
            open_readers: Cell::new(open_readers),
            finished: Cell::new(false),
            polling: Cell::new(false),
            tick: RefCell::new(None),
        });

        let weak: Weak<ProcessInner> = Rc::downgrade(&inner);
        let tick = bus
            .obtain(MAINLOOP)
            .listen(bus.invent_name(&format!("ChildProcess-{pid}-")), move |_: &Value| {
                if let Some(process) = weak.upgrade() {
                    process.poll();
                }
                false
            })
            .map_err(|e| ProcessError::launch(desc, e.to_string(), None))?;
        *inner.tick.borrow_mut() = Some(tick);

        info!(target: PROCESS_TARGET, plugin = %desc, pid, "child process launched");
        Ok(Self { inner })
    }

    /// Returns the process description.
    #[must_use]
    pub fn desc(&self) -> &str {
        &self.inner.desc
    }

    /// Returns the operating system process id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.inner.pid
    }

    /// Returns the last known state without polling the child.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.inner.state.get()
    }

    /// Returns whether the termination notification has been delivered.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.finished.get()
    }

    /// Returns whether the child is still running, reaping it if it exited.
    pub fn is_running(&self) -> bool {
        self.inner.refresh_state().is_running()
    }

    /// Kills the child.
    ///
    /// Returns `true` if the child is no longer running when the call
    /// returns. Killing an already terminated child is a no-op.
    pub fn kill(&self) -> bool {
        self.inner.kill()
    }

    /// Returns the pipe reading `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::PipeMode`] unless `stream` is an output
    /// stream opened in pipe mode.
    pub fn read_pipe(&self, stream: Stream) -> Result<&ReadPipe, ProcessError> {
        let pipe = match stream {
            Stream::Stdout => self.inner.stdout.as_ref(),
            Stream::Stderr => self.inner.stderr.as_ref(),
            Stream::Stdin => None,
        };
        pipe.ok_or_else(|| self.inner.pipe_mode(stream))
    }

    /// Returns the pipe feeding the child's stdin.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::PipeMode`] unless `stream` is stdin opened in
    /// pipe mode.
    pub fn write_pipe(&self, stream: Stream) -> Result<&WritePipe, ProcessError> {
        let pipe = match stream {
            Stream::Stdin => self.inner.stdin.as_ref(),
            Stream::Stdout | Stream::Stderr => None,
        };
        pipe.ok_or_else(|| self.inner.pipe_mode(stream))
    }

    /// Drains pending pipe data and checks for termination.
    ///
    /// This runs automatically on every `"mainloop"` post.
    pub fn poll(&self) {
        self.inner.poll();
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.inner.autokill && self.inner.state.get().is_running() {
            debug!(target: PROCESS_TARGET, plugin = %self.inner.desc, "autokill on drop");
            self.inner.kill();
        }
    }
}

impl fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildProcess")
            .field("desc", &self.inner.desc)
            .field("pid", &self.inner.pid)
            .field("state", &self.inner.state.get())
            .finish_non_exhaustive()
    }
}

impl ProcessInner {
    fn pipe_mode(&self, stream: Stream) -> ProcessError {
        let index = usize::from(stream.slot());
        ProcessError::PipeMode {
            desc: self.desc.clone(),
            stream,
            mode: self.modes.get(index).copied().unwrap_or_default(),
        }
    }

    fn refresh_state(&self) -> ProcessState {
        let current = self.state.get();
        if !current.is_running() {
            return current;
        }
        let Ok(mut child) = self.child.try_borrow_mut() else {
            return current;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                let next = ProcessState::from_status(status);
                debug!(target: PROCESS_TARGET, plugin = %self.desc, state = %next, "child terminated");
                self.state.set(next);
                next
            }
            Ok(None) => current,
            Err(error) => {
                warn!(target: PROCESS_TARGET, plugin = %self.desc, %error, "failed to query child status");
                current
            }
        }
    }

    fn kill(&self) -> bool {
        if !self.refresh_state().is_running() {
            return true;
        }
        let Ok(mut child) = self.child.try_borrow_mut() else {
            return false;
        };
        if let Err(error) = child.kill() {
            warn!(target: PROCESS_TARGET, plugin = %self.desc, %error, "kill failed");
        }
        match child.wait() {
            Ok(status) => {
                let next = ProcessState::from_status(status);
                info!(target: PROCESS_TARGET, plugin = %self.desc, state = %next, "child killed");
                self.state.set(next);
                true
            }
            Err(error) => {
                warn!(target: PROCESS_TARGET, plugin = %self.desc, %error, "wait after kill failed");
                false
            }
        }
    }

    fn poll(&self) {
        if self.finished.get() || self.polling.replace(true) {
            return;
        }
        loop {
            match self.messages.try_recv() {
                Ok(PipeMessage::Data(stream, bytes)) => {
                    if let Some(pipe) = self.output(stream) {
                        pipe.receive(&bytes);
                    }
                }
                Ok(PipeMessage::Eof(stream)) => {
                    self.open_readers
                        .set(self.open_readers.get().saturating_sub(1));
                    if let Some(pipe) = self.output(stream) {
                        pipe.close();
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        let state = self.refresh_state();
        if !state.is_running() && self.open_readers.get() == 0 {
            self.finish(state);
        }
        self.polling.set(false);
    }

    fn finish(&self, state: ProcessState) {
        if self.finished.replace(true) {
            return;
        }
        // Disconnect from the tick first: postend listeners may drop us.
        let tick = self.tick.borrow_mut().take();
        drop(tick);
        let Some(pump) = &self.postend else {
            return;
        };
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let mut event = Map::new();
        event.insert("id".into(), json!(self.pid));
        event.insert("desc".into(), json!(self.desc));
        event.insert("state".into(), json!(state.as_str()));
        if let Some(data) = state.data() {
            event.insert("data".into(), json!(data));
        }
        event.insert("string".into(), json!(state.describe()));
        bus.post(pump, &Value::Object(event));
    }

    fn output(&self, stream: Stream) -> Option<&ReadPipe> {
        match stream {
            Stream::Stdout => self.stdout.as_ref(),
            Stream::Stderr => self.stderr.as_ref(),
            Stream::Stdin => None,
        }
    }
}

impl Drop for ProcessInner {
    fn drop(&mut self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        for pipe in [self.stdout.as_ref(), self.stderr.as_ref()].into_iter().flatten() {
            bus.remove(pipe.pump().name());
        }
    }
}

type Pipes = (
    Option<WritePipe>,
    Option<ReadPipe>,
    Option<ReadPipe>,
    Receiver<PipeMessage>,
);

fn start_pipes(bus: &EventBus, desc: &str, child: &mut Child) -> Result<Pipes, ProcessError> {
    let (sender, messages) = mpsc::channel();
    let stdin = match child.stdin.take() {
        Some(sink) => Some(WritePipe::spawn(desc, sink)?),
        None => None,
    };
    let stdout = match child.stdout.take() {
        Some(source) => {
            spawn_reader(desc, Stream::Stdout, source, sender.clone())?;
            Some(ReadPipe::new(Stream::Stdout, pipe_pump(bus, desc, Stream::Stdout)))
        }
        None => None,
    };
    let stderr = match child.stderr.take() {
        Some(source) => {
            spawn_reader(desc, Stream::Stderr, source, sender)?;
            Some(ReadPipe::new(Stream::Stderr, pipe_pump(bus, desc, Stream::Stderr)))
        }
        None => None,
    };
    Ok((stdin, stdout, stderr, messages))
}

fn stdio(mode: StreamMode) -> Stdio {
    match mode {
        StreamMode::Inherit => Stdio::inherit(),
        StreamMode::Pipe => Stdio::piped(),
        StreamMode::Closed => Stdio::null(),
    }
}

fn pipe_pump(bus: &EventBus, desc: &str, stream: Stream) -> leap_events::EventPump {
    let name = format!("{desc}.{stream}");
    match bus.make(&name, DispatchMode::Immediate, true) {
        Ok(pump) => pump,
        // Tweaking never reports a duplicate.
        Err(_) => bus.obtain(&bus.invent_name(&name)),
    }
}

fn spawn_reader<R>(
    desc: &str,
    stream: Stream,
    mut source: R,
    sender: Sender<PipeMessage>,
) -> Result<(), ProcessError>
where
    R: Read + Send + 'static,
{
    let plugin = desc.to_owned();
    thread::Builder::new()
        .name(format!("{desc} {stream}"))
        .spawn(move || {
            let mut chunk = vec![0_u8; READ_CHUNK];
            loop {
                match source.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(count) => {
                        let bytes = chunk.get(..count).map(<[u8]>::to_vec).unwrap_or_default();
                        if sender.send(PipeMessage::Data(stream, bytes)).is_err() {
                            return;
                        }
                    }
                    Err(error) if error.kind() == ErrorKind::Interrupted => {}
                    Err(error) => {
                        debug!(target: PROCESS_TARGET, plugin = %plugin, %stream, %error, "pipe read failed");
                        break;
                    }
                }
            }
            // Receiver gone means the process handle was dropped.
            sender.send(PipeMessage::Eof(stream)).ok();
        })
        .map(drop)
        .map_err(|error| ProcessError::Io {
            desc: desc.to_owned(),
            source: Arc::new(error),
        })
}
