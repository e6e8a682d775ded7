//! Buffered pipe endpoints of a child process.
//!
//! A [`ReadPipe`] accumulates bytes read from the child's stdout or stderr.
//! Every burst is announced on the pipe's own pump as
//! `{data, len, slot, eof}`, where `data` is the buffered text truncated to
//! the pipe's limit and `len` is the full buffered length. Exactly one event
//! carries `eof: true`, and it is the last. Truncation applies only to the
//! event; the buffer itself is kept whole for protocol parsing.
//!
//! A [`WritePipe`] hands bytes to a writer thread feeding the child's stdin
//! and tracks how many are still in flight.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use leap_events::EventPump;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::ProcessError;
use crate::params::Stream;

const PIPE_TARGET: &str = "leap_process::pipe";

/// Buffered bytes received from one of the child's output streams.
pub struct ReadPipe {
    stream: Stream,
    buffer: RefCell<Vec<u8>>,
    limit: Cell<usize>,
    eof: Cell<bool>,
    pump: EventPump,
}

impl ReadPipe {
    pub(crate) fn new(stream: Stream, pump: EventPump) -> Self {
        Self {
            stream,
            buffer: RefCell::new(Vec::new()),
            limit: Cell::new(0),
            eof: Cell::new(false),
            pump,
        }
    }

    /// Returns which stream this pipe reads.
    #[must_use]
    pub const fn stream(&self) -> Stream {
        self.stream
    }

    /// Returns the pump on which pipe events are posted.
    #[must_use]
    pub const fn pump(&self) -> &EventPump {
        &self.pump
    }

    /// Returns the byte cap applied to the `data` field of pipe events.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit.get()
    }

    /// Sets the byte cap applied to the `data` field of pipe events.
    pub fn set_limit(&self, limit: usize) {
        self.limit.set(limit);
    }

    /// Returns whether the child has closed the stream.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.eof.get()
    }

    /// Returns the number of buffered bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.buffer.borrow().len()
    }

    /// Returns whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.borrow().is_empty()
    }

    /// Copies up to `len` bytes starting at `offset` without consuming them.
    ///
    /// Ranges past the end of the buffer are clipped.
    #[must_use]
    pub fn peek(&self, offset: usize, len: usize) -> Vec<u8> {
        let buffer = self.buffer.borrow();
        let end = offset.saturating_add(len).min(buffer.len());
        buffer.get(offset..end).map(<[u8]>::to_vec).unwrap_or_default()
    }

    /// Returns the position of the first `needle` at or after `offset`.
    #[must_use]
    pub fn find(&self, needle: impl AsRef<[u8]>, offset: usize) -> Option<usize> {
        find_bytes(&self.buffer.borrow(), needle.as_ref(), offset)
    }

    /// Returns whether `needle` occurs anywhere in the buffer.
    #[must_use]
    pub fn contains(&self, needle: impl AsRef<[u8]>) -> bool {
        self.contains_from(needle, 0)
    }

    /// Returns whether `needle` starts at or after `offset`.
    #[must_use]
    pub fn contains_from(&self, needle: impl AsRef<[u8]>, offset: usize) -> bool {
        self.find(needle, offset).is_some()
    }

    /// Consumes and returns up to `count` bytes.
    pub fn consume(&self, count: usize) -> Vec<u8> {
        let mut buffer = self.buffer.borrow_mut();
        let take = count.min(buffer.len());
        buffer.drain(..take).collect()
    }

    /// Consumes exactly `count` bytes, or nothing if fewer are buffered.
    pub fn read_exact(&self, count: usize) -> Option<Vec<u8>> {
        (self.size() >= count).then(|| self.consume(count))
    }

    /// Consumes one line, returning it without its trailing newline.
    ///
    /// Returns `None`, consuming nothing, when no complete line is buffered.
    pub fn read_line(&self) -> Option<String> {
        let end = self.find(b"\n", 0)?;
        let mut line = self.consume(end.saturating_add(1));
        line.pop();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Consumes everything buffered.
    pub fn take_all(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buffer.borrow_mut())
    }

    pub(crate) fn receive(&self, bytes: &[u8]) {
        self.buffer.borrow_mut().extend_from_slice(bytes);
        self.announce();
    }

    pub(crate) fn close(&self) {
        if self.eof.replace(true) {
            return;
        }
        self.announce();
    }

    fn announce(&self) {
        let event = {
            let buffer = self.buffer.borrow();
            let shown = buffer.get(..self.limit.get().min(buffer.len())).unwrap_or_default();
            json!({
                "data": String::from_utf8_lossy(shown),
                "len": buffer.len(),
                "slot": self.stream.slot(),
                "eof": self.eof.get(),
            })
        };
        self.pump.post(&event);
    }
}

impl fmt::Debug for ReadPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadPipe")
            .field("stream", &self.stream)
            .field("size", &self.size())
            .field("eof", &self.eof.get())
            .finish()
    }
}

pub(crate) fn find_bytes(haystack: &[u8], needle: &[u8], offset: usize) -> Option<usize> {
    let tail = haystack.get(offset..)?;
    if needle.is_empty() {
        return Some(offset);
    }
    tail.windows(needle.len())
        .position(|window| window == needle)
        .map(|position| position.saturating_add(offset))
}

#[derive(Default)]
struct WriteProgress {
    pending: Mutex<usize>,
    drained: Condvar,
    broken: AtomicBool,
}

impl WriteProgress {
    fn add(&self, bytes: usize) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = pending.saturating_add(bytes);
    }

    fn complete(&self, bytes: usize) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = pending.saturating_sub(bytes);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    fn abandon(&self) {
        self.broken.store(true, Ordering::Release);
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = 0;
        self.drained.notify_all();
    }
}

/// Bytes on their way to the child's stdin.
pub struct WritePipe {
    desc: String,
    sender: RefCell<Option<Sender<Vec<u8>>>>,
    progress: Arc<WriteProgress>,
}

impl WritePipe {
    /// Starts a writer thread feeding `sink`.
    pub(crate) fn spawn<W>(desc: &str, mut sink: W) -> Result<Self, ProcessError>
    where
        W: Write + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Vec<u8>>();
        let progress = Arc::new(WriteProgress::default());
        let shared = Arc::clone(&progress);
        let plugin = desc.to_owned();
        thread::Builder::new()
            .name(format!("{desc} stdin"))
            .spawn(move || {
                for chunk in receiver {
                    let written = sink.write_all(&chunk).and_then(|()| sink.flush());
                    if let Err(error) = written {
                        debug!(target: PIPE_TARGET, plugin = %plugin, %error, "stdin writer stopped");
                        shared.abandon();
                        return;
                    }
                    shared.complete(chunk.len());
                }
            })
            .map_err(|error| ProcessError::Io {
                desc: desc.to_owned(),
                source: Arc::new(error),
            })?;
        Ok(Self {
            desc: desc.to_owned(),
            sender: RefCell::new(Some(sender)),
            progress,
        })
    }

    /// Queues `bytes` for the child.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::PipeClosed`] once the pipe has been closed or
    /// the child stopped reading.
    pub fn write(&self, bytes: &[u8]) -> Result<(), ProcessError> {
        let closed = || ProcessError::PipeClosed {
            desc: self.desc.clone(),
            stream: Stream::Stdin,
        };
        if self.progress.broken.load(Ordering::Acquire) {
            return Err(closed());
        }
        if bytes.is_empty() {
            return Ok(());
        }
        let sender = self.sender.borrow();
        let Some(channel) = sender.as_ref() else {
            return Err(closed());
        };
        self.progress.add(bytes.len());
        if channel.send(bytes.to_vec()).is_err() {
            self.progress.complete(bytes.len());
            warn!(target: PIPE_TARGET, plugin = %self.desc, "stdin writer has exited");
            return Err(closed());
        }
        Ok(())
    }

    /// Returns the number of bytes not yet written to the child.
    #[must_use]
    pub fn pending(&self) -> usize {
        *self
            .progress
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until every queued byte has been written or `timeout` elapses.
    ///
    /// Returns whether the pipe drained.
    #[must_use]
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let pending = self
            .progress
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (remaining, _) = self
            .progress
            .drained
            .wait_timeout_while(pending, timeout, |bytes| *bytes > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *remaining == 0
    }

    /// Closes the pipe once queued bytes are written, signalling end of input.
    pub fn close(&self) {
        self.sender.borrow_mut().take();
    }

    /// Returns whether the pipe has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.borrow().is_none() || self.progress.broken.load(Ordering::Acquire)
    }
}

impl fmt::Debug for WritePipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritePipe")
            .field("desc", &self.desc)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
