//! Length-prefixed framing of envelopes.
//!
//! Each frame is the ASCII decimal length of the encoded envelope, a `:`, and
//! then exactly that many bytes. [`FrameParser`] reassembles frames from a
//! byte buffer that may fill in arbitrary chunks; it delivers every complete
//! frame already buffered before returning.
//!
//! ASCII whitespace before a length prefix is skipped, so plugins that end
//! each frame with a newline are understood. Any other byte that is not a
//! digit still fails the prefix.

use leap_process::ReadPipe;
use tracing::trace;

use crate::codec::{self, Envelope};
use crate::error::{CodecError, ProtocolError};

const PROTOCOL_TARGET: &str = "leap_plugins::protocol";

/// Longest length prefix accepted before a `:` must appear.
pub const MAX_PREFIX_DIGITS: usize = 20;

/// Default number of bytes quoted from offending input.
pub const DEFAULT_PREVIEW_BYTES: usize = 80;

/// Serializes `envelope` as one frame.
///
/// # Errors
///
/// Returns [`CodecError::EmptyPump`] for an envelope without a pump name,
/// which a parser would reject, and [`CodecError::Json`] if the envelope
/// cannot be encoded.
pub fn frame(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    if envelope.pump().is_empty() {
        return Err(CodecError::EmptyPump);
    }
    let body = codec::encode(envelope)?;
    let mut framed = format!("{}:", body.len()).into_bytes();
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// A buffer the parser consumes frames from.
pub trait ByteSource {
    /// Returns the number of buffered bytes.
    fn buffered(&self) -> usize;

    /// Copies up to `len` bytes from the start without consuming them.
    fn peek(&self, len: usize) -> Vec<u8>;

    /// Returns the position of the first `byte`.
    fn position(&self, byte: u8) -> Option<usize>;

    /// Consumes up to `count` bytes from the start.
    fn consume(&mut self, count: usize) -> Vec<u8>;
}

impl ByteSource for &ReadPipe {
    fn buffered(&self) -> usize {
        self.size()
    }

    fn peek(&self, len: usize) -> Vec<u8> {
        ReadPipe::peek(self, 0, len)
    }

    fn position(&self, byte: u8) -> Option<usize> {
        self.find([byte], 0)
    }

    fn consume(&mut self, count: usize) -> Vec<u8> {
        ReadPipe::consume(self, count)
    }
}

impl ByteSource for Vec<u8> {
    fn buffered(&self) -> usize {
        self.len()
    }

    fn peek(&self, len: usize) -> Vec<u8> {
        self.get(..len.min(self.len()))
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    fn position(&self, byte: u8) -> Option<usize> {
        self.iter().position(|b| *b == byte)
    }

    fn consume(&mut self, count: usize) -> Vec<u8> {
        self.drain(..count.min(self.len())).collect()
    }
}

/// Receives envelopes as the parser completes them.
pub trait EnvelopeSink {
    /// Handles one decoded envelope.
    fn deliver(&mut self, envelope: Envelope);
}

impl<F: FnMut(Envelope)> EnvelopeSink for F {
    fn deliver(&mut self, envelope: Envelope) {
        self(envelope);
    }
}

/// Where the parser is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Reading the decimal length prefix.
    AwaitingLength,
    /// Waiting for a body of the given length.
    AwaitingBody(usize),
    /// A protocol error was reported; further input is ignored.
    Failed,
}

/// Incremental frame reassembly for one plugin's stdout.
#[derive(Debug, Clone)]
pub struct FrameParser {
    state: ParseState,
    preview_bytes: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(DEFAULT_PREVIEW_BYTES)
    }
}

impl FrameParser {
    /// Creates a parser quoting at most `preview_bytes` of offending input.
    #[must_use]
    pub const fn new(preview_bytes: usize) -> Self {
        Self {
            state: ParseState::AwaitingLength,
            preview_bytes,
        }
    }

    /// Returns the parser state.
    #[must_use]
    pub const fn state(&self) -> ParseState {
        self.state
    }

    /// Returns the body length still expected, if a body is pending.
    #[must_use]
    pub const fn expected(&self) -> Option<usize> {
        match self.state {
            ParseState::AwaitingBody(length) => Some(length),
            ParseState::AwaitingLength | ParseState::Failed => None,
        }
    }

    /// Consumes every complete frame in `source` and delivers it to `sink`.
    ///
    /// Returns the number of envelopes delivered. After an error the parser
    /// stays failed and delivers nothing more.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] for a malformed length prefix, an
    /// undecodable body, or a body that is not a `{pump, data}` map.
    pub fn parse<S, K>(&mut self, source: &mut S, sink: &mut K) -> Result<usize, ProtocolError>
    where
        S: ByteSource + ?Sized,
        K: EnvelopeSink + ?Sized,
    {
        let mut delivered = 0_usize;
        loop {
            match self.state {
                ParseState::Failed => return Ok(delivered),
                ParseState::AwaitingLength => match self.read_length(source) {
                    Ok(Some(length)) => self.state = ParseState::AwaitingBody(length),
                    Ok(None) => return Ok(delivered),
                    Err(error) => return Err(self.fail(error)),
                },
                ParseState::AwaitingBody(length) => {
                    if source.buffered() < length {
                        return Ok(delivered);
                    }
                    let body = source.consume(length);
                    self.state = ParseState::AwaitingLength;
                    let envelope = self.decode_body(&body).map_err(|e| self.fail(e))?;
                    trace!(
                        target: PROTOCOL_TARGET,
                        pump = envelope.pump(),
                        bytes = length,
                        "frame decoded"
                    );
                    sink.deliver(envelope);
                    delivered = delivered.saturating_add(1);
                }
            }
        }
    }

    fn read_length<S>(&self, source: &mut S) -> Result<Option<usize>, ProtocolError>
    where
        S: ByteSource + ?Sized,
    {
        skip_whitespace(source);
        let Some(colon) = source.position(b':') else {
            // Reject garbage early rather than waiting for a ':' that may never come.
            let pending = source.peek(MAX_PREFIX_DIGITS.saturating_add(1));
            if pending.len() > MAX_PREFIX_DIGITS || !pending.iter().all(u8::is_ascii_digit) {
                return Err(self.bad_prefix(&pending));
            }
            return Ok(None);
        };
        let prefix = source.peek(colon);
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_DIGITS || !prefix.iter().all(u8::is_ascii_digit) {
            return Err(self.bad_prefix(&prefix));
        }
        let length = std::str::from_utf8(&prefix)
            .ok()
            .and_then(|digits| digits.parse::<usize>().ok())
            .ok_or_else(|| self.bad_prefix(&prefix))?;
        source.consume(colon.saturating_add(1));
        Ok(Some(length))
    }

    fn decode_body(&self, body: &[u8]) -> Result<Envelope, ProtocolError> {
        let preview = codec::preview(body, self.preview_bytes);
        let value = codec::decode(body).map_err(|source| ProtocolError::BadBody {
            length: body.len(),
            preview: preview.clone(),
            source,
        })?;
        Envelope::from_value(value, &preview)
    }

    fn bad_prefix(&self, bytes: &[u8]) -> ProtocolError {
        ProtocolError::BadLengthPrefix {
            prefix: codec::preview(bytes, self.preview_bytes),
        }
    }

    fn fail(&mut self, error: ProtocolError) -> ProtocolError {
        self.state = ParseState::Failed;
        error
    }
}

fn skip_whitespace<S>(source: &mut S)
where
    S: ByteSource + ?Sized,
{
    while source.peek(1).first().is_some_and(u8::is_ascii_whitespace) {
        source.consume(1);
    }
}

#[cfg(test)]
mod tests;
