//! Wire framing codec for worker communication.
//!
//! The worker writes `Content-Length: N\r\n\r\n{json}` frames to stdout.
//! [`MessageFramer`] turns arbitrarily chunked stdout bytes into complete
//! message bodies; [`FrameWriter`] writes requests to the worker's stdin.

use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use tslink_types::Request;

use crate::types::RequestFraming;

const CONTENT_LENGTH: &[u8] = b"Content-Length: ";

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Longest decimal length we accept before declaring the header malformed.
const MAX_LENGTH_DIGITS: usize = 20;

/// Maximum frame size (256 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

const INITIAL_CAPACITY: usize = 8 * 1024;

/// Fatal framing errors. The connection that produced one is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("expected `Content-Length: ` header, found {found:?}")]
    MissingHeader { found: String },
    #[error("invalid Content-Length value {value:?}")]
    InvalidLength { value: String },
    #[error("Content-Length header is not followed by an empty line")]
    MalformedTerminator,
    #[error("Content-Length {length} exceeds maximum {max}", max = MAX_FRAME_BYTES)]
    Oversized { length: usize },
    #[error("frame body is not valid UTF-8")]
    InvalidUtf8,
}

/// Incremental parser for `Content-Length` framed messages.
///
/// Bytes may be split anywhere, including inside the header. Each call to
/// [`push`](Self::push) returns every message that became complete.
pub struct MessageFramer {
    buffer: BytesMut,
    pending_length: Option<usize>,
}

impl Default for MessageFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageFramer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            pending_length: None,
        }
    }

    /// Append a chunk and extract all complete messages.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, FrameError> {
        if self.buffer.capacity() - self.buffer.len() < chunk.len() {
            // Grow geometrically so a large body arriving in small chunks
            // does not reallocate on every read.
            let wanted = (self.buffer.len() + chunk.len()).max(self.buffer.capacity() * 2);
            self.buffer.reserve(wanted - self.buffer.len());
        }
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(message) = self.next_message()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Extract the next complete message, or `Ok(None)` if more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<String>, FrameError> {
        let length = match self.pending_length {
            Some(length) => length,
            None => match self.try_read_header()? {
                Some(length) => {
                    self.pending_length = Some(length);
                    length
                }
                None => return Ok(None),
            },
        };

        if self.buffer.len() < length {
            return Ok(None);
        }

        let body = self.buffer.split_to(length);
        self.pending_length = None;
        self.skip_line_breaks();

        String::from_utf8(body.to_vec())
            .map(Some)
            .map_err(|_| FrameError::InvalidUtf8)
    }

    /// Number of bytes buffered but not yet returned.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn skip_line_breaks(&mut self) {
        let skip = self
            .buffer
            .iter()
            .take_while(|b| matches!(b, b'\r' | b'\n'))
            .count();
        self.buffer.advance(skip);
    }

    fn try_read_header(&mut self) -> Result<Option<usize>, FrameError> {
        let skip = self
            .buffer
            .iter()
            .take_while(|b| matches!(b, b' ' | b'\r' | b'\n'))
            .count();
        self.buffer.advance(skip);

        let available = self.buffer.len().min(CONTENT_LENGTH.len());
        if self.buffer[..available] != CONTENT_LENGTH[..available] {
            return Err(FrameError::MissingHeader {
                found: String::from_utf8_lossy(&self.buffer[..available]).into_owned(),
            });
        }
        if self.buffer.len() < CONTENT_LENGTH.len() {
            return Ok(None);
        }

        let digits_start = CONTENT_LENGTH.len();
        let Some(cr_offset) = self.buffer[digits_start..].iter().position(|&b| b == b'\r')
        else {
            let partial = &self.buffer[digits_start..];
            if partial.len() > MAX_LENGTH_DIGITS || partial.iter().any(|b| !b.is_ascii_digit()) {
                return Err(FrameError::InvalidLength {
                    value: String::from_utf8_lossy(partial).into_owned(),
                });
            }
            return Ok(None);
        };

        let cr = digits_start + cr_offset;
        let raw_length = &self.buffer[digits_start..cr];
        let length = std::str::from_utf8(raw_length)
            .ok()
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| FrameError::InvalidLength {
                value: String::from_utf8_lossy(raw_length).into_owned(),
            })?;

        let terminator = &self.buffer[cr..];
        let present = terminator.len().min(HEADER_TERMINATOR.len());
        if terminator[..present] != HEADER_TERMINATOR[..present] {
            return Err(FrameError::MalformedTerminator);
        }
        if present < HEADER_TERMINATOR.len() {
            return Ok(None);
        }

        if length > MAX_FRAME_BYTES {
            return Err(FrameError::Oversized { length });
        }

        self.buffer.advance(cr + HEADER_TERMINATOR.len());
        Ok(Some(length))
    }
}

/// Frame a message body with a `Content-Length` header.
#[must_use]
pub fn encode_frame(body: &str) -> Vec<u8> {
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(body.as_bytes());
    frame
}

/// Writes requests to the worker's stdin.
pub struct FrameWriter<W> {
    writer: W,
    framing: RequestFraming,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W, framing: RequestFraming) -> Self {
        Self { writer, framing }
    }

    pub async fn write_request(&mut self, request: &Request) -> Result<()> {
        let body = serde_json::to_string(request).context("serializing request")?;
        let bytes = match self.framing {
            RequestFraming::Line => {
                let mut line = body.into_bytes();
                line.extend_from_slice(b"\r\n");
                line
            }
            RequestFraming::ContentLength => encode_frame(&body),
        };

        self.writer
            .write_all(&bytes)
            .await
            .context("writing request")?;
        self.writer.flush().await.context("flushing request")?;

        Ok(())
    }
}
