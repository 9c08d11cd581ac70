//! Backend message framing
//!
//! Turns an arbitrary byte stream into discrete `(tag, payload)` frames.
//! A frame is a 1-byte tag followed by a 4-byte big-endian length that counts
//! itself but not the tag. Partial frames stay buffered until more bytes arrive.

use super::constants::HEADER_LEN;
use crate::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};

/// Maximum message length (1 GB), matching PostgreSQL's own `PQ_LARGE_MESSAGE_LIMIT`.
///
/// Any message whose length field exceeds this value is rejected before allocation.
pub const MAX_MESSAGE_LENGTH: usize = 1_073_741_824;

/// One complete backend message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type tag
    pub tag: u8,
    /// Message body (without tag and length)
    pub payload: Bytes,
}

/// Incremental frame splitter over an inbound byte buffer
#[derive(Debug)]
pub struct Framer {
    buf: BytesMut,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    /// Create an empty framer
    pub fn new() -> Self {
        Self::with_capacity(8192)
    }

    /// Create an empty framer with a preallocated buffer
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Append freshly arrived bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Direct access to the buffer so a transport can read into it
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Number of buffered bytes not yet emitted as frames
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop a single raw byte (used for the one-byte SSLRequest answer)
    pub fn take_byte(&mut self) -> Option<u8> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.get_u8())
        }
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when more data is needed. Fails only when the header
    /// carries an impossible length.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let tag = self.buf[0];
        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;

        if len < 4 {
            return Err(Error::Protocol(format!(
                "invalid length {} for message tag '{}'",
                len, tag as char
            )));
        }
        if len > MAX_MESSAGE_LENGTH {
            return Err(Error::Protocol(format!(
                "message length {} exceeds maximum allowed {}",
                len, MAX_MESSAGE_LENGTH
            )));
        }
        if self.buf.len() < len + 1 {
            return Ok(None);
        }

        let mut frame = self.buf.split_to(len + 1);
        frame.advance(HEADER_LEN);
        Ok(Some(Frame {
            tag,
            payload: frame.freeze(),
        }))
    }

    /// Emit every complete frame currently buffered
    pub fn drain_frames(&mut self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}
