// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Terminator-delimited framing.
//!
//! A byte stream carries no message boundaries. Frames are delimited by a
//! fixed three-byte terminator instead of a length prefix, so either side can
//! be a plain byte producer:
//!
//! ```text
//! +-------------------------------+------+------+------+
//! | record 0 | record 1 | ...     | 0x09 | 0x0D | 0x0A |
//! +-------------------------------+------+------+------+
//!                                   TAB    CR     LF
//! ```
//!
//! The terminator is not escaped. Pose records are fixed-size binary floats,
//! so the framing layer never has to look inside them.
//!
//! [`ReceiveBuffer`] reassembles frames out of partial reads. It remembers how
//! far it has scanned, so each call to [`ReceiveBuffer::try_extract_frame`]
//! only looks at bytes that arrived since the previous call.
//!
//! # Example
//!
//! ```
//! use posewire::frame::{frame_payload, Extract, ReceiveBuffer};
//!
//! let mut buf = ReceiveBuffer::new(64);
//! buf.extend_from_slice(&frame_payload(b"abc"));
//! assert_eq!(buf.try_extract_frame(), Extract::Frame(6));
//! assert_eq!(buf.consume(6), 0);
//! ```

use std::io::{self, Read};

use crate::pose::PoseRecord;

/// Frame terminator: TAB CR LF.
pub const TERMINATOR: [u8; 3] = *b"\t\r\n";

/// Smallest buffer capacity handed out by [`ReceiveBuffer::for_frame_len`].
pub const MIN_BUFFER_CAPACITY: usize = 1024;

/// Default growth ceiling for a receive buffer (anti-OOM protection).
pub const DEFAULT_MAX_BUFFER_CAPACITY: usize = 1024 * 1024;

/// Lowest allowed ratio between buffer capacity and expected frame size.
pub const MIN_FRAMES_PER_BUFFER: usize = 4;

// ============================================================================
// Encoding
// ============================================================================

/// Encode `records` in order and append the terminator.
pub fn frame(records: &[PoseRecord]) -> Vec<u8> {
    let len = records.iter().map(PoseRecord::byte_len).sum::<usize>() + TERMINATOR.len();
    let mut out = Vec::with_capacity(len);
    frame_into(records, &mut out);
    out
}

/// Append an encoded frame of `records` to `out`.
pub fn frame_into(records: &[PoseRecord], out: &mut Vec<u8>) {
    for record in records {
        record.encode_into(out);
    }
    out.extend_from_slice(&TERMINATOR);
}

/// Frame an arbitrary payload (control messages, replies).
pub fn frame_payload(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + TERMINATOR.len());
    out.extend_from_slice(payload);
    out.extend_from_slice(&TERMINATOR);
    out
}

/// Strip a trailing terminator, if present.
pub fn strip_terminator(frame: &[u8]) -> &[u8] {
    frame.strip_suffix(&TERMINATOR[..]).unwrap_or(frame)
}

// ============================================================================
// ReceiveBuffer
// ============================================================================

/// Result of a frame extraction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extract {
    /// A complete frame of this many bytes (terminator included) starts at offset 0.
    Frame(usize),
    /// No terminator in the buffered bytes yet.
    NeedMoreData,
}

/// Growable reassembly buffer.
///
/// Only `[0, num_buffered)` is meaningful; bytes past the cursor are stale and
/// never interpreted. The buffer is owned by a single reader.
#[derive(Debug)]
pub struct ReceiveBuffer {
    buf: Vec<u8>,
    num_buffered: usize,
    /// First offset that may still hold the start of an unseen terminator.
    scanned: usize,
    max_capacity: usize,

    frames_extracted: u64,
    bytes_discarded: u64,
}

impl ReceiveBuffer {
    /// Create a buffer with a fixed initial capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(TERMINATOR.len());
        Self {
            buf: vec![0u8; capacity],
            num_buffered: 0,
            scanned: 0,
            max_capacity: DEFAULT_MAX_BUFFER_CAPACITY.max(capacity),
            frames_extracted: 0,
            bytes_discarded: 0,
        }
    }

    /// Size a buffer for frames of `frame_len` bytes, holding at least
    /// `frames` of them (never fewer than [`MIN_FRAMES_PER_BUFFER`]).
    pub fn for_frame_len(frame_len: usize, frames: usize) -> Self {
        let frames = frames.max(MIN_FRAMES_PER_BUFFER);
        Self::new((frame_len * frames).max(MIN_BUFFER_CAPACITY))
    }

    /// Set the growth ceiling. Never below the current capacity.
    pub fn with_max_capacity(mut self, max_capacity: usize) -> Self {
        self.max_capacity = max_capacity.max(self.buf.len());
        self
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn num_buffered(&self) -> usize {
        self.num_buffered
    }

    pub fn is_empty(&self) -> bool {
        self.num_buffered == 0
    }

    /// Whether the buffer is full and cannot grow.
    pub fn is_saturated(&self) -> bool {
        self.num_buffered == self.buf.len() && self.buf.len() >= self.max_capacity
    }

    /// Frames extracted and consumed so far.
    pub fn frames_extracted(&self) -> u64 {
        self.frames_extracted
    }

    /// Bytes thrown away by [`ReceiveBuffer::clear`].
    pub fn bytes_discarded(&self) -> u64 {
        self.bytes_discarded
    }

    /// Buffered bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.num_buffered]
    }

    /// Append bytes, growing past the ceiling if needed.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        let needed = self.num_buffered + data.len();
        if needed > self.buf.len() {
            self.buf.resize(needed.next_power_of_two(), 0);
        }
        self.buf[self.num_buffered..needed].copy_from_slice(data);
        self.num_buffered = needed;
    }

    /// Make room for at least one more byte. Returns `false` at the ceiling.
    fn reserve_tail(&mut self) -> bool {
        if self.num_buffered < self.buf.len() {
            return true;
        }
        if self.buf.len() >= self.max_capacity {
            return false;
        }
        let grown = (self.buf.len() * 2).min(self.max_capacity);
        self.buf.resize(grown, 0);
        true
    }

    /// Read once from `reader` into the tail of the buffer.
    ///
    /// Returns the number of bytes read; `Ok(0)` means end of stream. Fails
    /// with `InvalidData` when the buffer is saturated without a terminator.
    pub fn read_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        if !self.reserve_tail() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "no frame terminator within {} buffered bytes",
                    self.num_buffered
                ),
            ));
        }
        let n = reader.read(&mut self.buf[self.num_buffered..])?;
        self.num_buffered += n;
        Ok(n)
    }

    /// Look for the first complete frame.
    ///
    /// Scanning resumes where the previous call stopped, so the cost is
    /// proportional to the bytes added since then. Repeated calls without a
    /// [`ReceiveBuffer::consume`] return the same answer.
    pub fn try_extract_frame(&mut self) -> Extract {
        let end = self.num_buffered;
        let start = self.scanned.min(end);
        let window = &self.buf[start..end];

        match window
            .windows(TERMINATOR.len())
            .position(|w| w == TERMINATOR)
        {
            Some(pos) => {
                let term_at = start + pos;
                self.scanned = term_at;
                Extract::Frame(term_at + TERMINATOR.len())
            }
            None => {
                // A terminator may still straddle the last two bytes
                self.scanned = end.saturating_sub(TERMINATOR.len() - 1);
                Extract::NeedMoreData
            }
        }
    }

    /// The first `len` buffered bytes.
    pub fn frame(&self, len: usize) -> &[u8] {
        &self.buf[..len.min(self.num_buffered)]
    }

    /// Drop the first `frame_len` bytes and shift the rest to the front.
    ///
    /// Returns the new buffered count. `frame_len` of zero, or more than is
    /// buffered, leaves the buffer untouched.
    pub fn consume(&mut self, frame_len: usize) -> usize {
        if frame_len == 0 || frame_len > self.num_buffered {
            return self.num_buffered;
        }
        self.buf.copy_within(frame_len..self.num_buffered, 0);
        self.num_buffered -= frame_len;
        self.scanned = self.scanned.saturating_sub(frame_len);
        self.frames_extracted += 1;
        self.num_buffered
    }

    /// Extract, copy out and consume the next frame (terminator included).
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        match self.try_extract_frame() {
            Extract::Frame(len) => {
                let out = self.buf[..len].to_vec();
                self.consume(len);
                Some(out)
            }
            Extract::NeedMoreData => None,
        }
    }

    /// Drop everything buffered, including a partial frame.
    pub fn clear(&mut self) {
        self.bytes_discarded += self.num_buffered as u64;
        self.num_buffered = 0;
        self.scanned = 0;
    }
}
