// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic pose sender.
//!
//! Registered as the `send` role with the send interval as its poll
//! interval. Each tick snapshots the [`PoseBoard`], frames it and writes the
//! frame in one `write_all`. A slow consumer shows up as a blocking write
//! once the OS socket buffer fills; there is no other backpressure.
//!
//! ```text
//!   Idle --attach--> Connected --first write--> Streaming --write error--> Closed
//!                        |                                                  ^
//!                        +---------------- stop requested ------------------+
//! ```

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::board::PoseBoard;
use crate::metrics::LinkMetrics;
use crate::registry::{KeepAlive, Tick, Worker};
use crate::stream::SharedWriter;

/// Sender lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SenderState {
    Idle = 0,
    Connected = 1,
    Streaming = 2,
    Closed = 3,
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderState::Idle => write!(f, "idle"),
            SenderState::Connected => write!(f, "connected"),
            SenderState::Streaming => write!(f, "streaming"),
            SenderState::Closed => write!(f, "closed"),
        }
    }
}

/// Sender state readable from outside the `send` thread.
#[derive(Debug)]
pub struct SenderStatus(AtomicU8);

impl SenderStatus {
    pub fn new() -> Self {
        Self(AtomicU8::new(SenderState::Idle as u8))
    }

    pub fn get(&self) -> SenderState {
        match self.0.load(Ordering::Acquire) {
            0 => SenderState::Idle,
            1 => SenderState::Connected,
            2 => SenderState::Streaming,
            _ => SenderState::Closed,
        }
    }

    fn set(&self, state: SenderState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for SenderStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes the board to the socket once per tick.
pub struct SenderEngine {
    board: PoseBoard,
    writer: SharedWriter,
    metrics: Arc<LinkMetrics>,
    status: Arc<SenderStatus>,
    scratch: Vec<u8>,
}

impl SenderEngine {
    /// Sender for `board` writing to `writer`. Starts in `Connected`.
    pub fn new(board: PoseBoard, writer: SharedWriter, metrics: Arc<LinkMetrics>) -> Self {
        let status = Arc::new(SenderStatus::new());
        status.set(SenderState::Connected);
        let scratch = Vec::with_capacity(board.topology().frame_len());
        Self {
            board,
            writer,
            metrics,
            status,
            scratch,
        }
    }

    /// Shared view of the sender state.
    pub fn status(&self) -> Arc<SenderStatus> {
        Arc::clone(&self.status)
    }

    /// Encode and write one frame.
    pub fn send_once(&mut self) -> io::Result<usize> {
        self.board.encode_frame(&mut self.scratch);
        let mut writer = self.writer.lock();
        writer.write_all(&self.scratch)?;
        writer.flush()?;
        Ok(self.scratch.len())
    }
}

impl Worker for SenderEngine {
    fn tick(&mut self, ctx: &KeepAlive) -> Tick {
        match self.send_once() {
            Ok(len) => {
                if self.status.get() == SenderState::Connected {
                    log::info!("[sender] streaming {} byte frames", len);
                    self.status.set(SenderState::Streaming);
                }
                self.metrics.record_frame_sent(len);
                Tick::Continue
            }
            Err(e) => {
                if ctx.is_alive() {
                    log::warn!("[sender] write failed, closing: {}", e);
                    self.metrics.record_send_error();
                } else {
                    log::debug!("[sender] write after stop: {}", e);
                }
                self.status.set(SenderState::Closed);
                Tick::Break
            }
        }
    }

    fn finish(&mut self, _ctx: &KeepAlive) {
        self.status.set(SenderState::Closed);
        log::debug!(
            "[sender] stopped after {} frames",
            self.metrics.frames_sent()
        );
    }
}
